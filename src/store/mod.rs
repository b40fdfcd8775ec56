//! Persistent spatial store.
//!
//! A namespace is one GeoPackage: `{root}/{namespace}.gpkg` on disk, or an
//! in-memory GeoPackage for tests. A namespace exists iff its GeoPackage
//! does. Loaders talk to the store through [`SpatialStore`].

pub(crate) mod feature;
mod gpkg;
mod layer;

pub use gpkg::Gpkg;
pub use layer::GpkgLayer;

use crate::crs::Crs;
use crate::error::{PipelineError, Result};
use crate::table::GeoTable;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Namespaces created by [`bootstrap`] when none are named.
pub const REFERENCE_NAMESPACES: [&str; 6] = ["ibge", "imaflora", "ibama", "inpe", "icmbio", "sicar"];

const GPKG_EXTENSION: &str = "gpkg";

/// Table-level operations the loader needs from a spatial store.
pub trait SpatialStore {
    fn has_namespace(&self, namespace: &str) -> Result<bool>;

    /// Atomically replace `table_name` in `namespace` with `table`.
    ///
    /// Returns the number of rows written. On error the previous table (if
    /// any) is left untouched.
    fn replace_table(&mut self, namespace: &str, table_name: &str, table: &GeoTable)
    -> Result<usize>;

    fn read_table(&self, namespace: &str, table_name: &str) -> Result<GeoTable>;

    fn list_tables(&self, namespace: &str) -> Result<Vec<String>>;

    /// Returns whether the table existed.
    fn drop_table(&mut self, namespace: &str, table_name: &str) -> Result<bool>;
}

/// Row count, CRS and geometry type of a stored table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
    pub crs: Option<Crs>,
    pub geometry_type: &'static str,
}

/// [`SpatialStore`] keeping one GeoPackage per namespace.
#[derive(Debug)]
pub struct GpkgStore {
    root: Option<PathBuf>,
    namespaces: BTreeMap<String, Gpkg>,
}

impl GpkgStore {
    /// Open a store rooted at `root`, attaching every `*.gpkg` file in it.
    ///
    /// The directory is created when missing.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut namespaces = BTreeMap::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(GPKG_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_identifier(name).is_err() {
                debug!(path = %path.display(), "skipping file with invalid namespace name");
                continue;
            }
            namespaces.insert(name.to_string(), Gpkg::open(&path)?);
        }
        debug!(root = %root.display(), namespaces = namespaces.len(), "opened store");

        Ok(Self {
            root: Some(root),
            namespaces,
        })
    }

    /// A store whose namespaces live in memory only.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            namespaces: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Create a namespace unless it already exists. Returns whether it was created.
    pub fn create_namespace(&mut self, namespace: &str) -> Result<bool> {
        validate_identifier(namespace)?;
        if self.namespaces.contains_key(namespace) {
            return Ok(false);
        }
        let gpkg = match &self.root {
            Some(root) => Gpkg::create(root.join(format!("{namespace}.{GPKG_EXTENSION}")))?,
            None => Gpkg::new_in_memory()?,
        };
        self.namespaces.insert(namespace.to_string(), gpkg);
        info!(namespace, "created namespace");
        Ok(true)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Direct access to the GeoPackage backing a namespace.
    pub fn gpkg(&self, namespace: &str) -> Result<&Gpkg> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| PipelineError::NamespaceNotFound {
                namespace: namespace.to_string(),
            })
    }

    /// Describe every table of a namespace.
    pub fn summaries(&self, namespace: &str) -> Result<Vec<TableSummary>> {
        let gpkg = self.gpkg(namespace)?;
        gpkg.list_layers()?
            .into_iter()
            .map(|name| {
                let layer = gpkg.open_layer(&name)?;
                Ok(TableSummary {
                    rows: layer.count()?,
                    crs: layer.crs(),
                    geometry_type: layer.geometry_type_name(),
                    name,
                })
            })
            .collect()
    }
}

impl SpatialStore for GpkgStore {
    fn has_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.namespaces.contains_key(namespace))
    }

    fn replace_table(
        &mut self,
        namespace: &str,
        table_name: &str,
        table: &GeoTable,
    ) -> Result<usize> {
        self.gpkg(namespace)?.replace_layer(table_name, table)
    }

    fn read_table(&self, namespace: &str, table_name: &str) -> Result<GeoTable> {
        self.gpkg(namespace)?.read_table(table_name)
    }

    fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
        self.gpkg(namespace)?.list_layers()
    }

    fn drop_table(&mut self, namespace: &str, table_name: &str) -> Result<bool> {
        self.gpkg(namespace)?.delete_layer(table_name)
    }
}

/// Read one layer of an existing GeoPackage. The file is opened read-only.
pub fn read_layer<P: AsRef<Path>>(path: P, layer: &str) -> Result<GeoTable> {
    let path = path.as_ref();
    let table = Gpkg::open_read_only(path)?.read_table(layer)?;
    debug!(path = %path.display(), layer, rows = table.len(), "read layer");
    Ok(table)
}

/// Create the given namespaces (or [`REFERENCE_NAMESPACES`] when empty).
///
/// Idempotent. Returns the names that were newly created.
pub fn bootstrap<S: AsRef<str>>(store: &mut GpkgStore, namespaces: &[S]) -> Result<Vec<String>> {
    let requested: Vec<&str> = if namespaces.is_empty() {
        REFERENCE_NAMESPACES.to_vec()
    } else {
        namespaces.iter().map(AsRef::as_ref).collect()
    };

    let mut created = Vec::new();
    for namespace in requested {
        if store.create_namespace(namespace)? {
            created.push(namespace.to_string());
        }
    }
    info!(created = created.len(), "bootstrap finished");
    Ok(created)
}

/// Namespace names become file names, so keep them to `[A-Za-z0-9_]`.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidIdentifier(name.to_string()))
    }
}
