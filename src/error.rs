use crate::crs::Crs;
use crate::types::ColumnType;
use thiserror::Error;

/// Crate error type for the normalization pipeline and its GeoPackage store.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Wraps errors returned by `rusqlite`.
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    #[error(transparent)]
    Wkb(#[from] wkb::error::WkbError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An attribute the stage depends on is missing from the table.
    #[error("table '{table}' has no attribute '{attribute}'")]
    Schema { table: String, attribute: String },
    /// The same attribute name carries two different types across inputs.
    #[error("column '{column}' is {left:?} in one input and {right:?} in another")]
    SchemaConflict {
        column: String,
        left: ColumnType,
        right: ColumnType,
    },
    /// The table has no spatial reference, so it cannot be reprojected or stored.
    #[error("table '{table}' has no CRS defined")]
    MissingCrs { table: String },
    /// Two tables that must share a spatial reference do not.
    #[error("CRS mismatch: '{left_table}' is {left}, '{right_table}' is {right}")]
    CrsMismatch {
        left_table: String,
        left: String,
        right_table: String,
        right: String,
    },
    #[error("no input tables were given")]
    EmptyInput,
    /// The target namespace has not been bootstrapped in the store.
    #[error("namespace '{namespace}' does not exist in the store")]
    NamespaceNotFound { namespace: String },
    /// Writing one partition failed; siblings are unaffected.
    #[error("failed to write partition table '{table_name}': {source}")]
    PartitionWrite {
        table_name: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// The EPSG code is not part of the built-in CRS catalog.
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),
    /// A coordinate fell outside the domain of the source or target projection.
    #[error("cannot transform row {row} of '{table}' from {from} to {to}")]
    TransformFailed {
        table: String,
        row: usize,
        from: Crs,
        to: Crs,
    },

    /// Property count did not match the table schema.
    #[error("invalid property count: expected {expected}, got {got}")]
    InvalidPropertyCount { expected: usize, got: usize },
    /// A value did not match the declared column type.
    #[error("column '{column}' expects {expected}, got {actual}")]
    ValueTypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A geometry type in metadata could not be mapped to a supported WKB geometry type.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometryType(String),
    /// A column type declared in SQLite metadata is not supported by this crate.
    #[error("unsupported column type for column '{column}': {declared_type}")]
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    #[error("invalid or mixed geometry dimension (z={z}, m={m})")]
    InvalidDimension { z: i8, m: i8 },
    /// GeoPackage geometry blob does not start with the `GP` magic.
    #[error("invalid gpkg geometry magic: {0:#04x} {1:#04x}")]
    InvalidGpkgGeometryMagic(u8, u8),
    /// Invalid GeoPackage geometry flags byte.
    #[error("invalid gpkg geometry flags: {0:#04x}")]
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is shorter than its header and envelope.
    #[error("invalid gpkg geometry length: got {len} bytes, expected at least {minimum}")]
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// Layer schema has multiple primary key columns, which is unsupported.
    #[error("composite primary keys are not supported for layer: {layer_name}")]
    CompositePrimaryKeyUnsupported { layer_name: String },
    /// Layer schema has no primary key column.
    #[error("no primary key column found for layer: {layer_name}")]
    MissingPrimaryKeyColumn { layer_name: String },
    #[error("layer not found: {layer_name}")]
    LayerNotFound { layer_name: String },
    /// A namespace or table name that cannot be used as an identifier.
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("operation not allowed on read-only connection")]
    ReadOnly,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub(crate) fn schema(table: &str, attribute: &str) -> Self {
        Self::Schema {
            table: table.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn crs_mismatch(
        left_table: &str,
        left: Option<Crs>,
        right_table: &str,
        right: Option<Crs>,
    ) -> Self {
        let describe = |crs: Option<Crs>| crs.map_or_else(|| "undefined".to_string(), |c| c.to_string());
        Self::CrsMismatch {
            left_table: left_table.to_string(),
            left: describe(left),
            right_table: right_table.to_string(),
            right: describe(right),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
