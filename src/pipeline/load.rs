//! Partition-aware persistence into a [`SpatialStore`].

use crate::error::{PipelineError, Result};
use crate::store::SpatialStore;
use crate::table::{GeoRow, GeoTable};
use crate::types::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of writing one partition (or the whole table when unpartitioned).
#[derive(Debug)]
pub struct PartitionOutcome {
    /// Rendered partition key, or `None` for an unpartitioned load.
    pub key: Option<String>,
    pub table_name: String,
    /// Rows written, or why the write failed.
    pub result: std::result::Result<usize, PipelineError>,
}

#[derive(Debug)]
pub struct LoadReport {
    pub namespace: String,
    pub outcomes: Vec<PartitionOutcome>,
}

impl LoadReport {
    /// `true` when every partition was written.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    pub fn rows_written(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
            .sum()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|outcome| outcome.table_name.as_str())
    }
}

/// Write `table` into `namespace`, replacing any existing target table.
///
/// Without `partition_column` the whole table is written as `prefix`.
/// Otherwise each distinct value of the column, in order of first
/// appearance, becomes a table named `{prefix}_{value}`. A failed partition
/// is recorded in the report and the remaining ones are still written.
///
/// Fails before writing anything when the namespace is missing, the table
/// has no CRS, or the partition column is absent or holds blobs.
pub fn load<S: SpatialStore + ?Sized>(
    table: GeoTable,
    partition_column: Option<&str>,
    prefix: &str,
    namespace: &str,
    store: &mut S,
) -> Result<LoadReport> {
    if !store.has_namespace(namespace)? {
        return Err(PipelineError::NamespaceNotFound {
            namespace: namespace.to_string(),
        });
    }
    table.require_geometry_column()?;
    if table.crs().is_none() {
        return Err(PipelineError::MissingCrs {
            table: table.name().to_string(),
        });
    }

    let outcomes = match partition_column {
        None => {
            let table_name = prefix.to_string();
            let result = write(store, namespace, &table_name, &table.with_name(prefix));
            vec![PartitionOutcome {
                key: None,
                table_name,
                result,
            }]
        }
        Some(column) => load_partitions(table, column, prefix, namespace, store)?,
    };

    let report = LoadReport {
        namespace: namespace.to_string(),
        outcomes,
    };
    info!(
        namespace,
        tables = report.outcomes.len(),
        failed = report.failures().count(),
        rows = report.rows_written(),
        "load finished"
    );
    Ok(report)
}

fn load_partitions<S: SpatialStore + ?Sized>(
    table: GeoTable,
    column: &str,
    prefix: &str,
    namespace: &str,
    store: &mut S,
) -> Result<Vec<PartitionOutcome>> {
    let idx = table.require_column(column)?;
    let (name, schema, crs, rows) = table.into_parts();

    let mut partitions: Vec<Partition> = Vec::new();
    let mut by_value: HashMap<PartitionValue, usize> = HashMap::new();
    for row in rows {
        let value = PartitionValue::of(&row.properties[idx])
            .ok_or_else(|| PipelineError::schema(&name, column))?;
        let slot = match by_value.get(&value) {
            Some(&slot) => slot,
            None => {
                by_value.insert(value.clone(), partitions.len());
                partitions.push(Partition {
                    key: value.render(),
                    rows: Vec::new(),
                });
                partitions.len() - 1
            }
        };
        partitions[slot].rows.push(row);
    }
    debug!(table = %name, column, partitions = partitions.len(), "split into partitions");

    // SQLite table names are case-insensitive: `car_PA` and `car_pa` collide.
    let mut outcomes = Vec::with_capacity(partitions.len());
    let mut written_names: HashMap<String, String> = HashMap::new();
    for partition in partitions {
        let table_name = format!("{prefix}_{}", partition.key);
        let folded = table_name.to_ascii_lowercase();
        let result = match written_names.get(&folded) {
            Some(earlier) => Err(PipelineError::PartitionWrite {
                table_name: table_name.clone(),
                source: Box::new(PipelineError::InvalidIdentifier(format!(
                    "partition key '{}' renders to the same table name as key '{earlier}'",
                    partition.key
                ))),
            }),
            None => {
                written_names.insert(folded, partition.key.clone());
                let subset = GeoTable::from_parts(table_name.clone(), schema.clone(), crs, partition.rows);
                write(store, namespace, &table_name, &subset)
            }
        };
        outcomes.push(PartitionOutcome {
            key: Some(partition.key),
            table_name,
            result,
        });
    }
    Ok(outcomes)
}

fn write<S: SpatialStore + ?Sized>(
    store: &mut S,
    namespace: &str,
    table_name: &str,
    table: &GeoTable,
) -> std::result::Result<usize, PipelineError> {
    match store.replace_table(namespace, table_name, table) {
        Ok(rows) => {
            debug!(namespace, table = table_name, rows, "wrote table");
            Ok(rows)
        }
        Err(err) => {
            warn!(namespace, table = table_name, error = %err, "partition write failed");
            Err(PipelineError::PartitionWrite {
                table_name: table_name.to_string(),
                source: Box::new(err),
            })
        }
    }
}

struct Partition {
    key: String,
    rows: Vec<GeoRow>,
}

/// Hashable view of a partition key value. Reals are compared bitwise.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PartitionValue {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
}

impl PartitionValue {
    /// `None` for blobs, which cannot name a table.
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Integer(v) => Some(Self::Integer(*v)),
            Value::Real(v) => Some(Self::Real(v.to_bits())),
            Value::Text(v) => Some(Self::Text(v.clone())),
            Value::Blob(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Real(bits) => f64::from_bits(*bits).to_string(),
            Self::Text(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::load;
    use crate::Result;
    use crate::crs::SIRGAS_2000_POLYCONIC;
    use crate::error::PipelineError;
    use crate::store::{GpkgStore, SpatialStore};
    use crate::table::{GeoRow, GeoTable, Schema};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use geo::Point;

    fn imoveis(codes: &[Value]) -> Result<GeoTable> {
        let schema = Schema::new(
            "geom",
            vec![
                ColumnSpec::new("cod_imovel", ColumnType::Integer),
                ColumnSpec::new("cd_uf", ColumnType::Varchar),
            ],
        );
        let rows = codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                GeoRow::from_geometry(
                    &Point::new(5_000_000.0 + i as f64, 9_000_000.0),
                    [Value::Integer(i as i64), code.clone()],
                )
            })
            .collect::<Result<Vec<GeoRow>>>()?;
        GeoTable::new("imoveis", schema, Some(SIRGAS_2000_POLYCONIC), rows)
    }

    fn store() -> Result<GpkgStore> {
        let mut store = GpkgStore::in_memory();
        store.create_namespace("sicar")?;
        Ok(store)
    }

    /// Delegates to a real store but refuses one table name.
    struct FlakyStore {
        inner: GpkgStore,
        broken_table: &'static str,
    }

    impl SpatialStore for FlakyStore {
        fn has_namespace(&self, namespace: &str) -> Result<bool> {
            self.inner.has_namespace(namespace)
        }

        fn replace_table(&mut self, namespace: &str, table_name: &str, table: &GeoTable) -> Result<usize> {
            if table_name == self.broken_table {
                return Err(PipelineError::ReadOnly);
            }
            self.inner.replace_table(namespace, table_name, table)
        }

        fn read_table(&self, namespace: &str, table_name: &str) -> Result<GeoTable> {
            self.inner.read_table(namespace, table_name)
        }

        fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
            self.inner.list_tables(namespace)
        }

        fn drop_table(&mut self, namespace: &str, table_name: &str) -> Result<bool> {
            self.inner.drop_table(namespace, table_name)
        }
    }

    #[test]
    fn unpartitioned_load_writes_one_table() -> Result<()> {
        let mut store = store()?;
        let table = imoveis(&[Value::from("PA"), Value::from("MT")])?;
        let report = load(table, None, "area_imovel", "sicar", &mut store)?;

        assert!(report.is_complete());
        assert_eq!(report.rows_written(), 2);
        assert_eq!(store.list_tables("sicar")?, vec!["area_imovel".to_string()]);
        Ok(())
    }

    #[test]
    fn partitions_reconstruct_the_input() -> Result<()> {
        let mut store = store()?;
        let codes = [
            Value::from("PA"),
            Value::from("MT"),
            Value::from("PA"),
            Value::Null,
            Value::from("AM"),
            Value::from("MT"),
        ];
        let table = imoveis(&codes)?;
        let expected = table.clone();
        let report = load(table, Some("cd_uf"), "area_imovel", "sicar", &mut store)?;

        assert!(report.is_complete());
        let names: Vec<&str> = report.table_names().collect();
        assert_eq!(
            names,
            vec!["area_imovel_PA", "area_imovel_MT", "area_imovel_null", "area_imovel_AM"]
        );

        let mut rows: Vec<GeoRow> = Vec::new();
        for name in names {
            let partition = store.read_table("sicar", name)?;
            let key = partition.rows()[0].properties[1].clone();
            assert!(partition.rows().iter().all(|row| row.properties[1] == key));
            rows.extend(partition.rows().iter().cloned());
        }
        rows.sort_by_key(|row| match row.properties[0] {
            Value::Integer(id) => id,
            _ => i64::MAX,
        });
        assert_eq!(rows, expected.rows());
        Ok(())
    }

    #[test]
    fn reloading_replaces_partitions() -> Result<()> {
        let mut store = store()?;
        load(imoveis(&[Value::from("PA"), Value::from("PA")])?, Some("cd_uf"), "car", "sicar", &mut store)?;
        load(imoveis(&[Value::from("PA")])?, Some("cd_uf"), "car", "sicar", &mut store)?;
        assert_eq!(store.read_table("sicar", "car_PA")?.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_namespace_fails_fast() -> Result<()> {
        let mut store = GpkgStore::in_memory();
        let err = load(imoveis(&[Value::from("PA")])?, None, "car", "sicar", &mut store)
            .expect_err("namespace not bootstrapped");
        match err {
            PipelineError::NamespaceNotFound { namespace } => assert_eq!(namespace, "sicar"),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_crs_fails_fast() -> Result<()> {
        let mut store = store()?;
        let table = imoveis(&[Value::from("PA")])?.with_crs(None);
        let err = load(table, None, "car", "sicar", &mut store).expect_err("no CRS");
        assert!(matches!(err, PipelineError::MissingCrs { .. }));
        assert!(store.list_tables("sicar")?.is_empty());
        Ok(())
    }

    #[test]
    fn one_failed_partition_does_not_stop_the_others() -> Result<()> {
        let mut store = FlakyStore {
            inner: store()?,
            broken_table: "car_MT",
        };
        let table = imoveis(&[Value::from("PA"), Value::from("MT"), Value::from("AM")])?;
        let report = load(table, Some("cd_uf"), "car", "sicar", &mut store)?;

        assert!(!report.is_complete());
        assert_eq!(report.rows_written(), 2);
        let failed: Vec<&str> = report.failures().map(|o| o.table_name.as_str()).collect();
        assert_eq!(failed, vec!["car_MT"]);
        match &report.failures().next().expect("one failure").result {
            Err(PipelineError::PartitionWrite { table_name, source }) => {
                assert_eq!(table_name, "car_MT");
                assert!(matches!(**source, PipelineError::ReadOnly));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.list_tables("sicar")?, vec!["car_AM".to_string(), "car_PA".to_string()]);
        Ok(())
    }

    #[test]
    fn colliding_table_names_are_reported() -> Result<()> {
        let mut store = store()?;
        let table = imoveis(&[Value::from("null"), Value::Null])?;
        let report = load(table, Some("cd_uf"), "car", "sicar", &mut store)?;

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].result.is_ok());
        assert!(matches!(
            report.outcomes[1].result,
            Err(PipelineError::PartitionWrite { .. })
        ));
        assert_eq!(store.read_table("sicar", "car_null")?.len(), 1);
        Ok(())
    }

    #[test]
    fn keys_differing_only_in_case_collide() -> Result<()> {
        let mut store = store()?;
        let table = imoveis(&[Value::from("PA"), Value::from("pa"), Value::from("pa")])?;
        let report = load(table, Some("cd_uf"), "car", "sicar", &mut store)?;

        let names: Vec<&str> = report.table_names().collect();
        assert_eq!(names, vec!["car_PA", "car_pa"]);
        assert!(matches!(report.outcomes[0].result, Ok(1)));
        match &report.outcomes[1].result {
            Err(PipelineError::PartitionWrite { table_name, source }) => {
                assert_eq!(table_name, "car_pa");
                assert!(matches!(**source, PipelineError::InvalidIdentifier(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.list_tables("sicar")?, vec!["car_PA".to_string()]);
        assert_eq!(store.read_table("sicar", "car_PA")?.len(), 1);
        Ok(())
    }

    #[test]
    fn partitions_named_like_metadata_tables_are_refused() -> Result<()> {
        let mut store = store()?;
        let table = imoveis(&[Value::from("contents"), Value::from("PA")])?;
        let report = load(table, Some("cd_uf"), "gpkg", "sicar", &mut store)?;

        match &report.outcomes[0].result {
            Err(PipelineError::PartitionWrite { table_name, source }) => {
                assert_eq!(table_name, "gpkg_contents");
                assert!(matches!(**source, PipelineError::InvalidIdentifier(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(report.outcomes[1].result, Ok(1)));
        assert_eq!(store.list_tables("sicar")?, vec!["gpkg_PA".to_string()]);
        Ok(())
    }

    #[test]
    fn partition_column_must_exist() -> Result<()> {
        let mut store = store()?;
        let err = load(imoveis(&[Value::from("PA")])?, Some("uf"), "car", "sicar", &mut store)
            .expect_err("no such column");
        assert!(matches!(err, PipelineError::Schema { .. }));
        Ok(())
    }
}
