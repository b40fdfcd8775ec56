//! Concatenation of same-subject layers and categorical label clean-up.

use crate::error::{PipelineError, Result};
use crate::table::{GeoRow, GeoTable, Schema};
use crate::types::{ColumnSpec, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Stack `tables` in the given order.
///
/// Columns are the union of all inputs in first-seen order; a row from an
/// input lacking a column gets `Value::Null` there. Names are matched
/// ignoring ASCII case and keep their first-seen spelling. Rows are not
/// deduplicated. The output takes its name and geometry column name from
/// the first input.
pub fn concatenate(tables: Vec<GeoTable>) -> Result<GeoTable> {
    let Some(first) = tables.first() else {
        return Err(PipelineError::EmptyInput);
    };
    let name = first.name().to_string();
    let crs = first.crs();
    let geometry_column = first.schema().geometry_column.clone();

    let mut columns: Vec<ColumnSpec> = Vec::new();
    for table in &tables {
        if table.crs() != crs {
            return Err(PipelineError::crs_mismatch(
                &name,
                crs,
                table.name(),
                table.crs(),
            ));
        }
        if table.schema().geometry_column.is_some() != geometry_column.is_some() {
            return Err(PipelineError::schema(table.name(), "geometry"));
        }
        for spec in &table.schema().columns {
            match columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&spec.name))
            {
                Some(existing) if existing.column_type != spec.column_type => {
                    return Err(PipelineError::SchemaConflict {
                        column: spec.name.clone(),
                        left: existing.column_type,
                        right: spec.column_type,
                    });
                }
                Some(_) => {}
                None => columns.push(spec.clone()),
            }
        }
    }

    let inputs = tables.len();
    let total: usize = tables.iter().map(GeoTable::len).sum();
    let mut rows = Vec::with_capacity(total);
    for table in tables {
        let (table_name, schema, _, table_rows) = table.into_parts();
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|spec| {
                schema
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(&spec.name))
            })
            .collect();
        debug!(table = %table_name, rows = table_rows.len(), "appending");
        for row in table_rows {
            let properties = positions
                .iter()
                .map(|pos| pos.map_or(Value::Null, |i| row.properties[i].clone()))
                .collect();
            rows.push(GeoRow::new(row.geometry, properties));
        }
    }

    info!(table = %name, inputs, rows = rows.len(), columns = columns.len(), "concatenated");
    let schema = Schema {
        geometry_column,
        columns,
    };
    Ok(GeoTable::from_parts(name, schema, crs, rows))
}

/// Replace known-bad labels of one categorical column with canonical ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pub column: String,
    /// Bad label to canonical label.
    pub replacements: BTreeMap<String, String>,
}

impl LabelMapping {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            replacements: BTreeMap::new(),
        }
    }

    pub fn replace(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.insert(from.into(), to.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HarmonizeReport {
    /// Number of replaced values per column.
    pub replaced: BTreeMap<String, usize>,
}

impl HarmonizeReport {
    pub fn total_replaced(&self) -> usize {
        self.replaced.values().sum()
    }
}

/// Apply every mapping in order. Only `Text` values are compared.
///
/// All mapped columns are checked before any value is touched.
pub fn apply_label_mappings(
    table: GeoTable,
    mappings: &[LabelMapping],
) -> Result<(GeoTable, HarmonizeReport)> {
    let indices = mappings
        .iter()
        .map(|mapping| table.require_column(&mapping.column))
        .collect::<Result<Vec<usize>>>()?;

    let (name, schema, crs, mut rows) = table.into_parts();
    let mut report = HarmonizeReport::default();
    for (mapping, &idx) in mappings.iter().zip(&indices) {
        let mut replaced = 0;
        for row in &mut rows {
            if let Value::Text(label) = &mut row.properties[idx]
                && let Some(canonical) = mapping.replacements.get(label.as_str())
            {
                *label = canonical.clone();
                replaced += 1;
            }
        }
        info!(table = %name, column = %mapping.column, replaced, "normalized labels");
        *report.replaced.entry(mapping.column.clone()).or_default() += replaced;
    }
    Ok((GeoTable::from_parts(name, schema, crs, rows), report))
}

/// Distinct values of `column` with their counts, in order of first appearance.
pub fn value_counts(table: &GeoTable, column: &str) -> Result<Vec<(Value, usize)>> {
    table.value_counts(column)
}

#[cfg(test)]
mod tests {
    use super::{LabelMapping, apply_label_mappings, concatenate, value_counts};
    use crate::Result;
    use crate::crs::{SIRGAS_2000, SIRGAS_2000_POLYCONIC};
    use crate::error::PipelineError;
    use crate::table::{GeoRow, GeoTable, Schema};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use geo::Point;

    fn region(name: &str, columns: Vec<ColumnSpec>, rows: Vec<Vec<Value>>) -> Result<GeoTable> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, props)| GeoRow::from_geometry(&Point::new(i as f64, 0.0), props))
            .collect::<Result<Vec<GeoRow>>>()?;
        GeoTable::new(name, Schema::new("geom", columns), Some(SIRGAS_2000), rows)
    }

    fn classes() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("classe", ColumnType::Varchar),
            ColumnSpec::new("area", ColumnType::Double),
        ]
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = concatenate(vec![]).expect_err("nothing to concatenate");
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[test]
    fn preserves_order_and_fills_missing_columns() -> Result<()> {
        let norte = region(
            "norte",
            classes(),
            vec![
                vec![Value::from("Alta"), Value::from(1.5)],
                vec![Value::from("Baixa"), Value::from(2.0)],
            ],
        )?;
        let sul = region(
            "sul",
            vec![
                ColumnSpec::new("classe", ColumnType::Varchar),
                ColumnSpec::new("uf", ColumnType::Varchar),
            ],
            vec![vec![Value::from("Alta"), Value::from("RS")]],
        )?;

        let all = concatenate(vec![norte, sul])?;
        assert_eq!(all.name(), "norte");
        assert_eq!(all.len(), 3);
        let names: Vec<&str> = all.schema().columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["classe", "area", "uf"]);
        assert_eq!(
            all.rows()[2].properties,
            vec![Value::from("Alta"), Value::Null, Value::from("RS")]
        );
        assert_eq!(all.rows()[0].properties[2], Value::Null);
        Ok(())
    }

    #[test]
    fn conflicting_column_types_are_rejected() -> Result<()> {
        let a = region("a", classes(), vec![])?;
        let b = region("b", vec![ColumnSpec::new("area", ColumnType::Varchar)], vec![])?;
        let err = concatenate(vec![a, b]).expect_err("area is Double and Varchar");
        match err {
            PipelineError::SchemaConflict { column, left, right } => {
                assert_eq!(column, "area");
                assert_eq!(left, ColumnType::Double);
                assert_eq!(right, ColumnType::Varchar);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn columns_differing_in_case_are_merged() -> Result<()> {
        let a = region("a", classes(), vec![vec![Value::from("Alta"), Value::from(1.0)]])?;
        let b = region(
            "b",
            vec![ColumnSpec::new("Area", ColumnType::Double)],
            vec![vec![Value::from(2.0)]],
        )?;
        let all = concatenate(vec![a, b])?;
        let names: Vec<&str> = all.schema().columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["classe", "area"]);
        assert_eq!(all.rows()[1].properties, vec![Value::Null, Value::from(2.0)]);

        let c = region("c", vec![ColumnSpec::new("AREA", ColumnType::Integer)], vec![])?;
        let err = concatenate(vec![region("a", classes(), vec![])?, c])
            .expect_err("area is Double and Integer");
        match err {
            PipelineError::SchemaConflict { column, .. } => assert_eq!(column, "AREA"),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn mixed_crs_is_rejected() -> Result<()> {
        let a = region("a", classes(), vec![])?;
        let b = region("b", classes(), vec![])?.with_crs(Some(SIRGAS_2000_POLYCONIC));
        let err = concatenate(vec![a, b]).expect_err("different CRS");
        assert!(matches!(err, PipelineError::CrsMismatch { .. }));
        Ok(())
    }

    #[test]
    fn label_mapping_moves_counts_to_canonical_label() -> Result<()> {
        let a = region(
            "a",
            classes(),
            vec![
                vec![Value::from("Muita Alta"), Value::Null],
                vec![Value::from("Muito Alta"), Value::Null],
            ],
        )?;
        let b = region(
            "b",
            classes(),
            vec![
                vec![Value::from("Muita Alta"), Value::Null],
                vec![Value::from("Baixa"), Value::Null],
            ],
        )?;
        let all = concatenate(vec![a, b])?;
        let mapping = LabelMapping::new("classe").replace("Muita Alta", "Muito Alta");
        let (all, report) = apply_label_mappings(all, &[mapping])?;

        assert_eq!(report.total_replaced(), 2);
        let counts = value_counts(&all, "classe")?;
        assert_eq!(
            counts,
            vec![(Value::from("Muito Alta"), 3), (Value::from("Baixa"), 1)]
        );
        Ok(())
    }

    #[test]
    fn label_mapping_on_missing_column_is_a_schema_error() -> Result<()> {
        let table = region("a", classes(), vec![vec![Value::from("Alta"), Value::Null]])?;
        let mapping = LabelMapping::new("categoria").replace("x", "y");
        let err = apply_label_mappings(table, &[mapping]).expect_err("unknown column");
        match err {
            PipelineError::Schema { table, attribute } => {
                assert_eq!(table, "a");
                assert_eq!(attribute, "categoria");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn label_mappings_deserialize_from_json() -> Result<()> {
        let mapping: LabelMapping = serde_json::from_str(
            r#"{"column": "classe", "replacements": {"Muita Alta": "Muito Alta"}}"#,
        )?;
        assert_eq!(mapping, LabelMapping::new("classe").replace("Muita Alta", "Muito Alta"));
        Ok(())
    }
}
