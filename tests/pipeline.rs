use geo_types::{LineString, Polygon};
use geoharmonize::{
    ColumnSpec, ColumnType, GeoRow, GeoTable, GpkgStore, LabelMapping, Pipeline, PipelineConfig,
    Result, SIRGAS_2000, SIRGAS_2000_POLYCONIC, Schema, SpatialStore, Value, WGS_84,
    apply_label_mappings, bootstrap, concatenate, load, read_layer, reproject, standardize,
    validate,
};
use std::path::Path;

const REGIONS: [&str; 5] = ["norte", "nordeste", "centro_oeste", "sudeste", "sul"];

fn square(lon: f64, lat: f64, size: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (lon, lat),
            (lon + size, lat),
            (lon + size, lat + size),
            (lon, lat + size),
            (lon, lat),
        ]),
        vec![],
    )
}

fn schema() -> Schema {
    Schema::new(
        "geom",
        vec![
            ColumnSpec::new("cd_regiao", ColumnType::Integer),
            ColumnSpec::new("classe", ColumnType::Varchar),
        ],
    )
}

/// `rows` squares for region `code`, laid out along one latitude band.
fn region_layer(code: i64, rows: usize) -> Result<GeoTable> {
    let labels = ["Alta", "Muita Alta", "Muito Alta"];
    let lat = -30.0 + 5.0 * code as f64;
    let rows = (0..rows)
        .map(|i| {
            GeoRow::from_geometry(
                &square(-60.0 + i as f64 * 0.5, lat, 0.25),
                [Value::from(code), Value::from(labels[i % labels.len()])],
            )
        })
        .collect::<Result<Vec<GeoRow>>>()?;
    GeoTable::new(REGIONS[code as usize - 1], schema(), Some(SIRGAS_2000), rows)
}

/// Writes the region layers, plus a self-intersecting and a null row in `norte`,
/// into `{dir}/raw.gpkg`. Returns the number of rows that survive validation.
fn write_raw(dir: &Path) -> Result<usize> {
    let mut raw = GpkgStore::open(dir)?;
    raw.create_namespace("raw")?;
    let mut valid_rows = 0;
    for (idx, name) in REGIONS.iter().enumerate() {
        let mut table = region_layer(idx as i64 + 1, 3 + idx)?;
        valid_rows += table.len();
        if idx == 0 {
            let (table_name, schema, crs, mut rows) = table.into_parts();
            rows.push(GeoRow::null_geometry([Value::from(1_i64), Value::from("Alta")]));
            // Self-intersecting, repairable, and outside every reference boundary.
            rows.push(GeoRow::from_geometry(
                &Polygon::new(
                    LineString::from(vec![(10.0, 10.0), (12.0, 12.0), (12.0, 10.0), (10.0, 12.0), (10.0, 10.0)]),
                    vec![],
                ),
                [Value::from(1_i64), Value::from("Alta")],
            )?);
            valid_rows += 1;
            table = GeoTable::new(table_name, schema, crs, rows)?;
        }
        raw.replace_table("raw", name, &table)?;
    }

    let ufs = GeoTable::new(
        "ufs",
        Schema::new("geom", vec![ColumnSpec::new("sigla", ColumnType::Varchar)]),
        Some(WGS_84),
        vec![
            GeoRow::from_geometry(&square(-61.0, -26.0, 12.0), [Value::from("RS")])?,
            GeoRow::from_geometry(&square(-61.0, -21.0, 10.0), [Value::from("PR")])?,
        ],
    )?;
    raw.replace_table("raw", "ufs", &ufs)?;
    Ok(valid_rows)
}

#[test]
fn five_regions_load_without_losing_rows() -> Result<()> {
    let regions = (1..=5)
        .map(|code| region_layer(code, 2 + code as usize))
        .collect::<Result<Vec<GeoTable>>>()?;
    let input_rows: usize = regions.iter().map(GeoTable::len).sum();

    let table = concatenate(regions)?;
    assert_eq!(table.len(), input_rows);
    let table = reproject(table, SIRGAS_2000_POLYCONIC)?;
    assert_eq!(table.crs(), Some(SIRGAS_2000_POLYCONIC));

    let dir = tempfile::tempdir()?;
    let mut store = GpkgStore::open(dir.path())?;
    bootstrap::<&str>(&mut store, &[])?;
    let report = load(table, Some("cd_regiao"), "areas", "icmbio", &mut store)?;

    assert!(report.is_complete());
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.rows_written(), input_rows);

    let stored: usize = store
        .list_tables("icmbio")?
        .iter()
        .map(|name| store.read_table("icmbio", name).map(|table| table.len()))
        .sum::<Result<usize>>()?;
    assert_eq!(stored, input_rows);
    Ok(())
}

#[test]
fn stage_functions_compose_over_stored_layers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let valid_rows = write_raw(dir.path())?;

    let mut tables = Vec::new();
    for name in REGIONS {
        let table = read_layer(dir.path().join("raw.gpkg"), name)?;
        tables.push(standardize(validate(table)?)?);
    }
    let table = concatenate(tables)?;
    assert_eq!(table.len(), valid_rows);

    let mapping = LabelMapping::new("classe").replace("Muita Alta", "Muito Alta");
    let (table, report) = apply_label_mappings(table, &[mapping])?;
    assert!(report.total_replaced() > 0);
    assert!(
        table
            .rows()
            .iter()
            .all(|row| row.properties[1] != Value::from("Muita Alta"))
    );
    Ok(())
}

#[test]
fn configured_run_filters_reprojects_and_partitions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_raw(dir.path())?;
    let inputs = REGIONS
        .iter()
        .map(|name| format!(r#"{{ "path": "raw.gpkg", "layer": "{name}" }}"#))
        .collect::<Vec<String>>()
        .join(", ");
    let json = format!(
        r#"{{
            "label_mappings": [{{ "column": "classe", "replacements": {{ "Muita Alta": "Muito Alta" }} }}],
            "jobs": [{{
                "name": "prioridade",
                "inputs": [{inputs}],
                "filter": {{ "path": "raw.gpkg", "layer": "ufs", "predicate": "within", "keep_columns": ["sigla"] }},
                "load": {{ "namespace": "icmbio", "table_name_prefix": "areas", "partition_column": "cd_regiao" }}
            }}]
        }}"#
    );
    let config_path = dir.path().join("pipeline.json");
    std::fs::write(&config_path, json)?;

    let warehouse = dir.path().join("warehouse");
    let mut store = GpkgStore::open(&warehouse)?;
    bootstrap(&mut store, &["icmbio"])?;

    let report = Pipeline::new(PipelineConfig::from_path(&config_path)?).run(&mut store);
    assert!(report.is_success());
    let job = report.jobs[0].result.as_ref().expect("job succeeded");

    let norte = &job.inputs[0];
    assert_eq!(norte.validation.null_dropped, 1);
    assert_eq!(norte.validation.invalid_before_fix, 1);
    assert_eq!(norte.validation.invalid_after_fix, 0);

    // The reference squares cover latitudes -26 to -11, i.e. regions 1 to 3.
    let filter = job.filter.as_ref().expect("filter ran");
    assert_eq!(filter.matched_rows, 3 + 4 + 5);
    let tables: Vec<&str> = job.load.table_names().collect();
    assert_eq!(tables, vec!["areas_1", "areas_2", "areas_3"]);

    let areas_1 = store.read_table("icmbio", "areas_1")?;
    assert_eq!(areas_1.crs(), Some(SIRGAS_2000_POLYCONIC));
    let columns: Vec<&str> = areas_1
        .schema()
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(columns, vec!["cd_regiao", "classe", "sigla"]);
    assert!(
        areas_1
            .rows()
            .iter()
            .all(|row| row.properties[2] == Value::from("RS"))
    );
    Ok(())
}

#[test]
fn configured_run_reports_missing_namespace() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_raw(dir.path())?;
    let config = PipelineConfig::from_json_str(&format!(
        r#"{{ "jobs": [{{
            "name": "norte",
            "inputs": [{{ "path": "{}", "layer": "norte" }}],
            "load": {{ "namespace": "ibama", "table_name_prefix": "norte" }}
        }}] }}"#,
        dir.path().join("raw.gpkg").display()
    ))?;
    let mut store = GpkgStore::in_memory();
    let report = Pipeline::new(config).run(&mut store);
    assert!(!report.is_success());
    assert!(matches!(
        report.jobs[0].result,
        Err(geoharmonize::PipelineError::NamespaceNotFound { .. })
    ));
    Ok(())
}
