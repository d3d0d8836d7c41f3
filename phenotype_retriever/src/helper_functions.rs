use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::info;

use crate::dataset_merger::MergedDataset;
use crate::error::{PipelineError, Result};
use crate::summary::GroupSummary;

/// Column layout handed to plotting and export: group labels, the date
/// axis and the numeric value.
pub fn merged_to_dataframe(dataset: &MergedDataset) -> PolarsResult<DataFrame> {
    let records = dataset.records();

    let provenance: Vec<&str> = records.iter().map(|r| r.provenance.as_str()).collect();
    let group: Vec<&str> = records
        .iter()
        .map(|r| r.record.biological_sample_group.as_str())
        .collect();
    let sex: Vec<&str> = records.iter().map(|r| r.record.sex.as_str()).collect();
    let date: Vec<String> = records
        .iter()
        .map(|r| r.record.date_of_experiment.format("%Y-%m-%d").to_string())
        .collect();
    let value: Vec<f64> = records.iter().map(|r| r.record.data_point).collect();
    let metadata: Vec<&str> = records.iter().map(|r| r.record.metadata_group.as_str()).collect();
    let center: Vec<&str> = records
        .iter()
        .map(|r| r.record.phenotyping_center.as_str())
        .collect();
    let strain: Vec<&str> = records
        .iter()
        .map(|r| r.record.strain_accession_id.as_str())
        .collect();

    DataFrame::new(vec![
        Column::new("provenance".into(), provenance),
        Column::new("biological_sample_group".into(), group),
        Column::new("sex".into(), sex),
        Column::new("date_of_experiment".into(), date),
        Column::new("data_point".into(), value),
        Column::new("metadata_group".into(), metadata),
        Column::new("phenotyping_center".into(), center),
        Column::new("strain_accession_id".into(), strain),
    ])
}

/// One row per (group, sex) combination; absent groups have a zero count
/// and null statistics.
pub fn summary_to_dataframe(summary: &GroupSummary) -> PolarsResult<DataFrame> {
    let groups = summary.groups();

    let group: Vec<&str> = groups.iter().map(|(g, _, _)| g.as_str()).collect();
    let sex: Vec<&str> = groups.iter().map(|(_, s, _)| s.as_str()).collect();
    let count: Vec<u64> = groups.iter().map(|(_, _, st)| st.count as u64).collect();
    let mean: Vec<Option<f64>> = groups.iter().map(|(_, _, st)| st.mean).collect();
    let std_dev: Vec<Option<f64>> = groups.iter().map(|(_, _, st)| st.std_dev).collect();
    let min: Vec<Option<f64>> = groups.iter().map(|(_, _, st)| st.min).collect();
    let max: Vec<Option<f64>> = groups.iter().map(|(_, _, st)| st.max).collect();

    DataFrame::new(vec![
        Column::new("biological_sample_group".into(), group),
        Column::new("sex".into(), sex),
        Column::new("count".into(), count),
        Column::new("mean".into(), mean),
        Column::new("std_dev".into(), std_dev),
        Column::new("min".into(), min),
        Column::new("max".into(), max),
    ])
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)
}

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Files written for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub dataset: PathBuf,
    pub summary: PathBuf,
}

/// Writes `<prefix>_dataset.csv` and `<prefix>_summary.csv` into `dir`.
pub fn export_results(
    dataset: &MergedDataset,
    summary: &GroupSummary,
    dir: &Path,
    prefix: &str,
) -> Result<ExportPaths> {
    let export_err = |e: PolarsError| PipelineError::Export(e.to_string());

    fs::create_dir_all(dir)
        .map_err(|e| PipelineError::Export(format!("cannot create {}: {}", dir.display(), e)))?;

    let paths = ExportPaths {
        dataset: dir.join(format!("{}_dataset.csv", prefix)),
        summary: dir.join(format!("{}_summary.csv", prefix)),
    };

    let mut df = merged_to_dataframe(dataset).map_err(export_err)?;
    dataframe_to_csv(&mut df, &paths.dataset).map_err(export_err)?;

    let mut df = summary_to_dataframe(summary).map_err(export_err)?;
    dataframe_to_csv(&mut df, &paths.summary).map_err(export_err)?;

    info!(
        "Wrote {} and {}",
        paths.dataset.display(),
        paths.summary.display()
    );
    Ok(paths)
}

/// File-name friendly form of a phenotype term or parameter id.
pub fn file_stem(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
