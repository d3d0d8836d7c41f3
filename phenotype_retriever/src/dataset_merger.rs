// src/dataset_merger.rs

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{CohortPair, ExperimentRecord, Provenance};

/// A record of the merged dataset and the batch it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub provenance: Provenance,
    pub record: ExperimentRecord,
}

/// Experimental records followed by control records, in fetch order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedDataset {
    records: Vec<MergedRecord>,
    dropped_rows: usize,
}

impl MergedDataset {
    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows excluded upstream by coercion before the merge.
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn from_batch(&self, provenance: Provenance) -> impl Iterator<Item = &ExperimentRecord> {
        self.records
            .iter()
            .filter(move |r| r.provenance == provenance)
            .map(|r| &r.record)
    }
}

/// Tags each batch with its provenance and checks that every record's sample
/// group agrees with the batch it came from.
pub fn merge(experimental: &[ExperimentRecord], control: &[ExperimentRecord]) -> Result<MergedDataset> {
    let tagged = experimental
        .iter()
        .map(|r| (Provenance::ExperimentalBatch, r))
        .chain(control.iter().map(|r| (Provenance::ControlBatch, r)));

    let mut records = Vec::with_capacity(experimental.len() + control.len());
    for (index, (provenance, record)) in tagged.enumerate() {
        if record.biological_sample_group != provenance.expected_group() {
            return Err(PipelineError::ProvenanceMismatch {
                index,
                provenance,
                found: record.biological_sample_group,
            });
        }
        records.push(MergedRecord {
            provenance,
            record: record.clone(),
        });
    }

    debug!(
        "Merged {} experimental and {} control record(s)",
        experimental.len(),
        control.len()
    );
    Ok(MergedDataset {
        records,
        dropped_rows: 0,
    })
}

/// Merges a resolved cohort, carrying its coercion drop count along.
pub fn merge_cohort(pair: &CohortPair) -> Result<MergedDataset> {
    let mut dataset = merge(&pair.experimental, &pair.control)?;
    dataset.dropped_rows = pair.dropped_rows;
    Ok(dataset)
}
