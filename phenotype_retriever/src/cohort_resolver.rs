// src/cohort_resolver.rs

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::config::CohortPolicy;
use crate::error::{PipelineError, Result};
use crate::fetcher::Fetcher;
use crate::models::{CohortPair, ControlCriteria, ExperimentRecord, PhenotypeSelection};
use crate::query_builder::CRITERIA_FIELDS;

/// Finds the control cohort comparable to an experimental batch: same
/// parameter, metadata group, phenotyping center and background strain.
pub struct CohortResolver<'a> {
    fetcher: &'a Fetcher<'a>,
    policy: CohortPolicy,
}

impl<'a> CohortResolver<'a> {
    pub fn new(fetcher: &'a Fetcher<'a>) -> Self {
        CohortResolver {
            fetcher,
            policy: fetcher.config().cohort_policy,
        }
    }

    pub fn with_policy(mut self, policy: CohortPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetches the experimental batch for `selection` and resolves its controls.
    pub fn resolve(&self, selection: &PhenotypeSelection) -> Result<CohortPair> {
        let spec = self.fetcher.queries().experiment_query(selection)?;
        let (batch, dropped) = self.fetcher.fetch_records::<ExperimentRecord>(&spec)?;
        self.resolve_batch(selection, batch.records, dropped)
    }

    /// Resolves controls for an already fetched experimental batch.
    pub fn resolve_batch(
        &self,
        selection: &PhenotypeSelection,
        experimental: Vec<ExperimentRecord>,
        dropped_rows: usize,
    ) -> Result<CohortPair> {
        let keys: Vec<[&str; 3]> = experimental.iter().map(record_keys).collect();
        let criteria = settle_criteria(selection, &keys, self.policy)?;
        info!("Control cohort for {}: {}", selection, criteria);

        let before = experimental.len();
        let experimental: Vec<ExperimentRecord> = experimental
            .into_iter()
            .filter(|r| criteria.matches(r))
            .collect();
        if experimental.len() < before {
            warn!(
                "Dropped {} experimental record(s) outside the chosen cohort",
                before - experimental.len()
            );
        }

        let spec = self.fetcher.queries().control_data_query(&criteria)?;
        let (batch, control_dropped) = self.fetcher.fetch_records::<ExperimentRecord>(&spec)?;

        let returned = batch.records.len();
        let control: Vec<ExperimentRecord> = batch
            .records
            .into_iter()
            .filter(|r| criteria.matches(r))
            .collect();
        let outside = returned - control.len();
        if outside > 0 {
            warn!(
                "{} returned {} record(s) outside the requested cohort; dropped",
                spec, outside
            );
        }

        if control.is_empty() {
            return Err(PipelineError::NoControlData { criteria });
        }
        debug!(
            "{} experimental and {} control record(s) for {}",
            experimental.len(),
            control.len(),
            selection
        );

        Ok(CohortPair {
            selection: selection.clone(),
            criteria,
            experimental,
            control,
            dropped_rows: dropped_rows + control_dropped + outside,
        })
    }

    /// Cohort keys from the projected criteria query, without fetching the
    /// experimental data points.
    pub fn lookup_criteria(&self, selection: &PhenotypeSelection) -> Result<ControlCriteria> {
        let spec = self.fetcher.queries().control_criteria_query(selection)?;
        let result = self.fetcher.fetch(&spec, &CRITERIA_FIELDS)?;

        let keys: Vec<[&str; 3]> = result
            .rows()
            .map(|row| {
                [
                    row.optional(CRITERIA_FIELDS[0]).unwrap_or(""),
                    row.optional(CRITERIA_FIELDS[1]).unwrap_or(""),
                    row.optional(CRITERIA_FIELDS[2]).unwrap_or(""),
                ]
            })
            .collect();
        settle_criteria(selection, &keys, self.policy)
    }
}

fn record_keys(record: &ExperimentRecord) -> [&str; 3] {
    [
        record.metadata_group.as_str(),
        record.phenotyping_center.as_str(),
        record.strain_accession_id.as_str(),
    ]
}

/// Derives control criteria from the cohort keys of a batch. Every key must
/// hold a single value across the batch unless the policy allows picking the
/// first one.
pub fn settle_criteria(
    selection: &PhenotypeSelection,
    keys: &[[&str; 3]],
    policy: CohortPolicy,
) -> Result<ControlCriteria> {
    let first = keys.first().ok_or_else(|| PipelineError::NoExperimentalData {
        parameter_stable_id: selection.parameter_stable_id.clone(),
        colony_id: selection.colony_id.clone(),
    })?;

    for (i, field) in CRITERIA_FIELDS.into_iter().enumerate() {
        let mut seen = HashSet::new();
        let values: Vec<String> = keys
            .iter()
            .map(|k| k[i])
            .filter(|v| seen.insert(*v))
            .map(str::to_string)
            .collect();

        if values.len() > 1 {
            match policy {
                CohortPolicy::Strict => {
                    return Err(PipelineError::AmbiguousCohort {
                        parameter_stable_id: selection.parameter_stable_id.clone(),
                        colony_id: selection.colony_id.clone(),
                        field,
                        values,
                    })
                }
                CohortPolicy::FirstMatch => warn!(
                    "{} has {} values {:?} for {}; using {}",
                    field,
                    values.len(),
                    values,
                    selection,
                    values[0]
                ),
            }
        }
    }

    Ok(ControlCriteria {
        parameter_stable_id: selection.parameter_stable_id.clone(),
        metadata_group: first[0].to_string(),
        phenotyping_center: first[1].to_string(),
        strain_accession_id: first[2].to_string(),
    })
}
