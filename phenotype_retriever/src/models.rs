// src/models.rs

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoercionError;
use crate::result_set::{FromRow, Row};

/// Whether a record comes from the mutant line or from wild-type controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleGroup {
    Experimental,
    Control,
}

impl SampleGroup {
    pub const ALL: [SampleGroup; 2] = [SampleGroup::Experimental, SampleGroup::Control];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleGroup::Experimental => "experimental",
            SampleGroup::Control => "control",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "experimental" => Some(SampleGroup::Experimental),
            "control" => Some(SampleGroup::Control),
            _ => None,
        }
    }
}

impl fmt::Display for SampleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub const ALL: [Sex; 2] = [Sex::Male, Sex::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "male" => Some(Sex::Male),
            "female" => Some(Sex::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which fetch a merged record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    ExperimentalBatch,
    ControlBatch,
}

impl Provenance {
    /// The sample group every record of this batch must carry.
    pub fn expected_group(&self) -> SampleGroup {
        match self {
            Provenance::ExperimentalBatch => SampleGroup::Experimental,
            Provenance::ControlBatch => SampleGroup::Control,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ExperimentalBatch => "experimental_batch",
            Provenance::ControlBatch => "control_batch",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated gene symbol. `symbol` is the input as typed; `normalized` is
/// the same symbol with surrounding whitespace removed and its case kept,
/// and is what gets sent to the service. Comparison ignores case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneQuery {
    pub symbol: String,
    pub normalized: String,
}

/// How a symbol reported by the service relates to the one that was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolMatch {
    Exact,
    CaseOnly,
    Different,
}

impl GeneQuery {
    pub fn compare(&self, reported: &str) -> SymbolMatch {
        let reported = reported.trim();
        if reported == self.normalized {
            SymbolMatch::Exact
        } else if reported.to_lowercase() == self.normalized.to_lowercase() {
            SymbolMatch::CaseOnly
        } else {
            SymbolMatch::Different
        }
    }
}

/// One row of a genotype-phenotype response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhenotypeRecord {
    pub marker_symbol: Option<String>,
    pub allele_symbol: String,
    pub mp_term_name: String,
    pub parameter_stable_id: String,
    pub colony_id: String,
    pub percentage_change: Option<f64>,
}

impl PhenotypeRecord {
    /// Continuous phenotypes carry an effect size; categorical and no-effect
    /// rows do not and cannot be analysed here.
    pub fn is_continuous(&self) -> bool {
        self.percentage_change.is_some()
    }
}

impl FromRow for PhenotypeRecord {
    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "allele_symbol",
        "mp_term_name",
        "parameter_stable_id",
        "colony_id",
    ];

    fn from_row(row: &Row<'_>) -> Result<Self, CoercionError> {
        Ok(PhenotypeRecord {
            marker_symbol: row.optional("marker_symbol").map(str::to_string),
            allele_symbol: row.required("allele_symbol")?.to_string(),
            mp_term_name: row.required("mp_term_name")?.to_string(),
            parameter_stable_id: row.required("parameter_stable_id")?.to_string(),
            colony_id: row.required("colony_id")?.to_string(),
            percentage_change: row.optional_f64("percentage_change")?,
        })
    }
}

/// The assay and colony a user picked for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhenotypeSelection {
    pub parameter_stable_id: String,
    pub colony_id: String,
}

impl fmt::Display for PhenotypeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter_stable_id={}, colony_id={}",
            self.parameter_stable_id, self.colony_id
        )
    }
}

/// One row of an experiment response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub biological_sample_group: SampleGroup,
    pub sex: Sex,
    pub data_point: f64,
    pub date_of_experiment: NaiveDate,
    pub metadata_group: String,
    pub phenotyping_center: String,
    pub strain_accession_id: String,
}

impl FromRow for ExperimentRecord {
    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "biological_sample_group",
        "sex",
        "data_point",
        "date_of_experiment",
        "metadata_group",
        "phenotyping_center",
        "strain_accession_id",
    ];

    fn from_row(row: &Row<'_>) -> Result<Self, CoercionError> {
        let group = row.required("biological_sample_group")?;
        let sex = row.required("sex")?;
        let date = row.required("date_of_experiment")?;

        Ok(ExperimentRecord {
            biological_sample_group: SampleGroup::parse(group)
                .ok_or_else(|| row.error("biological_sample_group", group))?,
            sex: Sex::parse(sex).ok_or_else(|| row.error("sex", sex))?,
            data_point: row.required_f64("data_point")?,
            date_of_experiment: parse_experiment_date(date)
                .ok_or_else(|| row.error("date_of_experiment", date))?,
            metadata_group: row.required("metadata_group")?.to_string(),
            phenotyping_center: row.required("phenotyping_center")?.to_string(),
            strain_accession_id: row.required("strain_accession_id")?.to_string(),
        })
    }
}

/// The service reports timestamps (`2013-05-28T00:00:00Z`); plain dates are
/// accepted as well.
pub fn parse_experiment_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Keys that make a control cohort comparable to an experimental one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlCriteria {
    pub parameter_stable_id: String,
    pub metadata_group: String,
    pub phenotyping_center: String,
    pub strain_accession_id: String,
}

impl ControlCriteria {
    pub fn matches(&self, record: &ExperimentRecord) -> bool {
        record.metadata_group == self.metadata_group
            && record.phenotyping_center == self.phenotyping_center
            && record.strain_accession_id == self.strain_accession_id
    }
}

impl fmt::Display for ControlCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter_stable_id={}, metadata_group={}, phenotyping_center={}, strain_accession_id={}",
            self.parameter_stable_id,
            self.metadata_group,
            self.phenotyping_center,
            self.strain_accession_id
        )
    }
}

/// An experimental batch together with the control batch it is compared to.
#[derive(Debug, Clone)]
pub struct CohortPair {
    pub selection: PhenotypeSelection,
    pub criteria: ControlCriteria,
    pub experimental: Vec<ExperimentRecord>,
    pub control: Vec<ExperimentRecord>,
    /// Rows excluded upstream by coercion across both fetches.
    pub dropped_rows: usize,
}
