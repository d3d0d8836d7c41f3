// src/query_builder.rs

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{ControlCriteria, GeneQuery, PhenotypeSelection, SampleGroup};

pub const DEFAULT_BULK_ROWS: usize = 500;
pub const DEFAULT_CONTROL_ROWS: usize = 100;

/// Columns needed to key a control cohort.
pub const CRITERIA_FIELDS: [&str; 3] = ["metadata_group", "phenotyping_center", "strain_accession_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    GenotypePhenotype,
    Experiment,
    ControlCriteria,
    ControlData,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::GenotypePhenotype => "genotype-phenotype query",
            QueryKind::Experiment => "experiment query",
            QueryKind::ControlCriteria => "control criteria query",
            QueryKind::ControlData => "control data query",
        };
        f.write_str(name)
    }
}

/// The Solr core a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolrCore {
    GenotypePhenotype,
    Experiment,
}

impl SolrCore {
    pub fn path(&self) -> &'static str {
        match self {
            SolrCore::GenotypePhenotype => "genotype-phenotype",
            SolrCore::Experiment => "experiment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
        }
    }
}

/// A single `field:value` term. The value is stored raw and only escaped
/// when the request parameters are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldFilter {
    pub field: &'static str,
    pub value: String,
}

impl FieldFilter {
    pub fn render(&self) -> String {
        format!("{}:{}", self.field, escape_value(&self.value))
    }
}

/// Backslash-escapes whitespace and Solr query syntax characters.
pub fn escape_value(value: &str) -> String {
    static SPECIAL: OnceLock<Regex> = OnceLock::new();
    let re = SPECIAL.get_or_init(|| {
        Regex::new(r#"[\s+\-!(){}\[\]^"~*?:\\/&|]"#).expect("static Solr escape pattern")
    });
    re.replace_all(value, r"\$0").into_owned()
}

/// A structured request against the data service: conjunctive `q` terms,
/// `fq` filter terms, an optional field projection, a row cap and a format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpec {
    kind: QueryKind,
    core: SolrCore,
    query: Vec<FieldFilter>,
    filters: Vec<FieldFilter>,
    fields: Vec<&'static str>,
    rows: usize,
    format: OutputFormat,
}

impl QuerySpec {
    fn new(kind: QueryKind, core: SolrCore, rows: usize) -> Self {
        QuerySpec {
            kind,
            core,
            query: Vec::new(),
            filters: Vec::new(),
            fields: Vec::new(),
            rows,
            format: OutputFormat::Csv,
        }
    }

    fn with_query(mut self, field: &'static str, value: String) -> Self {
        self.query.push(FieldFilter { field, value });
        self
    }

    fn with_filter(mut self, field: &'static str, value: String) -> Self {
        self.filters.push(FieldFilter { field, value });
        self
    }

    fn with_fields(mut self, fields: &[&'static str]) -> Self {
        self.fields.extend_from_slice(fields);
        self
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn core(&self) -> SolrCore {
        self.core
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn query_terms(&self) -> &[FieldFilter] {
        &self.query
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    /// Raw value bound to `field` in either the query or the filters.
    pub fn value_of(&self, field: &str) -> Option<&str> {
        self.query
            .iter()
            .chain(self.filters.iter())
            .find(|f| f.field == field)
            .map(|f| f.value.as_str())
    }

    /// Request parameters in the order the service expects them. Values are
    /// escaped here; URL encoding is the transport's job.
    pub fn params(&self) -> Vec<(String, String)> {
        let q = self
            .query
            .iter()
            .map(FieldFilter::render)
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut params = vec![("q".to_string(), q)];
        for filter in &self.filters {
            params.push(("fq".to_string(), filter.render()));
        }
        if !self.fields.is_empty() {
            params.push(("fl".to_string(), self.fields.join(",")));
        }
        params.push(("rows".to_string(), self.rows.to_string()));
        params.push(("wt".to_string(), self.format.as_str().to_string()));
        params
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self
            .query
            .iter()
            .chain(self.filters.iter())
            .map(|t| format!("{}={}", t.field, t.value))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} ({})", self.kind, terms)
    }
}

/// Builds the four queries of the pipeline with configurable row caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBuilder {
    bulk_rows: usize,
    control_rows: usize,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        QueryBuilder::new(DEFAULT_BULK_ROWS, DEFAULT_CONTROL_ROWS)
    }
}

impl QueryBuilder {
    pub fn new(bulk_rows: usize, control_rows: usize) -> Self {
        QueryBuilder { bulk_rows, control_rows }
    }

    pub fn from_config(config: &Config) -> Self {
        QueryBuilder::new(config.bulk_rows, config.control_rows)
    }

    /// All phenotype calls recorded for a gene.
    pub fn genotype_phenotype_query(&self, gene: &GeneQuery) -> Result<QuerySpec> {
        let kind = QueryKind::GenotypePhenotype;
        Ok(QuerySpec::new(kind, SolrCore::GenotypePhenotype, self.bulk_rows)
            .with_query("marker_symbol", require(kind, "marker_symbol", &gene.normalized)?))
    }

    /// Mutant data points for the selected assay and colony.
    pub fn experiment_query(&self, selection: &PhenotypeSelection) -> Result<QuerySpec> {
        let kind = QueryKind::Experiment;
        let (parameter, colony) = selection_terms(kind, selection)?;
        Ok(QuerySpec::new(kind, SolrCore::Experiment, self.bulk_rows)
            .with_query("parameter_stable_id", parameter)
            .with_query("colony_id", colony)
            .with_filter("biological_sample_group", SampleGroup::Experimental.as_str().to_string()))
    }

    /// The experiment query projected onto the cohort-keying columns.
    pub fn control_criteria_query(&self, selection: &PhenotypeSelection) -> Result<QuerySpec> {
        let kind = QueryKind::ControlCriteria;
        let (parameter, colony) = selection_terms(kind, selection)?;
        Ok(QuerySpec::new(kind, SolrCore::Experiment, self.bulk_rows)
            .with_query("parameter_stable_id", parameter)
            .with_query("colony_id", colony)
            .with_filter("biological_sample_group", SampleGroup::Experimental.as_str().to_string())
            .with_fields(&CRITERIA_FIELDS))
    }

    /// Wild-type data points run under the same cohort keys.
    pub fn control_data_query(&self, criteria: &ControlCriteria) -> Result<QuerySpec> {
        let kind = QueryKind::ControlData;
        Ok(QuerySpec::new(kind, SolrCore::Experiment, self.control_rows)
            .with_query(
                "parameter_stable_id",
                require(kind, "parameter_stable_id", &criteria.parameter_stable_id)?,
            )
            .with_filter("metadata_group", require(kind, "metadata_group", &criteria.metadata_group)?)
            .with_filter(
                "phenotyping_center",
                require(kind, "phenotyping_center", &criteria.phenotyping_center)?,
            )
            .with_filter(
                "strain_accession_id",
                require(kind, "strain_accession_id", &criteria.strain_accession_id)?,
            )
            .with_filter("biological_sample_group", SampleGroup::Control.as_str().to_string()))
    }
}

fn selection_terms(kind: QueryKind, selection: &PhenotypeSelection) -> Result<(String, String)> {
    Ok((
        require(kind, "parameter_stable_id", &selection.parameter_stable_id)?,
        require(kind, "colony_id", &selection.colony_id)?,
    ))
}

fn require(query: QueryKind, field: &'static str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(PipelineError::InvalidQueryInput { query, field })
    } else {
        Ok(value.to_string())
    }
}
