// src/selection.rs

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::models::{GeneQuery, PhenotypeRecord, PhenotypeSelection, SymbolMatch};
use crate::result_set::ResultSet;

/// Checks a gene symbol typed by the user: non-empty, no whitespace,
/// alphanumeric only.
pub fn validate_gene_symbol(input: &str) -> Result<GeneQuery> {
    let invalid = |reason: &str| PipelineError::InvalidSymbol {
        symbol: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("the symbol is empty"));
    }
    if input.chars().any(char::is_whitespace) {
        return Err(invalid("no spaces allowed"));
    }
    if !input.chars().all(char::is_alphanumeric) {
        return Err(invalid("alphanumeric characters only"));
    }

    Ok(GeneQuery {
        symbol: input.to_string(),
        normalized: input.trim().to_string(),
    })
}

/// The phenotype calls found for one gene, from which the user picks a term.
#[derive(Debug, Clone)]
pub struct PhenotypeCatalog {
    gene: GeneQuery,
    records: Vec<PhenotypeRecord>,
    dropped_rows: usize,
}

impl PhenotypeCatalog {
    pub fn from_result(gene: &GeneQuery, result: &ResultSet) -> Result<Self> {
        let batch = result.records::<PhenotypeRecord>();
        if batch.records.is_empty() {
            return Err(PipelineError::NoPhenotypeData {
                symbol: gene.symbol.clone(),
            });
        }

        let mut reported = HashSet::new();
        for symbol in batch.records.iter().filter_map(|r| r.marker_symbol.as_deref()) {
            if !reported.insert(symbol) {
                continue;
            }
            match gene.compare(symbol) {
                SymbolMatch::Exact => {}
                SymbolMatch::CaseOnly => warn!(
                    "IMPC reports gene {} for requested symbol {}; check the case of the symbol",
                    symbol, gene.symbol
                ),
                SymbolMatch::Different => warn!(
                    "IMPC returned rows for gene {} when asked for {}",
                    symbol, gene.symbol
                ),
            }
        }

        let catalog = PhenotypeCatalog {
            gene: gene.clone(),
            records: batch.records,
            dropped_rows: result.warning_count() + batch.dropped.len(),
        };
        info!(
            "IMPC found allele(s) {:?} for {}",
            catalog.alleles(),
            catalog.gene.symbol
        );
        Ok(catalog)
    }

    pub fn gene(&self) -> &GeneQuery {
        &self.gene
    }

    pub fn records(&self) -> &[PhenotypeRecord] {
        &self.records
    }

    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn alleles(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.allele_symbol.as_str())
            .filter(|a| seen.insert(*a))
            .collect()
    }

    /// Terms with a continuous effect size, in first-seen order.
    pub fn selectable_terms(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| r.is_continuous())
            .map(|r| r.mp_term_name.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Resolves a typed term to the assay and colony of its first continuous
    /// row. Input is matched exactly after trimming surrounding whitespace.
    pub fn select(&self, input: &str) -> Result<PhenotypeSelection> {
        let term = input.trim();
        self.records
            .iter()
            .filter(|r| r.is_continuous())
            .find(|r| r.mp_term_name == term)
            .map(|r| PhenotypeSelection {
                parameter_stable_id: r.parameter_stable_id.clone(),
                colony_id: r.colony_id.clone(),
            })
            .ok_or_else(|| PipelineError::InvalidSelection {
                input: input.to_string(),
                offered: self.selectable_terms().into_iter().map(str::to_string).collect(),
            })
    }

    /// One selection per selectable term.
    pub fn selections(&self) -> Vec<(String, PhenotypeSelection)> {
        self.selectable_terms()
            .into_iter()
            .filter_map(|term| self.select(term).ok().map(|s| (term.to_string(), s)))
            .collect()
    }
}
