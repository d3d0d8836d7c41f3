// src/pipeline.rs

use std::panic;
use std::thread;

use tracing::{info, warn};

use crate::api_handler::{CancelToken, DataService};
use crate::cohort_resolver::CohortResolver;
use crate::config::Config;
use crate::dataset_merger::{merge_cohort, MergedDataset};
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::models::{CohortPair, ControlCriteria, PhenotypeRecord, PhenotypeSelection};
use crate::result_set::FromRow;
use crate::selection::{validate_gene_symbol, PhenotypeCatalog};
use crate::summary::{summarize, GroupSummary};

/// Outcome of analysing one selection: the cohorts compared, the merged
/// dataset and its per-group statistics.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub pair: CohortPair,
    pub dataset: MergedDataset,
    pub summary: GroupSummary,
}

impl Analysis {
    pub fn from_pair(pair: CohortPair) -> Result<Self> {
        let dataset = merge_cohort(&pair)?;
        if dataset.dropped_rows() > 0 {
            warn!(
                "{} row(s) were dropped while fetching {}",
                dataset.dropped_rows(),
                pair.selection
            );
        }
        let summary = summarize(&dataset);
        Ok(Analysis {
            pair,
            dataset,
            summary,
        })
    }
}

/// Gene search, cohort resolution and summary against one data service.
pub struct Pipeline<S: DataService> {
    service: S,
    config: Config,
    cancel: CancelToken,
}

impl<S: DataService> Pipeline<S> {
    pub fn new(service: S, config: Config) -> Self {
        Pipeline {
            service,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Handle that stops every fetch of this pipeline when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn fetcher(&self) -> Fetcher<'_> {
        Fetcher::new(&self.service, &self.config, self.cancel.clone())
    }

    /// Validates `symbol` and fetches every phenotype call recorded for it.
    pub fn search_gene(&self, symbol: &str) -> Result<PhenotypeCatalog> {
        let gene = validate_gene_symbol(symbol)?;
        let fetcher = self.fetcher();
        let spec = fetcher.queries().genotype_phenotype_query(&gene)?;
        let result = fetcher.fetch(&spec, PhenotypeRecord::REQUIRED_COLUMNS)?;
        PhenotypeCatalog::from_result(&gene, &result)
    }

    pub fn resolve(&self, selection: &PhenotypeSelection) -> Result<CohortPair> {
        let fetcher = self.fetcher();
        CohortResolver::new(&fetcher).resolve(selection)
    }

    pub fn lookup_criteria(&self, selection: &PhenotypeSelection) -> Result<ControlCriteria> {
        let fetcher = self.fetcher();
        CohortResolver::new(&fetcher).lookup_criteria(selection)
    }

    pub fn analyse(&self, selection: &PhenotypeSelection) -> Result<Analysis> {
        let pair = self.resolve(selection)?;
        Analysis::from_pair(pair)
    }

    /// Gene search, term selection and analysis in one call.
    pub fn run(&self, symbol: &str, term: &str) -> Result<Analysis> {
        let catalog = self.search_gene(symbol)?;
        let selection = catalog.select(term)?;
        info!("Selected {} for '{}'", selection, term.trim());
        self.analyse(&selection)
    }

    /// Analyses several selections at once, one scoped thread each. Results
    /// are returned in input order and fail independently.
    pub fn prefetch(&self, selections: &[PhenotypeSelection]) -> Vec<Result<Analysis>> {
        info!("Prefetching {} selection(s)", selections.len());
        thread::scope(|scope| {
            let handles: Vec<_> = selections
                .iter()
                .map(|selection| scope.spawn(move || self.analyse(selection)))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{SampleGroup, Sex};
    use crate::query_builder::QueryKind;
    use crate::test_support::{experiment_csv, MockService, EXPERIMENT_HEADER, PHENOTYPE_HEADER};

    const STRAIN: &str = "MGI:2159965";

    fn fbxo7_phenotypes() -> String {
        format!(
            "{}\n\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,abnormal behavior,IMPC_OFD_001_001,MEBV,\n\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hematocrit,IMPC_HEM_002_001,MEBV,-4.51\n\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hemoglobin content,IMPC_HEM_005_001,MEBV,-3.2\n",
            PHENOTYPE_HEADER
        )
    }

    fn fbxo7_service() -> MockService {
        MockService::new()
            .respond(QueryKind::GenotypePhenotype, fbxo7_phenotypes())
            .respond_when(
                QueryKind::Experiment,
                "parameter_stable_id",
                "IMPC_HEM_002_001",
                experiment_csv(&[
                    ("experimental", "male", 44.0, "mg-hem", "WTSI", STRAIN),
                    ("experimental", "male", 46.0, "mg-hem", "WTSI", STRAIN),
                    ("experimental", "female", 41.0, "mg-hem", "WTSI", STRAIN),
                ]),
            )
            .respond_when(
                QueryKind::Experiment,
                "parameter_stable_id",
                "IMPC_HEM_005_001",
                format!("{}\n", EXPERIMENT_HEADER),
            )
            .respond(
                QueryKind::ControlData,
                experiment_csv(&[
                    ("control", "male", 48.0, "mg-hem", "WTSI", STRAIN),
                    ("control", "female", 47.0, "mg-hem", "WTSI", STRAIN),
                    ("control", "female", 45.0, "mg-hem", "WTSI", STRAIN),
                ]),
            )
    }

    fn hematocrit() -> PhenotypeSelection {
        PhenotypeSelection {
            parameter_stable_id: "IMPC_HEM_002_001".to_string(),
            colony_id: "MEBV".to_string(),
        }
    }

    #[test]
    fn fbxo7_hematocrit_end_to_end() {
        let pipeline = Pipeline::new(fbxo7_service(), Config::default());

        let catalog = pipeline.search_gene("Fbxo7").unwrap();
        let selection = catalog.select("decreased hematocrit").unwrap();
        assert_eq!(selection, hematocrit());

        let analysis = pipeline.analyse(&selection).unwrap();
        assert_eq!(analysis.dataset.len(), 6);

        let control = pipeline.service().requests_of(QueryKind::ControlData);
        assert_eq!(control.len(), 1);
        assert_eq!(control[0].value_of("metadata_group"), Some("mg-hem"));
        assert_eq!(control[0].value_of("phenotyping_center"), Some("WTSI"));
        assert_eq!(control[0].value_of("strain_accession_id"), Some(STRAIN));

        let male = analysis.summary.get(SampleGroup::Experimental, Sex::Male).unwrap();
        assert_eq!((male.count, male.mean), (2, Some(45.0)));
        let female = analysis.summary.get(SampleGroup::Control, Sex::Female).unwrap();
        assert_eq!((female.count, female.mean), (2, Some(46.0)));
    }

    #[test]
    fn queries_run_in_pipeline_order() {
        let pipeline = Pipeline::new(fbxo7_service(), Config::default());
        pipeline.run("Fbxo7", " decreased hematocrit ").unwrap();

        let kinds: Vec<QueryKind> = pipeline.service().requests().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![QueryKind::GenotypePhenotype, QueryKind::Experiment, QueryKind::ControlData]
        );
    }

    #[test]
    fn invalid_symbol_issues_no_request() {
        let pipeline = Pipeline::new(fbxo7_service(), Config::default());
        assert!(matches!(
            pipeline.search_gene("Fbxo 7"),
            Err(PipelineError::InvalidSymbol { .. })
        ));
        assert!(pipeline.service().requests().is_empty());
    }

    #[test]
    fn categorical_only_gene_reaches_an_empty_term_list() {
        let body = "\
marker_symbol,allele_symbol,mp_term_name,parameter_stable_id,colony_id
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,abnormal behavior,IMPC_OFD_001_001,MEBV
";
        let service = MockService::new().respond(QueryKind::GenotypePhenotype, body);
        let pipeline = Pipeline::new(service, Config::default());

        let catalog = pipeline.search_gene("Fbxo7").unwrap();
        assert!(catalog.selectable_terms().is_empty());
    }

    #[test]
    fn prefetch_results_are_independent() {
        let pipeline = Pipeline::new(fbxo7_service(), Config::default());
        let hemoglobin = PhenotypeSelection {
            parameter_stable_id: "IMPC_HEM_005_001".to_string(),
            colony_id: "MEBV".to_string(),
        };

        let results = pipeline.prefetch(&[hematocrit(), hemoglobin]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().dataset.len(), 6);
        assert!(matches!(
            results[1],
            Err(PipelineError::NoExperimentalData { .. })
        ));
    }

    #[test]
    fn cancelled_pipeline_stops_before_fetching() {
        let pipeline = Pipeline::new(fbxo7_service(), Config::default());
        pipeline.cancel_token().cancel();
        assert!(matches!(
            pipeline.search_gene("Fbxo7"),
            Err(PipelineError::Cancelled { .. })
        ));
    }
}
