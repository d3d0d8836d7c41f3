use std::collections::HashMap;
use std::sync::Mutex;

use phenotype_retriever::query_builder::{QueryKind, QuerySpec};
use phenotype_retriever::{CancelToken, DataService, TransportError};

pub const EXPERIMENT_HEADER: &str = "biological_sample_group,sex,data_point,date_of_experiment,metadata_group,phenotyping_center,strain_accession_id";

pub const PHENOTYPE_HEADER: &str =
    "marker_symbol,allele_symbol,mp_term_name,parameter_stable_id,colony_id,percentage_change";

pub const FBXO7_PHENOTYPES: &str = "\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,abnormal behavior,IMPC_OFD_001_001,MEBV,
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hematocrit,IMPC_HEM_002_001,MEBV,-4.51
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hematocrit,IMPC_HEM_002_001,MEBW,-2.87
";

/// One CSV line per (group, sex, value, date, metadata_group, center, strain).
pub fn experiment_body(rows: &[(&str, &str, f64, &str, &str, &str, &str)]) -> String {
    let mut body = format!("{}\n", EXPERIMENT_HEADER);
    for (group, sex, value, date, metadata, center, strain) in rows {
        body.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            group, sex, value, date, metadata, center, strain
        ));
    }
    body
}

/// Canned CSV bodies per query kind; records every request.
#[derive(Default)]
pub struct CannedService {
    bodies: HashMap<QueryKind, String>,
    seen: Mutex<Vec<QuerySpec>>,
}

impl CannedService {
    pub fn with(mut self, kind: QueryKind, body: impl Into<String>) -> Self {
        self.bodies.insert(kind, body.into());
        self
    }

    pub fn seen(&self) -> Vec<QuerySpec> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_of(&self, kind: QueryKind) -> Vec<QuerySpec> {
        self.seen().into_iter().filter(|s| s.kind() == kind).collect()
    }
}

impl DataService for CannedService {
    fn fetch(&self, spec: &QuerySpec, _cancel: &CancelToken) -> Result<String, TransportError> {
        self.seen.lock().unwrap().push(spec.clone());
        self.bodies
            .get(&spec.kind())
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 400,
                body: "undefined field".to_string(),
                retry_after: None,
            })
    }
}
