//! In-memory data service and fixture builders shared by unit tests.

use std::sync::Mutex;

use crate::api_handler::{CancelToken, DataService, TransportError};
use crate::query_builder::{QueryKind, QuerySpec};

pub const EXPERIMENT_HEADER: &str = "biological_sample_group,sex,data_point,date_of_experiment,metadata_group,phenotyping_center,strain_accession_id,colony_id";

pub const PHENOTYPE_HEADER: &str =
    "marker_symbol,allele_symbol,mp_term_name,parameter_stable_id,colony_id,percentage_change";

/// (group, sex, data_point, metadata_group, phenotyping_center, strain)
pub type ExperimentRow<'a> = (&'a str, &'a str, f64, &'a str, &'a str, &'a str);

pub fn experiment_csv(rows: &[ExperimentRow<'_>]) -> String {
    let mut out = format!("{}\n", EXPERIMENT_HEADER);
    for (i, (group, sex, value, metadata, center, strain)) in rows.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},2013-05-{:02}T00:00:00Z,{},{},\"{}\",MEBV\n",
            group,
            sex,
            value,
            (i % 28) + 1,
            metadata,
            center,
            strain
        ));
    }
    out
}

struct Route {
    kind: QueryKind,
    when: Option<(&'static str, String)>,
    body: String,
}

/// Answers queries by kind (and optionally a bound field value) and records
/// every request it sees. Unrouted queries get an HTTP 404.
#[derive(Default)]
pub struct MockService {
    routes: Vec<Route>,
    requests: Mutex<Vec<QuerySpec>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, kind: QueryKind, body: impl Into<String>) -> Self {
        self.routes.push(Route {
            kind,
            when: None,
            body: body.into(),
        });
        self
    }

    pub fn respond_when(
        mut self,
        kind: QueryKind,
        field: &'static str,
        value: &str,
        body: impl Into<String>,
    ) -> Self {
        self.routes.push(Route {
            kind,
            when: Some((field, value.to_string())),
            body: body.into(),
        });
        self
    }

    pub fn requests(&self) -> Vec<QuerySpec> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, kind: QueryKind) -> Vec<QuerySpec> {
        self.requests()
            .into_iter()
            .filter(|spec| spec.kind() == kind)
            .collect()
    }
}

impl DataService for MockService {
    fn fetch(&self, spec: &QuerySpec, _cancel: &CancelToken) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(spec.clone());

        self.routes
            .iter()
            .find(|route| {
                route.kind == spec.kind()
                    && route
                        .when
                        .as_ref()
                        .map_or(true, |(field, value)| spec.value_of(field) == Some(value.as_str()))
            })
            .map(|route| route.body.clone())
            .ok_or_else(|| TransportError::Status {
                status: 404,
                body: format!("no route for {}", spec),
                retry_after: None,
            })
    }
}
