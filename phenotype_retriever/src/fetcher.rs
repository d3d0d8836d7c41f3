// src/fetcher.rs

use tracing::{info, warn};

use crate::api_handler::{fetch_with_retry, CancelToken, DataService, RetryPolicy, TransportError};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::query_builder::{QueryBuilder, QuerySpec};
use crate::result_set::{FromRow, RecordBatch, ResultSet};

/// Turns query specs into validated result sets.
pub struct Fetcher<'a> {
    service: &'a dyn DataService,
    config: &'a Config,
    cancel: CancelToken,
}

impl<'a> Fetcher<'a> {
    pub fn new(service: &'a dyn DataService, config: &'a Config, cancel: CancelToken) -> Self {
        Fetcher {
            service,
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn queries(&self) -> QueryBuilder {
        QueryBuilder::from_config(self.config)
    }

    /// Fetches and parses one response. A response whose row count reaches
    /// the cap is flagged as truncated, or rejected if so configured.
    pub fn fetch(&self, spec: &QuerySpec, required_columns: &[&str]) -> Result<ResultSet> {
        let policy = RetryPolicy::from_config(self.config);
        let body = fetch_with_retry(self.service, spec, &self.cancel, policy).map_err(|failure| {
            match failure.error {
                TransportError::Cancelled => PipelineError::Cancelled {
                    query: spec.to_string(),
                },
                error => PipelineError::Transport {
                    query: spec.to_string(),
                    attempts: failure.attempts,
                    message: error.to_string(),
                },
            }
        })?;

        // The body may have arrived just as the token was set; drop it.
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                query: spec.to_string(),
            });
        }

        let result = ResultSet::parse(&spec.to_string(), body.as_bytes(), required_columns)?;
        info!("{} returned {} row(s)", spec, result.returned_rows());

        if result.returned_rows() >= spec.rows() {
            if self.config.fail_on_truncation {
                return Err(PipelineError::ResultTruncated {
                    query: spec.to_string(),
                    cap: spec.rows(),
                });
            }
            warn!(
                "{} hit the row cap of {}; more data may exist than was fetched",
                spec,
                spec.rows()
            );
            return Ok(result.mark_truncated());
        }
        Ok(result)
    }

    /// Fetches and converts rows to `T`, returning the typed rows together
    /// with the total number of rows dropped during parsing and conversion.
    pub fn fetch_records<T: FromRow>(&self, spec: &QuerySpec) -> Result<(RecordBatch<T>, usize)> {
        let result = self.fetch(spec, T::REQUIRED_COLUMNS)?;
        let batch = result.records::<T>();
        let dropped = result.warning_count() + batch.dropped.len();
        Ok((batch, dropped))
    }
}
