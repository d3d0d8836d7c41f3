pub mod api_handler;
pub mod cohort_resolver;
pub mod config;
pub mod dataset_merger;
pub mod error;
pub mod fetcher;
pub mod helper_functions;
pub mod models;
pub mod pipeline;
pub mod plots;
pub mod query_builder;
pub mod result_set;
pub mod selection;
pub mod session;
pub mod summary;

#[cfg(test)]
mod test_support;

pub use api_handler::{ApiHandler, CancelToken, DataService, TransportError};
pub use config::{CohortPolicy, Config};
pub use error::{PipelineError, Result};
pub use pipeline::{Analysis, Pipeline};
pub use session::{Choice, Session};
