//! HTTP API and background export jobs.
//!
//! - `GET /` lists the exports a requester may read
//! - `GET /api/{id}` reads one filtered page of an export
//! - `POST /{id}/{format}` renders an export in the background and emails the outcome
//! - `GET /swagger-resources/{id}` documents an export's query parameters

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod state;
pub mod swagger;

pub use auth::{AccessDecision, Authorization, AuthorizationGate};
pub use config::{AppConfig, ExportsConfig, JobsConfig, PostgresStorageConfig, ServerConfig};
pub use descriptor::{DatasetResolver, ResolveError};
pub use error::ApiError;
pub use executor::{ExecutorError, PageRequest, PageResult, QueryExecutor};
pub use jobs::{
    Accepted, ExportJobOrchestrator, ExportRequest, InvalidRequest, JobError, JobSettings,
    JobState, SubmitRejection,
};
pub use observability::init_tracing;
pub use server::{GeoExportsServer, ServerBuilder, build_app};
pub use state::AppState;
pub use swagger::{ApiEndpoint, SwaggerError, SwaggerGenerator};
