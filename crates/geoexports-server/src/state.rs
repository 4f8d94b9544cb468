use std::sync::Arc;

use axum::http::HeaderName;
use geoexports_notifications::DynNotificationSender;
use geoexports_storage::{DynMetadataStore, DynQueryBackend};

use crate::auth::AuthorizationGate;
use crate::config::AppConfig;
use crate::descriptor::DatasetResolver;
use crate::executor::QueryExecutor;
use crate::jobs::{ExportJobOrchestrator, JobSettings};
use crate::swagger::{ApiEndpoint, SwaggerGenerator};

const DEFAULT_IDENTITY_HEADER: &str = "x-id-role";

/// Shared handler state. Cloned per request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gate: AuthorizationGate,
    pub resolver: DatasetResolver,
    pub executor: QueryExecutor,
    pub jobs: ExportJobOrchestrator,
    pub swagger: SwaggerGenerator,
    identity_header: HeaderName,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        metadata: DynMetadataStore,
        backend: DynQueryBackend,
        sender: DynNotificationSender,
    ) -> Self {
        let resolver = DatasetResolver::new(metadata.clone(), backend.clone());
        let jobs = ExportJobOrchestrator::new(
            metadata.clone(),
            backend.clone(),
            sender,
            &config.exports,
            JobSettings::from(&config.jobs),
        );
        let swagger = SwaggerGenerator::new(
            metadata.clone(),
            resolver.clone(),
            ApiEndpoint::parse(&config.swagger.api_endpoint),
            config.exports.default_limit,
        )
        .with_override_dir(config.swagger.override_dir.clone());
        let identity_header = HeaderName::try_from(config.auth.identity_header.as_str())
            .unwrap_or_else(|_| HeaderName::from_static(DEFAULT_IDENTITY_HEADER));

        Self {
            gate: AuthorizationGate::new(metadata),
            executor: QueryExecutor::new(backend),
            resolver,
            jobs,
            swagger,
            identity_header,
            config: Arc::new(config),
        }
    }

    /// Header carrying the requester's role id.
    pub fn identity_header(&self) -> &HeaderName {
        &self.identity_header
    }

    pub fn debug(&self) -> bool {
        self.config.debug
    }
}
