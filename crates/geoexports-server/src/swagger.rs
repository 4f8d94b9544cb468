//! Swagger 2.0 documents for the export read API.
//!
//! Per-export documents are generated from the dataset descriptor unless
//! the override directory holds `api_specification_<id>.json`; the root
//! document can likewise be replaced by `main_swagger_doc.json`.

use std::path::{Path, PathBuf};

use geoexports_core::{ExportDefinition, ExportId};
use geoexports_filter::{ParameterDescriptor, parameters_for};
use geoexports_storage::{DynMetadataStore, StorageError};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::descriptor::{DatasetResolver, ResolveError};

const ROOT_OVERRIDE: &str = "main_swagger_doc.json";

#[derive(Debug, Error)]
pub enum SwaggerError {
    #[error("no export with id {0}")]
    NotFound(ExportId),

    #[error("cannot read {}: {message}", path.display())]
    Override { path: PathBuf, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SwaggerError {
    fn from_resolve(export_id: ExportId, err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) | ResolveError::EmptyDataset { .. } => {
                Self::NotFound(export_id)
            }
            ResolveError::Storage(e) => Self::Storage(e),
        }
    }
}

/// Where the API is served, as advertised in the documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub host: String,
    pub base_path: String,
    pub schemes: Vec<String>,
}

impl ApiEndpoint {
    /// Split a configured endpoint such as `https://geo.example.org/api/exports`.
    ///
    /// Without a scheme the value is read as `host/path` and both `https`
    /// and `http` are advertised.
    pub fn parse(endpoint: &str) -> Self {
        let endpoint = endpoint.trim();
        if let Ok(url) = Url::parse(endpoint)
            && let Some(host) = url.host_str()
        {
            let host = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            return Self {
                host,
                base_path: normalize_path(url.path()),
                schemes: vec![url.scheme().to_string()],
            };
        }
        let (host, path) = endpoint.split_once('/').unwrap_or((endpoint, ""));
        Self {
            host: host.to_string(),
            base_path: normalize_path(path),
            schemes: vec!["https".to_string(), "http".to_string()],
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Clone)]
pub struct SwaggerGenerator {
    metadata: DynMetadataStore,
    resolver: DatasetResolver,
    endpoint: ApiEndpoint,
    default_limit: u32,
    override_dir: Option<PathBuf>,
}

impl SwaggerGenerator {
    pub fn new(
        metadata: DynMetadataStore,
        resolver: DatasetResolver,
        endpoint: ApiEndpoint,
        default_limit: u32,
    ) -> Self {
        Self {
            metadata,
            resolver,
            endpoint,
            default_limit,
            override_dir: None,
        }
    }

    #[must_use]
    pub fn with_override_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.override_dir = dir;
        self
    }

    /// Query parameters accepted by `GET /api/{export_id}`.
    pub async fn generate(&self, export_id: ExportId) -> Result<Vec<ParameterDescriptor>, SwaggerError> {
        let descriptor = self
            .resolver
            .resolve(export_id)
            .await
            .map_err(|e| SwaggerError::from_resolve(export_id, e))?;
        Ok(parameters_for(&descriptor, self.default_limit))
    }

    /// The per-export document, or its override file.
    #[instrument(skip(self))]
    pub async fn document(&self, export_id: ExportId) -> Result<Value, SwaggerError> {
        let definition = self
            .resolver
            .definition(export_id)
            .await
            .map_err(|e| SwaggerError::from_resolve(export_id, e))?;

        if let Some(document) = self
            .read_override(&format!("api_specification_{export_id}.json"))
            .await?
        {
            return Ok(document);
        }

        let parameters = self.generate(export_id).await?;
        let mut operation = path_operation(&definition);
        operation["parameters"] = json!(parameters);
        operation["responses"] = json!({
            "200": {
                "description": "One page of export rows",
                "schema": page_schema(),
            },
            "400": {"description": "Malformed filter value"},
            "403": {"description": "Not Allowed"},
            "404": {"description": "Unknown export or empty dataset"},
        });

        let mut info = json!({
            "title": definition.label,
            "description": definition.description.clone().unwrap_or_default(),
            "version": "1.0.0",
        });
        if let Some(licence) = &definition.licence {
            info["license"] = json!({"name": licence.name, "url": licence.url});
        }

        let mut paths = serde_json::Map::new();
        paths.insert(export_path(export_id), json!({ "get": operation }));
        let mut document = self.skeleton(info);
        document["paths"] = Value::Object(paths);
        Ok(document)
    }

    /// The top-level document listing every export path.
    pub async fn root_document(&self) -> Result<Value, SwaggerError> {
        if let Some(document) = self.read_override(ROOT_OVERRIDE).await? {
            return Ok(document);
        }
        let mut paths = serde_json::Map::new();
        for definition in self.metadata.list_exports().await? {
            paths.insert(
                export_path(definition.id),
                json!({ "get": path_operation(&definition) }),
            );
        }
        let mut document = self.skeleton(json!({
            "title": "Exports",
            "description": "Export read API. Each export documents its own filters.",
            "version": "1.0.0",
        }));
        document["paths"] = Value::Object(paths);
        Ok(document)
    }

    fn skeleton(&self, info: Value) -> Value {
        json!({
            "swagger": "2.0",
            "info": info,
            "host": self.endpoint.host,
            "basePath": self.endpoint.base_path,
            "schemes": self.endpoint.schemes,
            "produces": ["application/json"],
        })
    }

    async fn read_override(&self, file_name: &str) -> Result<Option<Value>, SwaggerError> {
        let Some(dir) = &self.override_dir else {
            return Ok(None);
        };
        let path = dir.join(file_name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(override_error(&path, e)),
        };
        debug!(path = %path.display(), "serving swagger override");
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| override_error(&path, e))
    }
}

fn override_error(path: &Path, err: impl std::fmt::Display) -> SwaggerError {
    SwaggerError::Override {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn export_path(export_id: ExportId) -> String {
    format!("/api/{export_id}")
}

fn path_operation(definition: &ExportDefinition) -> Value {
    json!({
        "summary": definition.label,
        "description": definition.description.clone().unwrap_or_default(),
        "operationId": format!("export_{}", definition.id),
        "produces": ["application/json"],
    })
}

fn page_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "total": {"type": "integer"},
            "total_filtered": {"type": "integer"},
            "page": {"type": "integer"},
            "limit": {"type": "integer"},
            "items": {"type": "array", "items": {"type": "object"}},
        }
    })
}
