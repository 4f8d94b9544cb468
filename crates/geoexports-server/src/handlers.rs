use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    response::IntoResponse,
};
use geoexports_core::{ExportDefinition, ExportId, Licence};
use geoexports_filter::{FilterParams, translate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::auth::Authorization;
use crate::descriptor::ResolveError;
use crate::error::ApiError;
use crate::executor::{ExecutorError, PageRequest, PageResult};
use crate::jobs::{ExportRequest, InvalidRequest, SubmitRejection};
use crate::middleware::RequesterIdentity;
use crate::state::AppState;
use crate::swagger::SwaggerError;

const IN_PROGRESS_MESSAGE: &str = "The Process is in progress ! You will receive an email shortly";

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// An export as listed to a requester.
#[derive(Debug, Serialize)]
pub struct ExportSummary {
    pub id: ExportId,
    pub label: String,
    pub description: Option<String>,
    pub public: bool,
    pub geometry_field: Option<String>,
    pub geometry_srid: Option<i32>,
    pub licence: Option<Licence>,
}

impl From<ExportDefinition> for ExportSummary {
    fn from(definition: ExportDefinition) -> Self {
        Self {
            id: definition.id,
            label: definition.label,
            description: definition.description,
            public: definition.public,
            geometry_field: definition.geometry_field,
            geometry_srid: definition.geometry_srid,
            licence: definition.licence,
        }
    }
}

/// `GET /`: exports the requester may read.
pub async fn list_exports(
    State(state): State<AppState>,
    RequesterIdentity(identity): RequesterIdentity,
) -> Result<Json<Vec<ExportSummary>>, ApiError> {
    let exports = state
        .gate
        .allowed_exports(identity)
        .await
        .map_err(|e| ApiError::logged(e, state.debug()))?;
    Ok(Json(exports.into_iter().map(ExportSummary::from).collect()))
}

/// `GET /api/{id_export}`: one filtered page of an export.
#[instrument(skip_all, fields(id_export = %id_export, id_role = identity.id_role))]
pub async fn read_export(
    State(state): State<AppState>,
    Path(id_export): Path<String>,
    RequesterIdentity(identity): RequesterIdentity,
    RawQuery(query): RawQuery,
) -> Result<Json<PageResult>, ApiError> {
    let not_found = || ApiError::NotFound(format!("no export with id {id_export}"));
    let export_id: ExportId = id_export.parse().map_err(|_| not_found())?;

    let definition = match state.gate.authorize(export_id, identity).await {
        Ok(Authorization::Allowed(definition)) => definition,
        Ok(Authorization::Denied) => return Err(ApiError::Forbidden),
        Ok(Authorization::UnknownExport) => return Err(not_found()),
        Err(e) => return Err(ApiError::logged(e, state.debug())),
    };

    let descriptor = state
        .resolver
        .describe(&definition)
        .await
        .map_err(|e| match e {
            ResolveError::NotFound(_) => not_found(),
            err @ ResolveError::EmptyDataset { .. } => ApiError::EmptyDataset(err.to_string()),
            ResolveError::Storage(e) => ApiError::logged(e, state.debug()),
        })?;

    let params = FilterParams::from_query_string(query.as_deref().unwrap_or_default());
    let filters = translate(&params, &descriptor.columns)?;
    let exports = &state.config.exports;
    let page = PageRequest::from_params(&params, exports.default_limit, exports.max_limit);

    let result = state
        .executor
        .run(&descriptor, &filters, &page)
        .await
        .map_err(|e| match e {
            err @ ExecutorError::EmptyDataset { .. } => ApiError::EmptyDataset(err.to_string()),
            ExecutorError::Storage(e) => ApiError::logged(e, state.debug()),
        })?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
struct ExportBody {
    #[serde(default)]
    email: Option<String>,
}

/// `POST /{id_export}/{format}`: start a background export.
///
/// Filters come from the query string. The optional JSON body may carry an
/// `email` replacing the one on file.
#[instrument(skip_all, fields(id_export = %id_export, format = %format, id_role = identity.id_role))]
pub async fn create_export(
    State(state): State<AppState>,
    Path((id_export, format)): Path<(String, String)>,
    RequesterIdentity(identity): RequesterIdentity,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let export_id: ExportId = id_export
        .parse()
        .map_err(|_| ApiError::InvalidExport("Invalid export or export not found".into()))?;
    let body: ExportBody = if body.iter().all(u8::is_ascii_whitespace) {
        ExportBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid request body: {e}")))?
    };

    let request = ExportRequest {
        export_id,
        format,
        filters: FilterParams::from_query_string(query.as_deref().unwrap_or_default()),
        identity,
        email: body.email,
    };

    match state.jobs.submit(request).await {
        Ok(accepted) => {
            info!(job_id = %accepted.job_id, export_id, "export queued");
            Ok(Json(json!({
                "api_success": "in_progress",
                "message": IN_PROGRESS_MESSAGE,
            })))
        }
        Err(rejection) => Err(rejection_to_api_error(rejection, state.debug())),
    }
}

fn rejection_to_api_error(rejection: SubmitRejection, debug: bool) -> ApiError {
    match rejection {
        SubmitRejection::InvalidRequest(InvalidRequest::Filter(e)) => e.into(),
        SubmitRejection::InvalidRequest(_) => {
            ApiError::InvalidExport("Invalid export or export not found".into())
        }
        SubmitRejection::Forbidden => ApiError::Forbidden,
        SubmitRejection::NoUser(_) => ApiError::NoUser,
        SubmitRejection::NoEmail(_) => ApiError::NoEmail,
        SubmitRejection::Internal(message) => ApiError::logged(message, debug),
    }
}

/// `GET /swagger-resources/`
pub async fn swagger_root(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .swagger
        .root_document()
        .await
        .map(Json)
        .map_err(|e| swagger_error(e, state.debug()))
}

/// `GET /swagger-resources/{id_export}`
pub async fn swagger_export(
    State(state): State<AppState>,
    Path(id_export): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let export_id: ExportId = id_export
        .parse()
        .map_err(|_| ApiError::NotFound("no export with this id".into()))?;
    state
        .swagger
        .document(export_id)
        .await
        .map(Json)
        .map_err(|e| swagger_error(e, state.debug()))
}

fn swagger_error(err: SwaggerError, debug: bool) -> ApiError {
    match err {
        SwaggerError::NotFound(_) => ApiError::NotFound("no export with this id".into()),
        other => ApiError::logged(other, debug),
    }
}
