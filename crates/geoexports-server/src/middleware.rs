use axum::{
    body::Body,
    extract::{FromRef, FromRequestParts},
    http::{HeaderName, HeaderValue, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use geoexports_core::{Identity, RoleId};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

// Request ID middleware: adds X-Request-Id header if missing and propagates it to the response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    // Read back by the trace layer's span.
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Role id forwarded by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequesterIdentity(pub Identity);

impl<S> FromRequestParts<S> for RequesterIdentity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let header = state.identity_header().as_str();
        let value = parts
            .headers
            .get(header)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {header} header")))?;
        let id_role = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<RoleId>().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {header} header")))?;
        Ok(Self(Identity::new(id_role)))
    }
}
