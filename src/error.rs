//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] wraps [`anyhow::Error`] together with the [`StatusCode`] it
//! must render, and converts itself into a JSON `{"error": "..."}` response
//! via [`IntoResponse`]. Handlers return `Result<T, AppError>`; the named
//! constructors below (`not_found`, `duplicate_path`, `bad_request`) pick the
//! status code the error-handling contract requires, and each concrete error
//! type a handler can produce (e.g. [`crate::store::StoreError`]) gets its
//! own explicit `From` impl mapping it to the right one — there is no
//! blanket `From<E>` here, since a single impl can only ever pick one status
//! code and different error types need different ones.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn get_route(
//!     State(state): State<Arc<AppState>>,
//!     Path(id): Path<i64>,
//! ) -> Result<Json<Route>, AppError> {
//!     let route = state.store.find_by_id(id).await?.ok_or_else(|| AppError::not_found("route"))?;
//!     Ok(Json(route))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Wraps [`anyhow::Error`] plus the HTTP status it should render.
///
/// Built either via [`AppError::new`] with an explicit status, one of the
/// named constructors below, or a concrete per-error-type `From` impl (e.g.
/// `From<crate::store::StoreError>` in `admin.rs`) that picks the right
/// status for each variant.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    inner: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self { status, inner: err.into() }
    }

    /// `404` — no record exists for the requested id or path.
    pub fn not_found(what: &str) -> Self {
        Self { status: StatusCode::NOT_FOUND, inner: anyhow::anyhow!("{what} not found") }
    }

    /// `409` — a unique constraint (route path) was violated.
    pub fn duplicate_path(path: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            inner: anyhow::anyhow!("a route for path `{path}` already exists"),
        }
    }

    /// `400` — the request body failed validation.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, inner: anyhow::anyhow!(msg.into()) }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.inner, status = %self.status, "handler error");
        } else {
            tracing::warn!(error = %self.inner, status = %self.status, "handler error");
        }
        (self.status, Json(json!({ "error": self.inner.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_renders_404_with_json_error_body() {
        let resp = AppError::not_found("route").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "route not found");
    }

    #[tokio::test]
    async fn duplicate_path_renders_409() {
        let resp = AppError::duplicate_path("/a").into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn new_sets_the_given_status() {
        let err = AppError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::anyhow!("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
