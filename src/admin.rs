//! Admin API — CRUD over routes. Every write triggers a route cache
//! refresh so the proxy pipeline picks up the change on its next request.
//!
//! Handlers extract [`AdminState`] rather than the full [`crate::AppState`]
//! (via axum's `FromRef`) — the admin surface only ever touches the store
//! and the cache, and narrowing the extractor keeps these handlers testable
//! without standing up Redis or Kafka connections.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::cache::RouteCache;
use crate::error::AppError;
use crate::store::{NewRoute, Route, RouteStore, RouteUpdate, StoreError};
use crate::AppState;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<RouteStore>,
    pub cache: Arc<RouteCache>,
}

impl FromRef<Arc<AppState>> for AdminState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        Self { store: state.store.clone(), cache: state.cache.clone() }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicatePath(path) => AppError::duplicate_path(&path),
            StoreError::NotFound(id) => AppError::not_found(&format!("route {id}")),
            StoreError::Invalid(msg) => AppError::bad_request(msg),
            StoreError::Sql(e) => AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRouteBody {
    pub path: String,
    pub target_url: String,
    pub capacity: Option<i64>,
    pub refill_rate_per_second: Option<i64>,
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(body): Json<CreateRouteBody>,
) -> Result<(StatusCode, Json<Route>), AppError> {
    let new_route = NewRoute {
        path: body.path,
        target_url: body.target_url,
        capacity: body.capacity,
        refill_rate_per_second: body.refill_rate_per_second,
    };
    new_route.validate().map_err(AppError::bad_request)?;

    let route = state.store.insert(new_route).await?;
    refresh_cache_and_warn(&state.cache).await;
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn list_routes(State(state): State<AdminState>) -> Result<Json<Vec<Route>>, AppError> {
    Ok(Json(state.store.find_all().await?))
}

pub async fn get_route(State(state): State<AdminState>, Path(id): Path<i64>) -> Result<Json<Route>, AppError> {
    let route = state.store.find_by_id(id).await?.ok_or_else(|| AppError::not_found(&format!("route {id}")))?;
    Ok(Json(route))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRouteBody {
    pub path: Option<String>,
    pub target_url: Option<String>,
    #[serde(default, deserialize_with = "crate::store::double_option")]
    pub capacity: Option<Option<i64>>,
    #[serde(default, deserialize_with = "crate::store::double_option")]
    pub refill_rate_per_second: Option<Option<i64>>,
}

pub async fn update_route(
    State(state): State<AdminState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateRouteBody>,
) -> Result<Json<Route>, AppError> {
    let fields = RouteUpdate {
        path: body.path,
        target_url: body.target_url,
        capacity: body.capacity,
        refill_rate_per_second: body.refill_rate_per_second,
    };
    let route = state.store.update(id, fields).await?;
    refresh_cache_and_warn(&state.cache).await;
    Ok(Json(route))
}

pub async fn delete_route(State(state): State<AdminState>, Path(id): Path<i64>) -> Result<StatusCode, AppError> {
    let existed = state.store.delete(id).await?;
    if !existed {
        return Err(AppError::not_found(&format!("route {id}")));
    }
    refresh_cache_and_warn(&state.cache).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_cache_and_warn(cache: &RouteCache) {
    if let Err(err) = cache.refresh().await {
        tracing::warn!(error = %err, "route cache refresh after admin write failed, serving stale routes until the next refresh");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn admin_state() -> AdminState {
        let store = Arc::new(RouteStore::open_in_memory().await.unwrap());
        let cache = Arc::new(RouteCache::new(store.clone()));
        cache.refresh().await.unwrap();
        AdminState { store, cache }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let state = admin_state().await;
        let body = CreateRouteBody { path: "/a".into(), target_url: "http://a".into(), capacity: None, refill_rate_per_second: None };
        let (status, Json(created)) = create_route(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(fetched) = get_route(State(state), Path(created.id)).await.unwrap();
        assert_eq!(fetched.path, "/a");
    }

    #[tokio::test]
    async fn create_duplicate_path_yields_409() {
        let state = admin_state().await;
        let body = || CreateRouteBody { path: "/a".into(), target_url: "http://a".into(), capacity: None, refill_rate_per_second: None };
        create_route(State(state.clone()), Json(body())).await.unwrap();
        let err = create_route(State(state), Json(body())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_rejects_invalid_body() {
        let state = admin_state().await;
        let body = CreateRouteBody { path: String::new(), target_url: "http://a".into(), capacity: None, refill_rate_per_second: None };
        let err = create_route(State(state), Json(body)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_route_yields_404() {
        let state = admin_state().await;
        let err = get_route(State(state), Path(999)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_triggers_cache_refresh() {
        let state = admin_state().await;
        let body = CreateRouteBody { path: "/a".into(), target_url: "http://a".into(), capacity: None, refill_rate_per_second: None };
        let (_, Json(created)) = create_route(State(state.clone()), Json(body)).await.unwrap();
        assert!(state.cache.find_match("/a").await.is_some());

        delete_route(State(state.clone()), Path(created.id)).await.unwrap();
        assert!(state.cache.find_match("/a").await.is_none());
    }

    #[tokio::test]
    async fn update_changes_target_url_and_refreshes_cache() {
        let state = admin_state().await;
        let body = CreateRouteBody { path: "/a".into(), target_url: "http://a".into(), capacity: None, refill_rate_per_second: None };
        let (_, Json(created)) = create_route(State(state.clone()), Json(body)).await.unwrap();

        let update = UpdateRouteBody { target_url: Some("http://b".into()), ..Default::default() };
        let Json(updated) = update_route(State(state.clone()), Path(created.id), Json(update)).await.unwrap();
        assert_eq!(updated.target_url, "http://b");

        let matched = state.cache.find_match("/a").await.unwrap();
        assert_eq!(matched.target_url, "http://b");
    }
}
