//! HTTP surface over the [`ResourceDispatcher`].
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /resources/:cluster/:kind` | list, all namespaces |
//! | `GET /resources/:cluster/:kind/:namespace` | list in namespace |
//! | `POST /resources/:cluster/:kind` | create |
//! | `GET/PUT/PATCH/DELETE /resources/:cluster/:kind/:namespace/:name` | get, update, patch, delete |
//! | `PUT /nodes/:cluster/:node/{cordon,uncordon,drain,online}` | node maintenance |
//! | `PUT/DELETE /nodes/:cluster/:node/labels` | label, unlabel |
//! | `POST /nodes/:cluster/offline` | take `name/ip` nodes offline |
//! | `GET /clusters` | ready and unready clusters |
//! | `ANY /clusters/:cluster/proxy/*path` | raw proxy to the cluster server |
//!
//! Cluster-scoped objects use `_` as the namespace segment. The caller is
//! identified by the `User-ID` and `Org-ID` headers. Errors are rendered as
//! `{code, message}` with the status from [`KubegateError::status`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatch::ResourceDispatcher;
use crate::gateway::Gateway;
use crate::remote::{ORG_HEADER, USER_HEADER};
use crate::types::{Resource, ResourceRequest};
use crate::{KubegateError, Result};

/// Namespace path segment for cluster-scoped objects.
pub const CLUSTER_SCOPE: &str = "_";

const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<ResourceDispatcher>,
    max_body_bytes: usize,
}

/// A [`KubegateError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub KubegateError);

impl From<KubegateError> for ApiError {
    fn from(err: KubegateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    label_selector: Option<String>,
    field_selector: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn request(headers: &HeaderMap, cluster: String, kind: String) -> ResourceRequest {
    ResourceRequest::new(cluster, kind).user(
        header_value(headers, USER_HEADER),
        header_value(headers, ORG_HEADER),
    )
}

fn namespace(segment: String) -> String {
    if segment == CLUSTER_SCOPE {
        String::new()
    } else {
        segment
    }
}

fn node_request(headers: &HeaderMap, cluster: String, node: String) -> ResourceRequest {
    request(headers, cluster, crate::dispatch::NODES.to_string()).name(node)
}

fn json_list(list: &[Resource]) -> ApiResult<Response> {
    let body = serde_json::to_vec(list).map_err(KubegateError::from)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Build the router with the default request body limit.
pub fn router(dispatcher: Arc<ResourceDispatcher>) -> Router {
    router_with_limit(dispatcher, DEFAULT_MAX_BODY_BYTES)
}

/// Build the router, reading at most `max_body_bytes` of proxied bodies.
pub fn router_with_limit(dispatcher: Arc<ResourceDispatcher>, max_body_bytes: usize) -> Router {
    let state = AppState {
        dispatcher,
        max_body_bytes,
    };
    Router::new()
        .route("/resources/:cluster/:kind", get(list_all).post(create))
        .route("/resources/:cluster/:kind/:namespace", get(list_namespaced))
        .route(
            "/resources/:cluster/:kind/:namespace/:name",
            get(get_one).put(update).patch(patch).delete(delete_one),
        )
        .route("/nodes/:cluster/offline", post(offline).patch(offline))
        .route("/nodes/:cluster/:node/cordon", put(cordon).patch(cordon))
        .route("/nodes/:cluster/:node/uncordon", put(uncordon).patch(uncordon))
        .route("/nodes/:cluster/:node/drain", put(drain).patch(drain))
        .route("/nodes/:cluster/:node/online", put(online).patch(online))
        .route("/nodes/:cluster/:node/labels", put(label).patch(label).delete(unlabel))
        .route("/clusters", get(clusters))
        .route("/clusters/:cluster/proxy/*path", any(proxy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `gateway` on its configured address until its token is cancelled.
pub async fn serve(gateway: &Gateway) -> Result<()> {
    let address = &gateway.config().server.address;
    let app = router_with_limit(
        Arc::clone(gateway.dispatcher()),
        gateway.config().server.max_body_bytes,
    );
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| KubegateError::Configuration(format!("failed to bind {address}: {e}")))?;
    info!(address = %address, "kubegate listening");

    let cancel = gateway.cancel_token().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| KubegateError::Internal(format!("server error: {e}")))
}

async fn list_all(
    State(state): State<AppState>,
    Path((cluster, kind)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut req = request(&headers, cluster, kind);
    req.label_selector = query.label_selector;
    req.field_selector = query.field_selector;
    let list = state.dispatcher.list(&req).await?;
    json_list(&list)
}

async fn list_namespaced(
    State(state): State<AppState>,
    Path((cluster, kind, ns)): Path<(String, String, String)>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut req = request(&headers, cluster, kind).namespace(namespace(ns));
    req.label_selector = query.label_selector;
    req.field_selector = query.field_selector;
    let list = state.dispatcher.list(&req).await?;
    json_list(&list)
}

async fn create(
    State(state): State<AppState>,
    Path((cluster, kind)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<Resource>)> {
    let req = request(&headers, cluster, kind).obj(body);
    let created = state.dispatcher.create(&req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_one(
    State(state): State<AppState>,
    Path((cluster, kind, ns, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Resource>> {
    let req = request(&headers, cluster, kind)
        .namespace(namespace(ns))
        .name(name);
    Ok(Json(state.dispatcher.get(&req).await?))
}

async fn update(
    State(state): State<AppState>,
    Path((cluster, kind, ns, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<Resource>> {
    let req = request(&headers, cluster, kind)
        .namespace(namespace(ns))
        .name(name)
        .obj(body);
    Ok(Json(state.dispatcher.update(&req).await?))
}

async fn patch(
    State(state): State<AppState>,
    Path((cluster, kind, ns, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<Resource>> {
    let req = request(&headers, cluster, kind)
        .namespace(namespace(ns))
        .name(name)
        .obj(body);
    Ok(Json(state.dispatcher.patch(&req).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    Path((cluster, kind, ns, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let req = request(&headers, cluster, kind)
        .namespace(namespace(ns))
        .name(name);
    state.dispatcher.delete(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cordon(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .cordon_node(&node_request(&headers, cluster, node))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn uncordon(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .uncordon_node(&node_request(&headers, cluster, node))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn drain(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .drain_node(&node_request(&headers, cluster, node))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn online(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .online_node(&node_request(&headers, cluster, node))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn label(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
    Json(labels): Json<BTreeMap<String, String>>,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .label_node(&node_request(&headers, cluster, node), &labels)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlabel(
    State(state): State<AppState>,
    Path((cluster, node)): Path<(String, String)>,
    headers: HeaderMap,
    Json(labels): Json<Vec<String>>,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .unlabel_node(&node_request(&headers, cluster, node), &labels)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn offline(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    headers: HeaderMap,
    Json(node_ids): Json<Vec<String>>,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .offline_node(
            &header_value(&headers, USER_HEADER),
            &header_value(&headers, ORG_HEADER),
            &cluster,
            &node_ids,
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn clusters(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (ready, unready) = state.dispatcher.registry().list_ready_and_unready();
    Json(serde_json::json!({ "ready": ready, "unready": unready }))
}

async fn proxy(
    State(state): State<AppState>,
    Path((cluster, path)): Path<(String, String)>,
    req: Request,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            return ApiError(KubegateError::InvalidParameter(format!(
                "failed to read request body: {e}"
            )))
            .into_response();
        }
    };

    let path = path.trim_start_matches('/');
    let target = match parts.uri.query() {
        Some(query) => format!("/{path}?{query}"),
        None => format!("/{path}"),
    };
    parts.uri = match target.parse() {
        Ok(uri) => uri,
        Err(e) => {
            return ApiError(KubegateError::InvalidParameter(format!(
                "invalid proxy path {target}: {e}"
            )))
            .into_response();
        }
    };

    state
        .dispatcher
        .registry()
        .serve_http(&cluster, http::Request::from_parts(parts, body))
        .await
        .map(Body::from)
        .into_response()
}
