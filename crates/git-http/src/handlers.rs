//! Axum wiring for the three Smart HTTP endpoints, at the repository root
//! and one group level deep, optionally nested under a route prefix.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::advertise::handle_info_refs;
use crate::receive::handle_receive_pack;
use crate::state::GitHttp;
use crate::upload::handle_upload_pack;

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

pub fn router(state: GitHttp) -> Router {
    let routes = Router::new()
        .route("/{repo}/info/refs", get(info_refs_root))
        .route("/{group}/{repo}/info/refs", get(info_refs_group))
        .route("/{repo}/git-upload-pack", post(upload_pack_root))
        .route("/{group}/{repo}/git-upload-pack", post(upload_pack_group))
        .route("/{repo}/git-receive-pack", post(receive_pack_root))
        .route("/{group}/{repo}/git-receive-pack", post(receive_pack_group))
        .with_state(state.clone());

    let prefix = state.options().route_prefix.trim_matches('/').to_string();
    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&format!("/{prefix}"), routes)
    }
}

// GET /:repo(.git)?/info/refs?service=git-upload-pack|git-receive-pack
async fn info_refs_root(
    State(state): State<GitHttp>,
    Path(repo): Path<String>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Response {
    handle_info_refs(&state, &headers, &repo, query.service.as_deref()).await
}

// GET /:group/:repo(.git)?/info/refs
async fn info_refs_group(
    State(state): State<GitHttp>,
    Path((group, repo)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Response {
    let route = format!("{group}/{repo}");
    handle_info_refs(&state, &headers, &route, query.service.as_deref()).await
}

// POST /:repo(.git)?/git-upload-pack
async fn upload_pack_root(
    State(state): State<GitHttp>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    handle_upload_pack(&state, headers, &repo, body).await
}

// POST /:group/:repo(.git)?/git-upload-pack
async fn upload_pack_group(
    State(state): State<GitHttp>,
    Path((group, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let route = format!("{group}/{repo}");
    handle_upload_pack(&state, headers, &route, body).await
}

// POST /:repo(.git)?/git-receive-pack
async fn receive_pack_root(
    State(state): State<GitHttp>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    handle_receive_pack(&state, headers, &repo, body).await
}

// POST /:group/:repo(.git)?/git-receive-pack
async fn receive_pack_group(
    State(state): State<GitHttp>,
    Path((group, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let route = format!("{group}/{repo}");
    handle_receive_pack(&state, headers, &route, body).await
}
