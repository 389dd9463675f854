use crate::data::{CoinView, PageResponse, Pagination, Snapshot};
use crate::persistence::SnapshotStore;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 12;

struct AppState<P: SnapshotStore> {
    store: Arc<P>,
}

impl<P: SnapshotStore> Clone for AppState<P> {
    fn clone(&self) -> Self {
        AppState {
            store: self.store.clone(),
        }
    }
}

pub fn run_web_server(
    cancellation_token: CancellationToken,
    store: Arc<impl SnapshotStore + 'static>,
    host: String,
    port: u32,
) -> JoinHandle<()> {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/crypto", get(get_crypto_handler))
        .route("/api/crypto/latest", get(latest_snapshot_handler))
        .with_state(AppState { store })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let url = format!("{host}:{port}");

    tokio::spawn(async move {
        serve(cancellation_token, router, url).await;
    })
}

async fn health_handler(State(state): State<AppState<impl SnapshotStore>>) -> Json<serde_json::Value> {
    let last_update = state.store.get().await.map(|s| s.collected_at);
    Json(json!({ "status": "ok", "lastUpdate": last_update }))
}

/// Paginated view over the latest snapshot. Never errors: malformed query
/// parameters fall back to the defaults, an out-of-range page yields an
/// empty slice with correct metadata, and "no data collected yet" is an
/// empty response with `totalItems` 0, which callers can tell apart from a
/// query beyond the last page.
async fn get_crypto_handler(
    State(state): State<AppState<impl SnapshotStore>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<PageResponse> {
    let page = positive_param(&params, "page", DEFAULT_PAGE);
    let page_size = positive_param(&params, "pageSize", DEFAULT_PAGE_SIZE);

    let snapshot = state.store.get().await;
    Json(paginate(snapshot.as_deref(), page, page_size))
}

/// Legacy single-document form: the raw latest snapshot, or 404 before the
/// first successful extraction.
async fn latest_snapshot_handler(State(state): State<AppState<impl SnapshotStore>>) -> Response {
    match state.store.document().await {
        Some(document) => Json(document).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No data available" })),
        )
            .into_response(),
    }
}

fn positive_param(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

/// Slices the snapshot in source row order. `page` and `page_size` are both
/// at least 1 by the time they get here.
fn paginate(snapshot: Option<&Snapshot>, page: usize, page_size: usize) -> PageResponse {
    let Some(snapshot) = snapshot else {
        return PageResponse {
            data: vec![],
            pagination: Pagination {
                page,
                page_size,
                total_items: 0,
                total_pages: 0,
            },
        };
    };

    let total_items = snapshot.count;
    let total_pages = total_items.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size).min(total_items);
    let end = (start + page_size).min(total_items);

    PageResponse {
        data: snapshot.records[start..end].iter().map(CoinView::from).collect(),
        pagination: Pagination {
            page,
            page_size,
            total_items,
            total_pages,
        },
    }
}

async fn serve(cancellation_token: CancellationToken, app: Router, addr: String) {
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("could not bind {addr}: {e}");
            cancellation_token.cancel();
            return;
        }
    };
    if let Ok(local) = listener.local_addr() {
        info!("listening on {local}");
    }

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            info!("Cancellation requested, exiting...");
        }
        _ = axum::serve(listener, app) => {
            info!("Server stopped");
        }
    }
}
