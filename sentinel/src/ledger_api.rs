//! Read-only HTTP view of the photo ledger for the dashboard.
//!
//! | Route                         | Response                               |
//! |-------------------------------|----------------------------------------|
//! | `GET /api/photos/count`       | `{"count": N}`                         |
//! | `GET /api/photos/recent`      | newest-first photo references          |
//! | `GET /photos/<file name>`     | the still itself, from the content dir |
//!
//! Nothing here mutates the ledger.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::info;

use crate::ledger::{LedgerEntry, PhotoLedger};

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoCount {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoItem {
    pub file_name: String,
    pub url: String,
    pub captured_at: DateTime<Local>,
}

impl From<LedgerEntry> for PhotoItem {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            url: format!("/photos/{}", entry.file_name),
            file_name: entry.file_name,
            captured_at: entry.captured_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

impl RecentQuery {
    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .min(MAX_RECENT_LIMIT)
    }
}

async fn photo_count(State(ledger): State<Arc<PhotoLedger>>) -> Json<PhotoCount> {
    Json(PhotoCount {
        count: ledger.count(),
    })
}

async fn recent_photos(
    State(ledger): State<Arc<PhotoLedger>>,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<PhotoItem>> {
    let items = ledger
        .recent_existing(query.effective_limit())
        .into_iter()
        .map(PhotoItem::from)
        .collect();
    Json(items)
}

pub fn router(ledger: Arc<PhotoLedger>) -> Router {
    let photos = ServeDir::new(ledger.photos_dir());
    Router::new()
        .route("/api/photos/count", get(photo_count))
        .route("/api/photos/recent", get(recent_photos))
        .nest_service("/photos", photos)
        .with_state(ledger)
}

/// Serve the read API on `addr` until the task is dropped.
pub async fn serve(ledger: Arc<PhotoLedger>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Ledger API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(ledger)).await
}
