//! HTTP surface.
//!
//! Endpoints:
//! - `POST /finalize`: assemble and publish a completed beat
//! - `POST /upload`: pin a raw segment
//! - `GET /beats/:beat_id`: current ledger record
//! - `GET /health`
//!
//! Clients are built once by [`Services::from_settings`]. A server whose
//! configuration is incomplete still starts, but every work endpoint answers
//! 500 without touching the store or the ledger.

pub mod error;

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::adapters::{ContentStore, EthereumLedger, LedgerReader, LedgerWriter, PinataStore};
use crate::config::Settings;
use crate::core::{
    retry, upload_name_hint, AdmissionPolicy, FinalizationOrchestrator, RetryPolicy,
    SegmentAdmission,
};
use crate::domain::{Beat, BeatStatus, ContentId, Contributor, FinalizationResult, FinalizeClaim};
use crate::error::{Error, Result};

/// Clients and engines shared by all requests
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ContentStore>,
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub orchestrator: Arc<FinalizationOrchestrator>,
    pub admission: Arc<SegmentAdmission>,
    pub retry: RetryPolicy,
}

impl Services {
    /// Wire services from explicit clients
    pub fn new(
        store: Arc<dyn ContentStore>,
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
        retry: RetryPolicy,
        admission: AdmissionPolicy,
    ) -> Self {
        let orchestrator =
            FinalizationOrchestrator::new(store.clone(), reader.clone(), retry.clone())
                .with_expected_format(admission.expected_format);
        let admission =
            SegmentAdmission::new(store.clone(), reader.clone(), admission, retry.clone());

        Self {
            store,
            reader,
            writer,
            orchestrator: Arc::new(orchestrator),
            admission: Arc::new(admission),
            retry,
        }
    }

    /// Build Pinata and Ethereum clients from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = store_from_settings(settings)?;
        let ledger = Arc::new(ledger_from_settings(settings)?);

        Ok(Self::new(
            Arc::new(store),
            ledger.clone(),
            ledger,
            settings.retry.clone(),
            settings.admission.clone(),
        ))
    }
}

/// Pinata client from settings
pub fn store_from_settings(settings: &Settings) -> Result<PinataStore> {
    let credentials = settings.pinata_credentials()?.clone();
    Ok(PinataStore::with_endpoints(
        credentials,
        settings.store.api_url.clone(),
        settings.store.gateway_url.clone(),
    ))
}

/// Ledger client from settings
pub fn ledger_from_settings(settings: &Settings) -> Result<EthereumLedger> {
    let (rpc_url, contract) = settings.ledger_endpoint()?;
    EthereumLedger::new(rpc_url, contract)
        .map_err(|e| Error::Configuration(format!("invalid contract address: {}", e)))
}

/// Shared handler state
#[derive(Clone)]
pub enum AppState {
    Ready(Arc<Services>),
    /// Startup configuration error, reported by every work endpoint
    Misconfigured(Error),
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> Self {
        match Services::from_settings(settings) {
            Ok(services) => AppState::Ready(Arc::new(services)),
            Err(e) => {
                warn!(error = %e, "Server is misconfigured; work endpoints will fail");
                AppState::Misconfigured(e)
            }
        }
    }

    fn services(&self) -> Result<&Arc<Services>> {
        match self {
            AppState::Ready(services) => Ok(services),
            AppState::Misconfigured(e) => Err(e.clone()),
        }
    }
}

impl From<Services> for AppState {
    fn from(services: Services) -> Self {
        AppState::Ready(Arc::new(services))
    }
}

/// Build the HTTP router
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes));

    Router::new()
        .route("/finalize", post(finalize))
        .route("/upload", post(upload))
        .route("/beats/:beat_id", get(beat_details))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware)
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::from_settings(settings);
    let app = router(state, settings.max_upload_bytes);

    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

/// `beatId` as a JSON number or a decimal string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BeatIdInput {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest {
    beat_id: BeatIdInput,
    #[serde(rename = "segmentCIDs")]
    segment_cids: Vec<String>,
    contributors: Vec<String>,
}

fn invalid_body(detail: impl std::fmt::Display) -> Error {
    Error::Validation(format!("Invalid request body: {}", detail))
}

fn invalid_field(err: Error) -> Error {
    match err {
        Error::Validation(detail) => invalid_body(detail),
        other => other,
    }
}

/// Parse and shape-check a finalize request body
fn parse_finalize_request(body: &[u8]) -> Result<FinalizeClaim> {
    let request: FinalizeRequest = serde_json::from_slice(body).map_err(invalid_body)?;

    let beat_id = match request.beat_id {
        BeatIdInput::Number(id) => id,
        BeatIdInput::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid_body(format!("beatId '{}' is not an integer", text)))?,
    };

    let segment_cids = request
        .segment_cids
        .into_iter()
        .map(ContentId::new)
        .collect::<Result<Vec<_>>>()
        .map_err(invalid_field)?;

    let contributors = request
        .contributors
        .into_iter()
        .map(Contributor::new)
        .collect::<Result<Vec<_>>>()
        .map_err(invalid_field)?;

    FinalizeClaim::new(beat_id, segment_cids, contributors).map_err(invalid_field)
}

async fn finalize(State(state): State<AppState>, body: Bytes) -> Result<Json<FinalizationResult>> {
    let services = state.services()?.clone();
    let claim = parse_finalize_request(&body)?;

    // detached so a client disconnect cannot abort in-flight store writes
    let orchestrator = services.orchestrator.clone();
    let result = tokio::spawn(async move { orchestrator.finalize_claimed(&claim).await })
        .await
        .map_err(|e| Error::Internal(format!("finalization task failed: {}", e)))??;

    Ok(Json(result))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub cid: ContentId,
}

async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let services = state.services()?;
    let mut multipart = multipart.map_err(|_| Error::validation("No file provided."))?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::validation(format!("Failed to read file: {}", e)))?;
            file = Some(bytes);
            break;
        }
    }

    let bytes = file
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::validation("No file provided."))?;

    let store = services.store.as_ref();
    let name = upload_name_hint(chrono::Utc::now());
    let name = name.as_str();
    let bytes = &bytes;
    let cid = retry(&services.retry, "upload segment", move || {
        store.put(bytes.to_vec(), name)
    })
    .await?;

    info!(%cid, size = bytes.len(), "Segment uploaded");
    Ok(Json(UploadResponse { cid }))
}

/// Ledger record as exposed over HTTP
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatView {
    pub id: u64,
    pub status: BeatStatus,
    pub contributors: Vec<String>,
    #[serde(rename = "segmentCIDs")]
    pub segment_cids: Vec<String>,
    pub segment_count: u64,
    pub is_minted: bool,
}

impl From<&Beat> for BeatView {
    fn from(beat: &Beat) -> Self {
        let (id, _, contributors, segment_cids, segment_count, is_minted) = beat.to_record();
        Self {
            id,
            status: beat.status(),
            contributors,
            segment_cids,
            segment_count,
            is_minted,
        }
    }
}

async fn beat_details(
    State(state): State<AppState>,
    Path(beat_id): Path<u64>,
) -> Result<Json<BeatView>> {
    let services = state.services()?;
    let reader = services.reader.as_ref();

    let beat = retry(&services.retry, "read beat", move || reader.get_beat_details(beat_id)).await?;
    Ok(Json(BeatView::from(&beat)))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "beatchain",
        "version": env!("CARGO_PKG_VERSION"),
        "configured": matches!(state, AppState::Ready(_)),
    }))
}
