//! HTTP API Integration Tests
//!
//! Drives the router end to end against in-memory store and ledger.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use beatchain::adapters::{ContentStore, InMemoryLedger, InMemoryStore};
use beatchain::core::{AdmissionPolicy, RetryPolicy};
use beatchain::domain::Segment;
use beatchain::server::{router, AppState, Services};
use beatchain::{Beat, ContentId, Contributor, Error};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::{json, Value};
use tower::ServiceExt;

const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Segment identifiers of beat 42 in ledger order
const ABC: [&str; 3] = ["cidA", "cidB", "cidC"];

/// Store whose reads of one identifier always fail transiently
struct FlakyStore {
    inner: Arc<InMemoryStore>,
    broken: ContentId,
}

#[async_trait]
impl ContentStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn put(&self, bytes: Vec<u8>, name_hint: &str) -> beatchain::Result<ContentId> {
        self.inner.put(bytes, name_hint).await
    }

    async fn get(&self, cid: &ContentId) -> beatchain::Result<Vec<u8>> {
        if *cid == self.broken {
            return Err(Error::UpstreamFetch {
                cid: cid.to_string(),
                message: "gateway timeout".to_string(),
                not_found: false,
            });
        }
        self.inner.get(cid).await
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        attempt_timeout_ms: 1_000,
    }
}

fn cid(s: &str) -> ContentId {
    ContentId::new(s).unwrap()
}

fn who(s: &str) -> Contributor {
    Contributor::new(s).unwrap()
}

fn wav(samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut out = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut out), spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }
    out
}

/// Beat 42 recorded with cidA/cidB/cidC by 0x1/0x2/0x3
fn beat_42() -> Beat {
    let mut beat = Beat::started(42, Segment::new(who("0x1"), cid("cidA")));
    beat.append(Segment::new(who("0x2"), cid("cidB"))).unwrap();
    beat.append(Segment::new(who("0x3"), cid("cidC"))).unwrap();
    beat
}

fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.insert(cid("cidA"), wav(&[1, 2]));
    store.insert(cid("cidB"), wav(&[3, 4]));
    store.insert(cid("cidC"), wav(&[5, 6]));
    store
}

fn app_with(store: Arc<dyn ContentStore>, ledger: Arc<InMemoryLedger>) -> Router {
    let services = Services::new(
        store,
        ledger.clone(),
        ledger,
        fast_policy(),
        AdmissionPolicy::default(),
    );
    router(AppState::from(services), BODY_LIMIT)
}

fn app() -> (Router, Arc<InMemoryStore>, Arc<InMemoryLedger>) {
    let store = seeded_store();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_beat(beat_42());
    (app_with(store.clone(), ledger.clone()), store, ledger)
}

fn finalize_body(beat_id: Value, cids: &[&str]) -> Body {
    Body::from(
        json!({
            "beatId": beat_id,
            "segmentCIDs": cids,
            "contributors": ["0x1", "0x2", "0x3"],
        })
        .to_string(),
    )
}

async fn post_finalize(app: &Router, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/finalize")
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn multipart(field: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "beatchain-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"segment.wav\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_finalize_completed_beat() {
    let (app, store, _) = app();

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["beatId"], 42);

    let audio_cid = cid(body["finalAudioCID"].as_str().unwrap());
    let metadata_cid = cid(body["metadataCID"].as_str().unwrap());

    let metadata: Value =
        serde_json::from_slice(&store.get(&metadata_cid).await.unwrap()).unwrap();
    assert_eq!(metadata["animation_url"], format!("ipfs://{}", audio_cid));
    assert_eq!(metadata["name"], "BeatChain Beat #42");
    assert!(store.contains(&audio_cid));
}

#[tokio::test]
async fn test_finalize_is_repeatable() {
    let (app, _, _) = app();

    let (_, first) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;
    let (status, second) = post_finalize(&app, finalize_body(json!("42"), &ABC)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["metadataCID"], second["metadataCID"]);
    assert_eq!(first["finalAudioCID"], second["finalAudioCID"]);
}

#[tokio::test]
async fn test_finalize_rejects_malformed_body() {
    let (app, store, _) = app();
    let before = store.len();

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &["cidA", "cidB"])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));
    assert_eq!(store.len(), before);
}

#[tokio::test]
async fn test_finalize_reports_exhausted_segment_fetch() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_beat(beat_42());
    let inner = seeded_store();
    let before = inner.len();
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        broken: cid("cidB"),
    });
    let app = app_with(store, ledger);

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("cidB"));
    assert_eq!(body["kind"], "assembly_fetch");
    assert_eq!(body["retryable"], true);
    // nothing was published
    assert_eq!(inner.len(), before);
}

#[tokio::test]
async fn test_finalize_missing_segment_is_not_retryable() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_beat(beat_42());
    let store = Arc::new(InMemoryStore::new());
    store.insert(cid("cidA"), wav(&[1, 2]));
    store.insert(cid("cidC"), wav(&[5, 6]));
    let app = app_with(store, ledger);

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "assembly_fetch");
    assert!(body["error"].as_str().unwrap().contains("cidB"));
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_finalize_without_configuration() {
    let app = router(
        AppState::Misconfigured(Error::Configuration("PINATA_JWT is not set".to_string())),
        BODY_LIMIT,
    );

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "configuration");
}

#[tokio::test]
async fn test_finalize_minted_beat_conflicts() {
    let (app, _, ledger) = app();
    let mut minted = beat_42();
    minted.mark_minted().unwrap();
    ledger.insert_beat(minted);

    let (status, body) = post_finalize(&app, finalize_body(json!(42), &ABC)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "ledger_state");
}

#[tokio::test]
async fn test_finalize_claim_must_match_ledger() {
    let (app, _, _) = app();

    let reordered = finalize_body(json!(42), &["cidA", "cidC", "cidB"]);
    let (status, _) = post_finalize(&app, reordered).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_finalize(&app, finalize_body(json!(7), &ABC)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_pins_file() {
    let (app, store, _) = app();
    let audio = wav(&[9, 9, 9]);

    let (status, body) = send(&app, multipart("file", &audio)).await;

    assert_eq!(status, StatusCode::OK);
    let uploaded = cid(body["cid"].as_str().unwrap());
    assert_eq!(store.get(&uploaded).await.unwrap(), audio);
}

#[tokio::test]
async fn test_upload_without_file() {
    let (app, _, _) = app();

    let (status, body) = send(&app, multipart("attachment", b"bytes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file provided.");

    let (status, body) = send(&app, multipart("file", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file provided.");
}

#[tokio::test]
async fn test_beat_details_and_health() {
    let (app, _, _) = app();

    let request = Request::builder().uri("/beats/42").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["segmentCIDs"], json!(["cidA", "cidB", "cidC"]));
    assert_eq!(body["status"], "completed");
    assert_eq!(body["isMinted"], false);

    let request = Request::builder().uri("/beats/99").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["configured"], true);
}
