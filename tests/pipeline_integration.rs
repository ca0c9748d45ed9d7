//! End-to-end pipeline tests: webhook delivery over real HTTP, the
//! processor driving jobs through every state with local adapters, and
//! the failure/retry paths.

use async_trait::async_trait;
use axum::{routing::get, Router};
use photopipe_backend::{
    api::{self, AppState},
    config::{AppEnv, Config},
    intake::sign_body,
    models::JobUpdate,
    processor::{Processor, ProcessorConfig},
    providers::{
        local::{
            LocalAiCompositor, LocalBackgroundGenerator, LocalCompositor, LocalSegmenter,
            LocalStorefront,
        },
        FsObjectStore, ObjectStore, ProviderError, ProviderSet, SegmentOutput, Segmenter,
    },
    state_machine::JobStatus,
    store::{migrations, Db, LeaseGuard, Stores},
};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const SECRET: &str = "test-webhook-secret";

type SegmenterFactory = Box<dyn FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn Segmenter>>;

#[derive(Default)]
struct HarnessOptions {
    /// Custom segmenter built over the harness's object store.
    segmenter: Option<SegmenterFactory>,
    /// Spawn a second competing worker over the same store.
    extra_worker: bool,
}

struct Harness {
    base_url: String,
    client: reqwest::Client,
    stores: Arc<Stores>,
    processor: Arc<Processor>,
    _storage: tempfile::TempDir,
    _dbdir: tempfile::TempDir,
}

fn test_config(port: u16, base_url: &str) -> Config {
    Config {
        app_env: AppEnv::Development,
        db_path: String::new(),
        port,
        poll_interval_ms: 50,
        concurrency: 4,
        max_retries: 3,
        image_max_per_sku: 4,
        default_theme: "default".into(),
        webhook_secret: Some(SECRET.into()),
        skip_webhook_verification: false,
        ai_compositor: "none".into(),
        lease_ttl_ms: 60_000,
        migrations_dir: "./migrations".into(),
        storage_root: String::new(),
        presign_secret: "presign-secret".into(),
        public_base_url: base_url.into(),
        shutdown_grace_secs: 5,
        rate_limit_max: 10_000,
        rate_limit_window_secs: 60,
        freepik_api_key: None,
        nanobanana_api_key: None,
        shopify_access_token: None,
    }
}

async fn build_harness(options: HarnessOptions) -> Harness {
    let dbdir = tempfile::tempdir().expect("tempdir");
    let db = Db::open(dbdir.path().join("test.db")).expect("open db");
    db.migrate(&migrations::embedded()).expect("migrate");
    let stores = Arc::new(Stores::new(&db));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let base_url = format!("http://{}", addr);

    let storage = tempfile::tempdir().expect("tempdir");
    let fs_objects = Arc::new(FsObjectStore::new(
        storage.path(),
        &base_url,
        "presign-secret",
    ));
    let objects: Arc<dyn ObjectStore> = fs_objects.clone();
    let segmenter = match options.segmenter {
        Some(factory) => factory(objects.clone()),
        None => Arc::new(LocalSegmenter::new(objects.clone())),
    };
    let providers = ProviderSet {
        objects: objects.clone(),
        segmenter,
        backgrounds: Arc::new(LocalBackgroundGenerator::new(objects.clone())),
        ai_compositor: Arc::new(LocalAiCompositor::new(objects.clone())),
        compositor: Arc::new(LocalCompositor::new(objects.clone())),
        storefront: Arc::new(LocalStorefront::new()),
    };

    let client = reqwest::Client::new();
    let worker_config = ProcessorConfig {
        poll_interval_ms: 50,
        concurrency: 4,
        max_retries: 3,
        lease_ttl_ms: 60_000,
        ..Default::default()
    };
    let processor = Processor::new(
        stores.clone(),
        providers.clone(),
        client.clone(),
        worker_config.clone(),
    );
    tokio::spawn(processor.clone().run());
    if options.extra_worker {
        let second = Processor::new(
            stores.clone(),
            providers.clone(),
            client.clone(),
            worker_config,
        );
        tokio::spawn(second.run());
    }

    let state = AppState {
        config: Arc::new(test_config(addr.port(), &base_url)),
        stores: stores.clone(),
        providers,
        processor: processor.clone(),
        http: client.clone(),
        fs_objects: Some(fs_objects),
    };
    let app = api::router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server");
    });

    Harness {
        base_url,
        client,
        stores,
        processor,
        _storage: storage,
        _dbdir: dbdir,
    }
}

async fn harness() -> Harness {
    build_harness(HarnessOptions::default()).await
}

/// Serve a deterministic source image on an ephemeral port; returns the
/// image URL and its sha256.
async fn spawn_source_image() -> (String, String) {
    let bytes: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let sha = hex::encode(Sha256::digest(&bytes));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let body = axum::body::Bytes::from(bytes);
    let app = Router::new().route(
        "/img.jpg",
        get(move || {
            let body = body.clone();
            async move { body }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fixture server");
    });
    (format!("http://{}/img.jpg", addr), sha)
}

async fn post_webhook(
    harness: &Harness,
    sku: &str,
    image_url: &str,
    sha256: &str,
) -> (reqwest::StatusCode, serde_json::Value) {
    let body = serde_json::json!({
        "event": "image.created",
        "sku": sku,
        "imageUrl": image_url,
        "sha256": sha256,
    });
    let raw = serde_json::to_vec(&body).expect("serialize");
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-3JMS-Signature", sign_body(SECRET, &raw))
        .body(raw)
        .send()
        .await
        .expect("webhook post");
    let status = response.status();
    let json = response.json().await.expect("json body");
    (status, json)
}

async fn get_job(harness: &Harness, job_id: &str) -> serde_json::Value {
    harness
        .client
        .get(format!("{}/jobs/{}", harness.base_url, job_id))
        .send()
        .await
        .expect("get job")
        .json()
        .await
        .expect("job json")
}

async fn wait_for_status(
    harness: &Harness,
    job_id: &str,
    wanted: JobStatus,
    timeout: Duration,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = get_job(harness, job_id).await;
        if job["status"] == wanted.as_str() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} never reached {}, stuck at {} ({} / {})",
                job_id, wanted, job["status"], job["errorCode"], job["errorMessage"]
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// March a store-created job to DONE without the processor (quota
/// fixtures).
fn force_done(stores: &Stores, id: &str) {
    let steps: Vec<(JobStatus, JobUpdate)> = vec![
        (
            JobStatus::BgRemoved,
            JobUpdate {
                s3_original_key: Some("o".into()),
                s3_cutout_key: Some("c".into()),
                s3_mask_key: Some("m".into()),
                ..Default::default()
            },
        ),
        (
            JobStatus::BackgroundReady,
            JobUpdate {
                s3_bg_keys: Some(vec!["b".into()]),
                ..Default::default()
            },
        ),
        (
            JobStatus::Composited,
            JobUpdate {
                s3_composite_keys: Some(vec!["x".into()]),
                ..Default::default()
            },
        ),
        (
            JobStatus::Derivatives,
            JobUpdate {
                s3_derivative_keys: Some(vec!["d".into()]),
                s3_manifest_key: Some("mf".into()),
                ..Default::default()
            },
        ),
        (
            JobStatus::ShopifyPush,
            JobUpdate {
                shopify_media_ids: Some(vec!["gid://shopify/MediaImage/1".into()]),
                ..Default::default()
            },
        ),
        (JobStatus::Done, JobUpdate::default()),
    ];
    for (target, update) in steps {
        stores
            .jobs
            .update_status(id, target, update, LeaseGuard::Admin)
            .expect("force transition");
    }
}

#[tokio::test]
async fn happy_path_webhook_to_done() {
    let harness = harness().await;
    let (image_url, sha) = spawn_source_image().await;

    let (status, body) = post_webhook(&harness, "ABC-1", &image_url, &sha).await;
    assert_eq!(status, 201);
    assert_eq!(body["status"], "created");
    let job_id = body["jobId"].as_str().expect("jobId").to_string();

    let job = wait_for_status(&harness, &job_id, JobStatus::Done, Duration::from_secs(15)).await;

    assert_eq!(job["sku"], "ABC-1");
    assert!(job["s3OriginalKey"].as_str().is_some());
    assert!(job["s3CutoutKey"].as_str().is_some());
    assert!(job["s3MaskKey"].as_str().is_some());
    assert!(!job["s3BgKeys"].as_array().expect("bg keys").is_empty());
    assert!(!job["s3CompositeKeys"].as_array().expect("composites").is_empty());
    assert!(!job["s3DerivativeKeys"].as_array().expect("derivatives").is_empty());
    assert!(job["s3ManifestKey"].as_str().is_some());
    assert!(!job["shopifyMediaIds"].as_array().expect("media").is_empty());
    assert!(
        job["completedAt"].as_i64().expect("completedAt")
            >= job["createdAt"].as_i64().expect("createdAt")
    );
    assert!(job["costUsd"].as_f64().expect("cost") > 0.0);
    assert_eq!(job["attempt"], 0);
    // Each step stamped its duration.
    for step in [
        "fetch_segment",
        "background",
        "compose",
        "derivatives",
        "storefront_push",
    ] {
        assert!(
            job["stepDurationsMs"][step].as_i64().is_some(),
            "missing duration for {}",
            step
        );
    }

    // Presigned composite URL dereferences to the stored bytes.
    let presign: serde_json::Value = harness
        .client
        .get(format!(
            "{}/jobs/{}/presign?type=composite",
            harness.base_url, job_id
        ))
        .send()
        .await
        .expect("presign")
        .json()
        .await
        .expect("presign json");
    let url = presign["url"].as_str().expect("url");
    assert!(presign["key"]
        .as_str()
        .expect("key")
        .starts_with("composites/ABC-1/"));
    let fetched = harness.client.get(url).send().await.expect("deref");
    assert_eq!(fetched.status(), 200);
    assert!(!fetched.bytes().await.expect("bytes").is_empty());
}

#[tokio::test]
async fn duplicate_deliveries_create_one_job() {
    let harness = harness().await;
    let (image_url, sha) = spawn_source_image().await;

    let (s1, b1) = post_webhook(&harness, "DUP-1", &image_url, &sha).await;
    let (s2, b2) = post_webhook(&harness, "DUP-1", &image_url, &sha).await;
    let (s3, b3) = post_webhook(&harness, "DUP-1", &image_url, &sha).await;

    assert_eq!(s1, 201);
    assert_eq!(b1["status"], "created");
    assert_eq!(s2, 200);
    assert_eq!(b2["status"], "duplicate");
    assert_eq!(s3, 200);
    assert_eq!(b3["status"], "duplicate");
    assert_eq!(b1["jobId"], b2["jobId"]);
    assert_eq!(b1["jobId"], b3["jobId"]);

    let list: serde_json::Value = harness
        .client
        .get(format!("{}/jobs?sku=DUP-1", harness.base_url))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("list json");
    assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn quota_rejects_fifth_image() {
    let harness = harness().await;
    harness.processor.stop();

    for i in 0..4 {
        let (job, created) = harness
            .stores
            .jobs
            .create(
                "Q-1",
                &format!("{:a>64}", i),
                &format!("t{}", i),
                "https://example.com/i.jpg",
            )
            .expect("create");
        assert!(created);
        force_done(&harness.stores, &job.id);
    }

    let (image_url, sha) = spawn_source_image().await;
    let (status, body) = post_webhook(&harness, "Q-1", &image_url, &sha).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "quota_reached");

    let list: serde_json::Value = harness
        .client
        .get(format!("{}/jobs?sku=Q-1", harness.base_url))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("list json");
    assert_eq!(list["count"], 4);
}

#[tokio::test]
async fn signature_is_required_and_checked() {
    let harness = harness().await;
    // No processor churn on jobs whose source URL is unreachable.
    harness.processor.stop();
    let body = serde_json::json!({
        "sku": "SIG-1",
        "imageUrl": "https://example.com/i.jpg",
        "sha256": "a".repeat(64),
    });
    let raw = serde_json::to_vec(&body).expect("serialize");

    // Missing signature.
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .body(raw.clone())
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 401);

    // Wrong signature.
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-Webhook-Signature", sign_body("wrong-secret", &raw))
        .body(raw.clone())
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 401);

    // Alternate header name with the right secret is accepted.
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-Signature", sign_body(SECRET, &raw))
        .body(raw)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn validation_failures_report_fields() {
    let harness = harness().await;
    let body = serde_json::json!({
        "sku": "bad sku!",
        "imageUrl": "not-a-url",
        "sha256": "ABCDEF",
    });
    let raw = serde_json::to_vec(&body).expect("serialize");
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-3JMS-Signature", sign_body(SECRET, &raw))
        .body(raw)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.expect("json");
    assert_eq!(json["error"], "validation_failed");
    let fields: Vec<&str> = json["details"]
        .as_array()
        .expect("details")
        .iter()
        .map(|d| d["field"].as_str().expect("field"))
        .collect();
    assert_eq!(fields, vec!["sku", "imageUrl", "sha256"]);
}

/// Fails the first N segmentations with a retryable code, then behaves
/// like the local adapter.
struct FlakySegmenter {
    inner: LocalSegmenter,
    remaining_failures: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl Segmenter for FlakySegmenter {
    async fn remove_background(
        &self,
        source_url: &str,
        sku: &str,
        image_hash: &str,
    ) -> Result<SegmentOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::segment("simulated provider outage"));
        }
        self.inner
            .remove_background(source_url, sku, image_hash)
            .await
    }
}

#[tokio::test]
async fn retryable_failure_recovers_with_backoff() {
    let flaky_handle: Arc<parking_lot::Mutex<Option<Arc<FlakySegmenter>>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let handle = flaky_handle.clone();
    let harness = build_harness(HarnessOptions {
        segmenter: Some(Box::new(move |objects| {
            let flaky = Arc::new(FlakySegmenter {
                inner: LocalSegmenter::new(objects),
                remaining_failures: AtomicU32::new(2),
                calls: AtomicU32::new(0),
            });
            *handle.lock() = Some(flaky.clone());
            flaky
        })),
        ..Default::default()
    })
    .await;

    let (image_url, sha) = spawn_source_image().await;
    let (status, body) = post_webhook(&harness, "FLAKY-1", &image_url, &sha).await;
    assert_eq!(status, 201);
    let job_id = body["jobId"].as_str().expect("jobId").to_string();

    // 2 s + 4 s backoff plus processing; give it room.
    let job = wait_for_status(&harness, &job_id, JobStatus::Done, Duration::from_secs(30)).await;
    assert_eq!(job["attempt"], 2);
    assert!(job["errorCode"].is_null());

    let flaky = flaky_handle.lock().clone().expect("flaky installed");
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn invalid_image_is_terminal_and_not_retryable() {
    let harness = harness().await;
    let (image_url, _real_sha) = spawn_source_image().await;

    // Announce a hash the bytes will not match.
    let wrong_sha = "b".repeat(64);
    let (status, body) = post_webhook(&harness, "BAD-1", &image_url, &wrong_sha).await;
    assert_eq!(status, 201);
    let job_id = body["jobId"].as_str().expect("jobId").to_string();

    let job = wait_for_status(&harness, &job_id, JobStatus::Failed, Duration::from_secs(10)).await;
    assert_eq!(job["errorCode"], "InvalidImage");
    assert_eq!(job["attempt"], 0);

    // Sits out every backoff window: still FAILED with attempt 0 after
    // the first retry delay has elapsed.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let job = get_job(&harness, &job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert_eq!(job["attempt"], 0);

    // Manual retry is refused.
    let response = harness
        .client
        .post(format!("{}/jobs/{}/retry", harness.base_url, job_id))
        .send()
        .await
        .expect("retry");
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.expect("json");
    assert_eq!(json["error"], "retry_not_eligible");
}

/// Counts segmentations per (sku, hash) so double-processing shows up.
struct CountingSegmenter {
    inner: LocalSegmenter,
    counts: parking_lot::Mutex<std::collections::HashMap<String, u32>>,
}

#[async_trait]
impl Segmenter for CountingSegmenter {
    async fn remove_background(
        &self,
        source_url: &str,
        sku: &str,
        image_hash: &str,
    ) -> Result<SegmentOutput, ProviderError> {
        *self
            .counts
            .lock()
            .entry(format!("{}/{}", sku, image_hash))
            .or_insert(0) += 1;
        self.inner
            .remove_background(source_url, sku, image_hash)
            .await
    }
}

#[tokio::test]
async fn competing_workers_never_double_process() {
    let counter_handle: Arc<parking_lot::Mutex<Option<Arc<CountingSegmenter>>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let handle = counter_handle.clone();
    let harness = build_harness(HarnessOptions {
        segmenter: Some(Box::new(move |objects| {
            let counting = Arc::new(CountingSegmenter {
                inner: LocalSegmenter::new(objects),
                counts: parking_lot::Mutex::new(std::collections::HashMap::new()),
            });
            *handle.lock() = Some(counting.clone());
            counting
        })),
        extra_worker: true,
    })
    .await;

    let (image_url, sha) = spawn_source_image().await;
    let mut job_ids = Vec::new();
    for i in 0..12 {
        let (status, body) =
            post_webhook(&harness, &format!("RACE-{}", i), &image_url, &sha).await;
        assert_eq!(status, 201);
        job_ids.push(body["jobId"].as_str().expect("jobId").to_string());
    }

    for job_id in &job_ids {
        wait_for_status(&harness, job_id, JobStatus::Done, Duration::from_secs(30)).await;
    }

    // Two workers competed for leases, yet every job segmented exactly
    // once and completed exactly once.
    let counting = counter_handle.lock().clone().expect("counter installed");
    let counts = counting.counts.lock();
    assert_eq!(counts.len(), 12);
    for (key, count) in counts.iter() {
        assert_eq!(*count, 1, "job {} segmented {} times", key, count);
    }
}

/// Hangs long enough that shutdown always lands mid-step.
struct SlowSegmenter;

#[async_trait]
impl Segmenter for SlowSegmenter {
    async fn remove_background(
        &self,
        _source_url: &str,
        _sku: &str,
        _image_hash: &str,
    ) -> Result<SegmentOutput, ProviderError> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        Err(ProviderError::segment("unreachable"))
    }
}

#[tokio::test]
async fn shutdown_mid_step_leaves_no_partial_state() {
    let harness = build_harness(HarnessOptions {
        segmenter: Some(Box::new(|_objects| Arc::new(SlowSegmenter))),
        ..Default::default()
    })
    .await;
    let (image_url, sha) = spawn_source_image().await;

    let (status, body) = post_webhook(&harness, "SLOW-1", &image_url, &sha).await;
    assert_eq!(status, 201);
    let job_id = body["jobId"].as_str().expect("jobId").to_string();

    // Wait until a worker picks the job up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if harness.processor.status().current_jobs.contains(&job_id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never dispatched"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.processor.initiate_shutdown();
    assert!(harness.processor.wait_idle(Duration::from_secs(5)).await);

    // The job is exactly as the webhook left it: NEW, no artifacts, no
    // error, lease released.
    let job = harness
        .stores
        .jobs
        .get(&job_id)
        .expect("get")
        .expect("exists");
    assert_eq!(job.status, JobStatus::New);
    assert!(job.s3_original_key.is_none());
    assert!(job.s3_cutout_key.is_none());
    assert!(job.error_code.is_none());
    assert!(job.lease_owner.is_none());
    assert_eq!(job.attempt, 0);
}

#[tokio::test]
async fn oversize_webhook_is_rejected_at_the_boundary() {
    let harness = harness().await;
    harness.processor.stop();

    let limit = api::MAX_WEBHOOK_BYTES;
    let overhead = serde_json::to_vec(&serde_json::json!({
        "sku": "PAD-1",
        "imageUrl": "https://example.com/i.jpg",
        "sha256": "a".repeat(64),
        "padding": "",
    }))
    .expect("serialize")
    .len();

    // A valid payload padded to exactly the limit passes.
    let exact = serde_json::json!({
        "sku": "PAD-1",
        "imageUrl": "https://example.com/i.jpg",
        "sha256": "a".repeat(64),
        "padding": "x".repeat(limit - overhead),
    });
    let raw = serde_json::to_vec(&exact).expect("serialize");
    assert_eq!(raw.len(), limit);
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-3JMS-Signature", sign_body(SECRET, &raw))
        .body(raw)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 201);

    // One byte over is 413.
    let over = serde_json::json!({
        "sku": "PAD-2",
        "imageUrl": "https://example.com/i.jpg",
        "sha256": "a".repeat(64),
        "padding": "x".repeat(limit - overhead + 1),
    });
    let raw = serde_json::to_vec(&over).expect("serialize");
    assert_eq!(raw.len(), limit + 1);
    let response = harness
        .client
        .post(format!("{}/webhooks/3jms/images", harness.base_url))
        .header("content-type", "application/json")
        .header("X-3JMS-Signature", sign_body(SECRET, &raw))
        .body(raw)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn processor_endpoints_report_and_toggle() {
    let harness = harness().await;

    let status: serde_json::Value = harness
        .client
        .get(format!("{}/processor/status", harness.base_url))
        .send()
        .await
        .expect("status")
        .json()
        .await
        .expect("json");
    assert_eq!(status["isRunning"], true);
    assert_eq!(status["config"]["concurrency"], 4);
    assert_eq!(status["config"]["maxRetries"], 3);
    assert!(status["version"].as_str().is_some());

    let stopped: serde_json::Value = harness
        .client
        .post(format!("{}/processor/stop", harness.base_url))
        .send()
        .await
        .expect("stop")
        .json()
        .await
        .expect("json");
    assert_eq!(stopped["isRunning"], false);

    let started: serde_json::Value = harness
        .client
        .post(format!("{}/processor/start", harness.base_url))
        .send()
        .await
        .expect("start")
        .json()
        .await
        .expect("json");
    assert_eq!(started["isRunning"], true);
}
