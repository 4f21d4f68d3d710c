use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use kairos::config::{BasicConfig, PollerConfig, QualityConfig, RaceConfig, TimeSyncConfig};
use kairos::contention::{ContentionDetector, ContentionPoller, ExitReason, RetryHandle, Severity};
use kairos::net::{HttpProber, build_client};
use kairos::quality::{LatencyProbe, NetworkQualityTier, QualityAdvisor};
use kairos::scheduler::{AcquisitionScheduler, RunOutcome, RunRequest, SchedulerSettings};
use kairos::status::TracingSink;
use kairos::surface::{AcquisitionRequest, AttemptVerdict, HttpSurface, InteractionSurface};
use kairos::timesync::{TimeReference, TimeSync};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

async fn spawn_test_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let base = Url::parse(&format!("http://{}", addr)).expect("valid base url");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    base
}

fn client() -> reqwest::Client {
    build_client(&BasicConfig::default()).expect("client builds")
}

fn surface(base: &Url) -> HttpSurface {
    HttpSurface::new(
        client(),
        base.join("/acquire").unwrap(),
        Some(base.join("/status").unwrap()),
        ContentionDetector::new(["busy", "queue", "try again"]),
    )
}

fn request(attempt: usize) -> AcquisitionRequest {
    let mut payload = Map::new();
    payload.insert("sku".to_string(), json!("A-1"));
    payload.insert("quantity".to_string(), json!(1));
    AcquisitionRequest::new("slot", payload, NetworkQualityTier::Excellent.profile().timeouts)
        .for_attempt(attempt)
}

fn rfc2822(at: chrono::DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[tokio::test]
async fn successful_acquisition_posts_payload() {
    let captured: Arc<Mutex<Vec<(HeaderMap, Value)>>> = Arc::default();
    let sink = captured.clone();
    let app = Router::new().route(
        "/acquire",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((headers, body));
                (StatusCode::OK, "confirmed #17")
            }
        }),
    );
    let base = spawn_test_server(app).await;

    let verdict = surface(&base).perform_acquisition_attempt(&request(4)).await;
    assert_eq!(verdict, AttemptVerdict::Success("confirmed #17".to_string()));

    let calls = captured.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (headers, body) = &calls[0];
    assert_eq!(body, &json!({"sku": "A-1", "quantity": 1}));
    assert_eq!(
        headers.get("x-acquire-attempt").and_then(|v| v.to_str().ok()),
        Some("4")
    );
    assert_eq!(
        headers.get("x-acquire-target").and_then(|v| v.to_str().ok()),
        Some("slot")
    );
}

#[tokio::test]
async fn busy_response_becomes_contention_with_handle() {
    let app = Router::new().route(
        "/acquire",
        post(|| async {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::LOCATION, "/retry/9")],
                "Server busy, please try again",
            )
        }),
    );
    let base = spawn_test_server(app).await;

    let verdict = surface(&base).perform_acquisition_attempt(&request(0)).await;
    let AttemptVerdict::Contention(signal) = verdict else {
        panic!("expected contention, got {verdict:?}");
    };
    assert_eq!(signal.severity, Severity::Moderate);
    assert!(signal.matched_keywords.contains("busy"));
    assert_eq!(
        signal.retry_handle,
        Some(RetryHandle::new(base.join("/retry/9").unwrap()))
    );
}

#[tokio::test]
async fn error_statuses_split_into_transient_and_fatal() {
    let app = Router::new()
        .route("/acquire", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }))
        .route("/gone", post(|| async { (StatusCode::NOT_FOUND, "no such item") }));
    let base = spawn_test_server(app).await;

    let transient = surface(&base).perform_acquisition_attempt(&request(0)).await;
    assert!(matches!(transient, AttemptVerdict::TransientError(m) if m.contains("502")));

    let gone = HttpSurface::new(
        client(),
        base.join("/gone").unwrap(),
        None,
        ContentionDetector::new(["busy"]),
    );
    let fatal = gone.perform_acquisition_attempt(&request(0)).await;
    assert!(matches!(fatal, AttemptVerdict::Fatal(m) if m.contains("no such item")));
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{addr}")).unwrap();

    let verdict = surface(&base).perform_acquisition_attempt(&request(0)).await;
    assert!(matches!(verdict, AttemptVerdict::TransientError(_)), "{verdict:?}");
}

#[tokio::test]
async fn scan_and_retry_action_follow_the_remote_state() {
    let retries = Arc::new(AtomicUsize::new(0));
    let hits = retries.clone();
    let status_view = retries.clone();
    let app = Router::new()
        .route(
            "/status",
            get(move || {
                let retries = status_view.load(Ordering::SeqCst);
                async move {
                    if retries == 0 {
                        "you are in the queue"
                    } else {
                        "open"
                    }
                }
            }),
        )
        .route(
            "/retry/{id}",
            post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::ACCEPTED }
            }),
        );
    let base = spawn_test_server(app).await;
    let surface = surface(&base);

    let signal = surface.scan_for_contention().await.expect("still queued");
    assert_eq!(signal.severity, Severity::Mild);

    let handle = RetryHandle::new(base.join("/retry/3").unwrap());
    assert!(surface.invoke_retry_action(Some(&handle)).await);
    assert_eq!(retries.load(Ordering::SeqCst), 1);

    assert!(surface.scan_for_contention().await.is_none());
}

#[tokio::test]
async fn unreachable_status_page_keeps_contention() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{addr}")).unwrap();

    assert!(surface(&base).scan_for_contention().await.is_some());
    assert!(!surface(&base).invoke_retry_action(None).await);
}

#[tokio::test]
async fn error_status_pages_keep_contention() {
    let app = Router::new()
        .route(
            "/status",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream error") }),
        )
        .route(
            "/acquire",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
    let base = spawn_test_server(app).await;

    let signal = surface(&base).scan_for_contention().await.expect("502 is not admission");
    assert_eq!(signal.severity, Severity::Moderate);

    // No status page configured: the scan falls back to GET on a POST-only endpoint.
    let post_only = HttpSurface::new(
        client(),
        base.join("/acquire").unwrap(),
        None,
        ContentionDetector::new(["queue"]),
    );
    let signal = post_only.scan_for_contention().await.expect("405 is not admission");
    assert_eq!(signal.severity, Severity::Moderate);

    let poller = ContentionPoller::new(PollerConfig {
        max_attempts: 4,
        progress_check_interval: 2,
        burst_size: 1,
        ..PollerConfig::default()
    });
    let outcome = poller
        .run(&surface(&base), &signal, &CancellationToken::new())
        .await;
    assert_eq!(outcome.exit_reason, ExitReason::Exhausted);
    assert_eq!(outcome.total_attempts, 4);
}

#[tokio::test]
async fn prober_reads_offset_from_date_header() {
    let app = Router::new().route(
        "/",
        get(|| async { [(header::DATE, rfc2822(Utc::now() + TimeDelta::seconds(30)))] }),
    );
    let base = spawn_test_server(app).await;
    let prober = HttpProber::new(client());

    let sample = prober.sample(&base).await.expect("sample");
    assert!(sample.offset > TimeDelta::milliseconds(28_500), "{:?}", sample.offset);
    assert!(sample.offset <= TimeDelta::milliseconds(31_000), "{:?}", sample.offset);
    assert!(sample.round_trip < Duration::from_secs(2));

    let rtt = prober.round_trip(&base).await.expect("round trip");
    assert!(rtt < Duration::from_secs(2));
}

#[tokio::test]
async fn in_sync_date_server_calibrates_near_zero() {
    let app = Router::new().route("/", get(|| async { [(header::DATE, rfc2822(Utc::now()))] }));
    let base = spawn_test_server(app).await;
    let time_sync = TimeSync::new(
        Arc::new(HttpProber::new(client())),
        TimeSyncConfig {
            reference_urls: vec![base.clone(), base.join("/").unwrap()],
            ..TimeSyncConfig::default()
        },
    );

    let mut total = TimeDelta::zero();
    for _ in 0..3 {
        let state = time_sync.force_sync().await;
        assert!(state.is_accurate, "{state:?}");
        assert!(state.offset.abs() <= TimeDelta::milliseconds(150), "{state:?}");
        total += state.offset;
    }
    assert!((total / 3).abs() <= TimeDelta::milliseconds(150));
}

#[tokio::test]
async fn end_to_end_run_is_admitted_after_polling() {
    let retries = Arc::new(AtomicUsize::new(0));
    let hits = retries.clone();
    let status_view = retries.clone();
    let app = Router::new()
        .route("/", get(|| async { [(header::DATE, rfc2822(Utc::now()))] }))
        .route(
            "/acquire",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::LOCATION, "/retry/1")],
                    "busy",
                )
            }),
        )
        .route(
            "/status",
            get(move || {
                let open = status_view.load(Ordering::SeqCst) >= 2;
                async move { if open { "open" } else { "busy" } }
            }),
        )
        .route(
            "/retry/{id}",
            post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::OK }
            }),
        );
    let base = spawn_test_server(app).await;

    let prober = Arc::new(HttpProber::new(client()));
    let time_sync = TimeSync::new(
        prober.clone(),
        TimeSyncConfig {
            reference_urls: vec![base.clone()],
            ..TimeSyncConfig::default()
        },
    );
    let advisor = QualityAdvisor::new(
        prober,
        QualityConfig {
            probe_urls: vec![base.clone()],
            ..QualityConfig::default()
        },
    );
    let settings = SchedulerSettings {
        lead_time: Duration::from_millis(5),
        race: RaceConfig {
            concurrency: Some(1),
            ..RaceConfig::default()
        },
        retry: Default::default(),
        poller: PollerConfig {
            max_attempts: 20,
            ..PollerConfig::default()
        },
    };
    let scheduler = AcquisitionScheduler::new(
        Arc::new(time_sync),
        advisor,
        Arc::new(surface(&base)),
        Arc::new(TracingSink),
        settings,
    );

    let report = scheduler
        .run(
            RunRequest {
                target: "slot".to_string(),
                payload: Map::new(),
                deadline: None,
            },
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.outcome, RunOutcome::Success, "{report}");
    assert_eq!(report.attempts, 1);
    let poll = report.poll.expect("poller ran");
    assert_eq!(poll.exit_reason, ExitReason::Admitted);
    assert_eq!(poll.total_attempts, 2);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    assert!(scheduler.time_sync().snapshot().offset.num_seconds().abs() <= 1);
}
