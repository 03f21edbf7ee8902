use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use relay_core::{
    ArchiveFetcher, ExtractionError, ExtractionJob, ExtractionQueue, ExtractionWorkflow,
    FolderPicker, JobOutcome, JobStatus, MapSettings, Notifier, PanelHandle, RelayConfig,
    RelayMetrics, RelayServer, RouteAction, RoutePolicy, RouteRule, RuleCondition, WorkflowDeps,
    WorkspaceOpener,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};

#[derive(Default)]
struct CountingPanel {
    hides: AtomicUsize,
}

impl PanelHandle for CountingPanel {
    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
    }
}

struct FixedPicker {
    answer: Option<PathBuf>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl FolderPicker for FixedPicker {
    async fn pick_folder(&self, default_dir: &Path, title: &str) -> Option<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push((default_dir.to_path_buf(), title.to_string()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.answer.clone()
    }
}

#[derive(Default)]
struct RecordingFetcher {
    calls: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl ArchiveFetcher for RecordingFetcher {
    async fn fetch_and_extract(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<(), ExtractionError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), destination.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingOpener {
    opened: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl WorkspaceOpener for RecordingOpener {
    async fn open_as_new_window(&self, path: &Path) {
        self.opened.lock().unwrap().push(path.to_path_buf());
    }
}

#[derive(Default)]
struct RecordingNotifier {
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    addr: SocketAddr,
    panel: Arc<CountingPanel>,
    picker: Arc<FixedPicker>,
    fetcher: Arc<RecordingFetcher>,
    opener: Arc<RecordingOpener>,
    notifier: Arc<RecordingNotifier>,
    queue: ExtractionQueue,
    metrics: Arc<RelayMetrics>,
}

async fn start_relay(
    remote_origin: &str,
    answer: Option<PathBuf>,
    gate: Option<Arc<Notify>>,
) -> Harness {
    start_relay_with_policy(remote_origin, answer, gate, None).await
}

async fn start_relay_with_policy(
    remote_origin: &str,
    answer: Option<PathBuf>,
    gate: Option<Arc<Notify>>,
    policy: Option<RoutePolicy>,
) -> Harness {
    let panel = Arc::new(CountingPanel::default());
    let picker = Arc::new(FixedPicker {
        answer,
        gate,
        calls: Mutex::new(Vec::new()),
    });
    let fetcher = Arc::new(RecordingFetcher::default());
    let opener = Arc::new(RecordingOpener::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let metrics = Arc::new(RelayMetrics::default());

    let workflow = ExtractionWorkflow::new(WorkflowDeps {
        settings: Arc::new(MapSettings::default()),
        picker: picker.clone(),
        fetcher: fetcher.clone(),
        opener: opener.clone(),
        notifier: notifier.clone(),
    });
    let (queue, _worker) = ExtractionQueue::spawn(workflow, metrics.clone());

    let config = RelayConfig {
        listen_port: 0,
        remote_origin: remote_origin.to_string(),
        ..Default::default()
    };
    let mut server =
        RelayServer::new(config, panel.clone(), queue.clone(), metrics.clone()).unwrap();
    if let Some(policy) = policy {
        server = server.with_policy(policy);
    }
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr();
    tokio::spawn(bound.serve());

    Harness {
        addr,
        panel,
        picker,
        fetcher,
        opener,
        notifier,
        queue,
        metrics,
    }
}

/// Remote stand-in: answers with framing headers and echoes the request.
async fn start_upstream() -> SocketAddr {
    async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
        let host = headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (
            StatusCode::OK,
            [
                ("x-frame-options", "DENY"),
                ("content-security-policy", "frame-ancestors 'none'"),
                ("x-upstream", "yes"),
                ("x-seen-host", host.as_str()),
            ],
            format!("{} {}", method, String::from_utf8_lossy(&body)),
        )
            .into_response()
    }

    let app = Router::new()
        .route("/missing", any(|| async { StatusCode::NOT_FOUND }))
        .fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_forward_strips_framing_headers() {
    let upstream = start_upstream().await;
    let relay = start_relay(&format!("http://{}", upstream), None, None).await;

    let resp = client()
        .get(format!("http://{}/index.html?x=1", relay.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("x-frame-options").is_none());
    assert!(resp.headers().get("content-security-policy").is_none());
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(
        resp.headers().get("x-seen-host").unwrap().to_str().unwrap(),
        upstream.to_string(),
        "Host comes from the remote origin URL"
    );
    assert_eq!(resp.text().await.unwrap(), "GET ");
    assert_eq!(relay.panel.hides.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forward_preserves_method_and_body() {
    let upstream = start_upstream().await;
    let relay = start_relay(&format!("http://{}", upstream), None, None).await;

    let resp = client()
        .post(format!("http://{}/project", relay.addr))
        .body("{\"name\":\"demo\"}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "POST {\"name\":\"demo\"}");
    assert_eq!(relay.metrics.snapshot().forwarded, 1);
}

#[tokio::test]
async fn test_forward_passes_upstream_status_through() {
    let upstream = start_upstream().await;
    let relay = start_relay(&format!("http://{}", upstream), None, None).await;

    let resp = client()
        .get(format!("http://{}/missing", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Grab a free port and release it so nothing is listening there.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let relay = start_relay(&format!("http://{}", dead_addr), None, None).await;
    let resp = client()
        .get(format!("http://{}/", relay.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    assert_eq!(relay.metrics.snapshot().upstream_failures, 1);
}

#[tokio::test]
async fn test_intercept_acknowledges_before_extraction_runs() {
    let gate = Arc::new(Notify::new());
    let out = tempfile::tempdir().unwrap();
    let relay = start_relay(
        "https://start.spring.io",
        Some(out.path().to_path_buf()),
        Some(gate.clone()),
    )
    .await;
    let mut outcomes = relay.queue.subscribe();

    // The picker is parked on the gate, yet the response arrives.
    let resp = tokio::time::timeout(
        Duration::from_secs(5),
        client()
            .get(format!(
                "http://{}/starter.zip?type=maven-project&baseDir=demo",
                relay.addr
            ))
            .send(),
    )
    .await
    .expect("intercept must not wait for the workflow")
    .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT.as_u16());
    assert!(resp.bytes().await.unwrap().is_empty());
    assert_eq!(relay.panel.hides.load(Ordering::SeqCst), 1);
    assert!(relay.fetcher.calls.lock().unwrap().is_empty());

    gate.notify_one();
    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed(out.path().join("demo")));
}

#[tokio::test]
async fn test_end_to_end_download_scenario() {
    let out = tempfile::tempdir().unwrap();
    let relay = start_relay("https://start.spring.io", Some(out.path().to_path_buf()), None).await;
    let mut outcomes = relay.queue.subscribe();

    let resp = client()
        .get(format!(
            "http://{}/starter.zip?type=maven-project&baseDir=demo",
            relay.addr
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.project_name, "demo");

    let calls = relay.fetcher.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(
            "https://start.spring.io/starter.zip?type=maven-project&baseDir=demo".to_string(),
            out.path().to_path_buf()
        )]
    );
    assert_eq!(
        *relay.opener.opened.lock().unwrap(),
        vec![out.path().join("demo")]
    );
    let picker_calls = relay.picker.calls.lock().unwrap().clone();
    assert_eq!(picker_calls[0].1, "Extract project demo to Folder");
    assert_eq!(picker_calls[0].0, std::env::temp_dir());
}

#[tokio::test]
async fn test_existing_project_directory_is_a_conflict() {
    let out = tempfile::tempdir().unwrap();
    std::fs::create_dir(out.path().join("demo")).unwrap();
    std::fs::write(out.path().join("demo/keep.txt"), "mine").unwrap();

    let relay = start_relay("https://start.spring.io", Some(out.path().to_path_buf()), None).await;
    let mut outcomes = relay.queue.subscribe();

    let resp = client()
        .get(format!("http://{}/starter.zip?baseDir=demo", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Conflict);
    assert!(relay.fetcher.calls.lock().unwrap().is_empty());
    assert!(relay.opener.opened.lock().unwrap().is_empty());
    assert_eq!(
        std::fs::read_to_string(out.path().join("demo/keep.txt")).unwrap(),
        "mine"
    );

    let errors = relay.notifier.errors.lock().unwrap().clone();
    assert_eq!(
        errors,
        vec![format!(
            "Project demo folder already exists in {}",
            out.path().display()
        )]
    );
}

#[tokio::test]
async fn test_cancelled_picker_is_silent() {
    let relay = start_relay("https://start.spring.io", None, None).await;
    let mut outcomes = relay.queue.subscribe();

    client()
        .get(format!("http://{}/starter.zip?baseDir=demo", relay.addr))
        .send()
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(relay.notifier.errors.lock().unwrap().is_empty());
    assert!(relay.fetcher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_intercept_without_project_name_skips_workflow() {
    let relay = start_relay("https://start.spring.io", Some(PathBuf::from("/tmp")), None).await;

    let resp = client()
        .get(format!("http://{}/starter.zip?type=maven-project", relay.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 204);
    assert_eq!(relay.panel.hides.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.picker.calls.lock().unwrap().is_empty());
    assert_eq!(relay.metrics.snapshot().extractions.started, 0);
    assert_eq!(relay.metrics.snapshot().intercepted, 1);
}

#[tokio::test]
async fn test_bind_conflict_fails_activation() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let metrics = Arc::new(RelayMetrics::default());
    let workflow = ExtractionWorkflow::new(WorkflowDeps {
        settings: Arc::new(MapSettings::default()),
        picker: Arc::new(FixedPicker {
            answer: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }),
        fetcher: Arc::new(RecordingFetcher::default()),
        opener: Arc::new(RecordingOpener::default()),
        notifier: Arc::new(RecordingNotifier::default()),
    });
    let (queue, _worker) = ExtractionQueue::spawn(workflow, metrics.clone());
    let config = RelayConfig {
        listen_port: port,
        ..Default::default()
    };

    let result = RelayServer::new(config, Arc::new(CountingPanel::default()), queue, metrics)
        .unwrap()
        .bind()
        .await;
    assert!(matches!(result, Err(relay_core::RelayError::Network(_))));
}

#[tokio::test]
async fn test_custom_policy_narrows_interception() {
    let upstream = start_upstream().await;
    let policy = RoutePolicy {
        rules: vec![RouteRule {
            name: "zip-with-name".to_string(),
            enabled: true,
            conditions: vec![
                RuleCondition::Method("GET".to_string()),
                RuleCondition::PathGlob("/*.zip".to_string()),
                RuleCondition::QueryParam("baseDir".to_string()),
            ],
            action: RouteAction::Intercept,
        }],
    };
    let relay = start_relay_with_policy(
        &format!("http://{}", upstream),
        None,
        None,
        Some(policy),
    )
    .await;

    let intercepted = client()
        .get(format!("http://{}/starter.zip?baseDir=demo", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(intercepted.status(), 204);

    // Same path without the name goes to the remote origin.
    let forwarded = client()
        .get(format!("http://{}/starter.zip?type=gradle-project", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(forwarded.status(), 200);
    assert_eq!(forwarded.text().await.unwrap(), "GET ");

    let posted = client()
        .post(format!("http://{}/starter.zip?baseDir=demo", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(posted.status(), 200);

    let snapshot = relay.metrics.snapshot();
    assert_eq!(snapshot.intercepted, 1);
    assert_eq!(snapshot.forwarded, 2);
    assert_eq!(relay.panel.hides.load(Ordering::SeqCst), 1);
}

/// Takes its time, then lays the project directory down like a real unpack.
struct SlowFetcher {
    delay: Duration,
}

#[async_trait]
impl ArchiveFetcher for SlowFetcher {
    async fn fetch_and_extract(
        &self,
        _url: &str,
        destination: &Path,
    ) -> Result<(), ExtractionError> {
        tokio::time::sleep(self.delay).await;
        tokio::fs::create_dir_all(destination.join("demo")).await?;
        Ok(())
    }
}

struct FailingFetcher;

#[async_trait]
impl ArchiveFetcher for FailingFetcher {
    async fn fetch_and_extract(&self, _url: &str, _dest: &Path) -> Result<(), ExtractionError> {
        Err(ExtractionError::Fetch("boom".to_string()))
    }
}

fn queue_with_fetcher(
    out: &Path,
    fetcher: Arc<dyn ArchiveFetcher>,
) -> (ExtractionQueue, Arc<RecordingOpener>, Arc<RecordingNotifier>) {
    let opener = Arc::new(RecordingOpener::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = ExtractionWorkflow::new(WorkflowDeps {
        settings: Arc::new(MapSettings::default()),
        picker: Arc::new(FixedPicker {
            answer: Some(out.to_path_buf()),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }),
        fetcher,
        opener: opener.clone(),
        notifier: notifier.clone(),
    });
    let (queue, _worker) = ExtractionQueue::spawn(workflow, Arc::new(RelayMetrics::default()));
    (queue, opener, notifier)
}

async fn recv_outcome(outcomes: &mut broadcast::Receiver<JobOutcome>) -> JobOutcome {
    tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .expect("job should finish")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_jobs_for_same_project() {
    let out = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(SlowFetcher {
        delay: Duration::from_millis(200),
    });
    let (queue, opener, notifier) = queue_with_fetcher(out.path(), fetcher);
    let mut outcomes = queue.subscribe();

    let url = "https://start.spring.io/starter.zip?baseDir=demo";
    queue.submit(ExtractionJob::new("demo", url)).unwrap();
    queue.submit(ExtractionJob::new("demo", url)).unwrap();

    let mut statuses = vec![
        recv_outcome(&mut outcomes).await.status,
        recv_outcome(&mut outcomes).await.status,
    ];
    statuses.sort_by_key(|status| matches!(status, JobStatus::Conflict));
    assert_eq!(
        statuses,
        vec![
            JobStatus::Completed(out.path().join("demo")),
            JobStatus::Conflict
        ]
    );

    assert_eq!(opener.opened.lock().unwrap().len(), 1);
    assert_eq!(
        *notifier.errors.lock().unwrap(),
        vec![format!(
            "Project demo folder already exists in {}",
            out.path().display()
        )]
    );
}

#[tokio::test]
async fn test_fetch_failure_is_reported_quietly() {
    let out = tempfile::tempdir().unwrap();
    let (queue, opener, notifier) = queue_with_fetcher(out.path(), Arc::new(FailingFetcher));
    let mut outcomes = queue.subscribe();

    queue
        .submit(ExtractionJob::new(
            "demo",
            "https://start.spring.io/starter.zip?baseDir=demo",
        ))
        .unwrap();

    let outcome = recv_outcome(&mut outcomes).await;
    assert_eq!(
        outcome.status,
        JobStatus::Failed("archive download failed: boom".to_string())
    );
    assert!(opener.opened.lock().unwrap().is_empty());
    assert!(notifier.errors.lock().unwrap().is_empty());
    assert!(!out.path().join("demo").exists());
}
