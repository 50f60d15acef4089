use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use chrono::Utc;
use tokio::{fs::File, io::AsyncReadExt, net::TcpListener, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use server_monitor_common::{
    build_snapshot, parse_pem_bundle,
    static_files::{self, DOWNLOAD_ARG, TEXT_PLAIN},
    time_sync::format_clock,
    FetchOutcome, FieldPublisher, FieldUpdate, MonitorConfig, RuntimeConfig, SensorReading,
    TickScheduler, TimeSync, DATA_ENDPOINT,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const FILE_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Clone)]
struct AppState {
    fetcher: SecureFetcher,
    sensor: Arc<Mutex<SimulatedSensor>>,
    config: Arc<MonitorConfig>,
    web_root: Arc<PathBuf>,
}

#[derive(Clone)]
struct SecureFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Default)]
struct SimulatedSensor {
    samples: u64,
}

struct ConfigStore {
    runtime_path: PathBuf,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime.monitor);
    runtime.monitor.sanitize();
    let config = runtime.monitor;

    info!(
        "config loaded: status=`{}`, tick={}ms, web_root=`{}`",
        config.status_url, config.tick_interval_ms, config.web_root
    );

    // Hardware integration point: the host build has no climate sensor attached.
    info!("using simulated temperature/humidity sensor");

    let fetcher = match SecureFetcher::new(config.ca_bundle_path.as_deref()).await {
        Ok(fetcher) => fetcher,
        Err(err) => {
            error!("trust store unavailable, halting: {err:#}");
            return Err(err);
        }
    };

    let state = AppState {
        fetcher,
        sensor: Arc::new(Mutex::new(SimulatedSensor::default())),
        web_root: Arc::new(PathBuf::from(&config.web_root)),
        config: Arc::new(config),
    };

    spawn_poll_loop(state.clone());

    let port = state.config.http_port;
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web server at {addr}"))?;

    info!("web server started, open http://{addr} in a web browser");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(DATA_ENDPOINT, any(handle_get_data))
        .fallback(handle_static)
        .with_state(state)
}

fn spawn_poll_loop(state: AppState) {
    tokio::spawn(async move {
        let mut publisher = FieldPublisher::new();
        let mut ticker = TickScheduler::new(state.config.tick_interval_ms);
        let mut time_sync = TimeSync::new(state.config.time_sync_interval_ms);
        let mut interval =
            tokio::time::interval(Duration::from_millis(state.config.loop_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            if let Some(epoch) = time_sync.refresh(now_ms, system_epoch) {
                debug!(
                    "time set: {}",
                    format_clock(epoch, state.config.utc_offset_secs)
                );
            }

            // Certificate validity checks need a clock.
            if !time_sync.is_synced() {
                continue;
            }

            if ticker.poll(now_ms) {
                run_publish_tick(&state, &mut publisher).await;
            }
        }
    });
}

async fn run_publish_tick(state: &AppState, publisher: &mut FieldPublisher) -> Option<FieldUpdate> {
    let fetch = state.fetcher.get(&state.config.status_url).await;

    let update = match publisher.on_status(&fetch, || state.read_sensor()) {
        Ok(update) => update,
        Err(err) => {
            warn!(
                "skipping tick for field{}: {err} ({} skipped so far)",
                publisher.cursor().number(),
                publisher.skipped()
            );
            return None;
        }
    };

    info!(
        "publishing field{} ({}) = {} [published={}, skipped={}]",
        update.field.number(),
        update.field.as_str(),
        update.value,
        publisher.published(),
        publisher.skipped()
    );
    match update.publish_url(&state.config.publish_url) {
        Ok(url) => {
            if !state.fetcher.get(&url).await.is_success() {
                warn!("logging service did not accept field{}", update.field.number());
            }
        }
        Err(err) => warn!("invalid publish URL `{}`: {err}", state.config.publish_url),
    }
    Some(update)
}

async fn handle_get_data(State(state): State<AppState>) -> Response {
    let reading = state.read_sensor();
    let fetch = state.fetcher.get(&state.config.status_url).await;

    match build_snapshot(&fetch, reading) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            warn!("data request failed: {err}");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn handle_static(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(args): Query<Vec<(String, String)>>,
) -> Response {
    let resolved = static_files::resolve(uri.path(), static_files::has_arg(&args, DOWNLOAD_ARG));
    info!("requested URI: {}", uri.path());

    if let Some(location) = resolved.location(&state.web_root) {
        match open_file(&location).await {
            Ok(Some((file, expected))) => {
                let body = stream_file(file, resolved.path, expected);
                return ([(header::CONTENT_TYPE, resolved.content_type)], body).into_response();
            }
            Ok(None) => {}
            Err(err) => warn!("failed to read {}: {err}", location.display()),
        }
    }

    let message = static_files::not_found_message(method.as_str(), uri.path(), &args);
    warn!("{message}");
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        message,
    )
        .into_response()
}

/// Open file and its length, or `None` if there is no regular file there.
async fn open_file(location: &Path) -> std::io::Result<Option<(File, u64)>> {
    let file = match File::open(location).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(Some((file, metadata.len())))
}

/// Streams `file` in chunks, counting the bytes handed to the response. A
/// count that differs from `expected` at end of file is logged; the response
/// itself is not failed.
fn stream_file(file: File, path: String, expected: u64) -> Body {
    let chunks = futures_util::stream::unfold(Some((file, 0_u64)), move |state| {
        let path = path.clone();
        async move {
            let (mut file, sent) = state?;
            let mut chunk = vec![0_u8; FILE_CHUNK_SIZE];
            match file.read(&mut chunk).await {
                Ok(0) => {
                    if sent != expected {
                        warn!("error streaming file {path}: sent {sent} of {expected} bytes");
                    }
                    None
                }
                Ok(read) => {
                    chunk.truncate(read);
                    Some((Ok(chunk), Some((file, sent + read as u64))))
                }
                Err(err) => {
                    warn!("error streaming file {path} after {sent} of {expected} bytes: {err}");
                    Some((Err(err), None))
                }
            }
        }
    });

    Body::from_stream(chunks)
}

impl AppState {
    fn read_sensor(&self) -> SensorReading {
        self.sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read()
    }
}

impl SecureFetcher {
    async fn new(ca_bundle_path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);

        if let Some(path) = ca_bundle_path {
            let started = Instant::now();
            let bundle = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read CA bundle `{path}`"))?;
            let certificates = parse_pem_bundle(&bundle)
                .with_context(|| format!("no usable CA certificates in `{path}`"))?;

            builder = builder.tls_built_in_root_certs(false);
            for der in &certificates {
                let certificate = reqwest::Certificate::from_der(der)
                    .context("invalid CA certificate in bundle")?;
                builder = builder.add_root_certificate(certificate);
            }

            info!(
                "read {} CA certs into store in {} ms",
                certificates.len(),
                started.elapsed().as_millis()
            );
        }

        let client = builder.build().context("failed to build HTTPS client")?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> FetchOutcome {
        info!("contacting server at {url}");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("can't make a secure connection to external server: {err}");
                return FetchOutcome::Failed;
            }
        };

        let status = response.status().as_u16();
        info!("HTTP response code: {status}");

        let body = response
            .text()
            .await
            .map_err(|err| warn!("failed to read response body: {err}"))
            .ok();
        let outcome = FetchOutcome::from_status(status, || body);
        if !outcome.is_success() {
            warn!("made a secure connection; server or URL problem?");
        }
        outcome
    }
}

impl SimulatedSensor {
    fn read(&mut self) -> SensorReading {
        self.samples = self.samples.saturating_add(1);
        let temperature_c = 21.0 + ((self.samples % 8) as f32 * 0.2);
        let humidity = 42.0 + ((self.samples % 6) as f32 * 0.5);
        SensorReading::new(temperature_c, humidity)
    }
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("MONITOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.monitor"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn apply_env_overrides(config: &mut MonitorConfig) {
    if let Ok(url) = std::env::var("MONITOR_STATUS_URL") {
        config.status_url = url;
    }
    if let Ok(url) = std::env::var("MONITOR_PUBLISH_URL") {
        config.publish_url = url;
    }
    if let Ok(root) = std::env::var("MONITOR_WEB_ROOT") {
        config.web_root = root;
    }
    if let Ok(path) = std::env::var("MONITOR_CA_BUNDLE") {
        config.ca_bundle_path = Some(path);
    }
    if let Some(port) = std::env::var("MONITOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
}

fn system_epoch() -> Option<i64> {
    Some(Utc::now().timestamp())
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
