use core::convert::TryInto;
use std::{
    ffi::CString,
    fs::File,
    io::Read as _,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::dht22;
use embedded_svc::{
    http::{client::Client as HttpClient, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sntp::{EspSntp, SntpConf, SyncStatus},
    sys::esp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use server_monitor_common::{
    build_snapshot,
    config::NetworkConfig,
    fetch::FetchOutcome,
    parse_pem_bundle,
    static_files::{self, DOWNLOAD_ARG, TEXT_PLAIN},
    time_sync::format_clock,
    FieldPublisher, MonitorConfig, RuntimeConfig, SensorReading, TickScheduler, TimeSync,
    DATA_ENDPOINT,
};

const SPIFFS_MOUNT: &str = "/spiffs";
const CA_BUNDLE_FILE: &str = "/spiffs/certs.pem";
const DHT22_PIN: i32 = 4;
const FILE_CHUNK_SIZE: usize = 1024;
const MAX_RESPONSE_BODY: usize = 16 * 1024;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const NTP_SERVER: &str = "ca.pool.ntp.org";

#[derive(Debug, Clone, Copy)]
enum TrustSource {
    GlobalStore,
    CertificateBundle,
}

struct SensorSuite {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    last: SensorReading,
}

struct SecureFetcher {
    trust: TrustSource,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    runtime.monitor.sanitize();
    let config = Arc::new(runtime.monitor);

    if let Err(err) = mount_spiffs() {
        warn!("failed to mount SPIFFS at {SPIFFS_MOUNT}: {err:#}");
    }

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let sensors = match SensorSuite::detect(pins.gpio4.downgrade()) {
        Ok(sensors) => Arc::new(Mutex::new(sensors)),
        Err(err) => halt(&format!("could not find a valid DHT22 sensor: {err:#}")),
    };

    let fetcher = match SecureFetcher::load() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => halt(&format!("no CA certificates available: {err:#}")),
    };

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    let mut sntp_conf = SntpConf::default();
    sntp_conf.servers[0] = NTP_SERVER;
    let sntp = EspSntp::new(&sntp_conf).context("failed to start SNTP")?;

    let server = create_http_server(&config, fetcher.clone(), sensors.clone())?;
    info!(
        "web server started on port {}, open /index.html in a web browser",
        config.http_port
    );

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    let started = Instant::now();
    let mut publisher = FieldPublisher::new();
    let mut ticker = TickScheduler::new(config.tick_interval_ms);
    let mut time_sync = TimeSync::new(config.time_sync_interval_ms);

    loop {
        let now_ms = started.elapsed().as_millis() as u64;

        let synced = time_sync.refresh(now_ms, || {
            (sntp.get_sync_status() == SyncStatus::Completed).then(unix_epoch)
        });
        if let Some(epoch) = synced {
            info!("time set: {}", format_clock(epoch, config.utc_offset_secs));
        }

        if time_sync.is_synced() && ticker.poll(now_ms) {
            run_publish_tick(&config, &fetcher, &sensors, &mut publisher);
        }

        thread::sleep(Duration::from_millis(config.loop_interval_ms));
    }
}

fn run_publish_tick(
    config: &MonitorConfig,
    fetcher: &SecureFetcher,
    sensors: &Mutex<SensorSuite>,
    publisher: &mut FieldPublisher,
) {
    let fetch = fetcher.get(&config.status_url);

    let update = match publisher.on_status(&fetch, || read_sensors(sensors)) {
        Ok(update) => update,
        Err(err) => {
            warn!(
                "skipping tick for field{}: {err} ({} skipped so far)",
                publisher.cursor().number(),
                publisher.skipped()
            );
            return;
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
    match update.publish_url(&config.publish_url) {
        Ok(url) => {
            if !fetcher.get(&url).is_success() {
                warn!("logging service did not accept field{}", update.field.number());
            }
        }
        Err(err) => warn!("invalid publish URL `{}`: {err}", config.publish_url),
    }
}

fn read_sensors(sensors: &Mutex<SensorSuite>) -> SensorReading {
    sensors.lock().unwrap_or_else(PoisonError::into_inner).read()
}

fn create_http_server(
    config: &Arc<MonitorConfig>,
    fetcher: Arc<SecureFetcher>,
    sensors: Arc<Mutex<SensorSuite>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: config.http_port,
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for method in [Method::Get, Method::Post] {
        let config = config.clone();
        let fetcher = fetcher.clone();
        let sensors = sensors.clone();
        server.fn_handler::<anyhow::Error, _>(DATA_ENDPOINT, method, move |req| {
            let reading = read_sensors(&sensors);
            let fetch = fetcher.get(&config.status_url);

            match build_snapshot(&fetch, reading) {
                Ok(body) => {
                    req.into_response(200, Some("OK"), &[("Content-Type", "application/json")])?
                        .write_all(body.as_bytes())?;
                }
                Err(err) => {
                    warn!("data request failed: {err}");
                    req.into_status_response(400)?;
                }
            }
            Ok(())
        })?;
    }

    for method in [Method::Get, Method::Post] {
        server.fn_handler::<anyhow::Error, _>("/*", method, move |req| {
            let (path, query) = req.uri().split_once('?').unwrap_or((req.uri(), ""));
            let path = path.to_string();
            let args = query_args(query);
            let resolved =
                static_files::resolve(&path, static_files::has_arg(&args, DOWNLOAD_ARG));
            info!("requested URI: {path}");

            let file = resolved
                .location(Path::new(SPIFFS_MOUNT))
                .and_then(|location| File::open(location).ok())
                .filter(|file| file.metadata().is_ok_and(|meta| meta.is_file()));

            let Some(mut file) = file else {
                let message =
                    static_files::not_found_message(method_name(method), &path, &args);
                warn!("{message}");
                req.into_response(404, Some("Not Found"), &[("Content-Type", TEXT_PLAIN)])?
                    .write_all(message.as_bytes())?;
                return Ok(());
            };

            let expected = file.metadata()?.len();
            let mut response =
                req.into_response(200, Some("OK"), &[("Content-Type", resolved.content_type)])?;
            let mut chunk = [0_u8; FILE_CHUNK_SIZE];
            let mut sent = 0_u64;
            loop {
                let read = file.read(&mut chunk)?;
                if read == 0 {
                    break;
                }
                response.write_all(&chunk[..read])?;
                sent = sent.saturating_add(read as u64);
            }

            if sent != expected {
                warn!("error streaming file {}: sent {sent} of {expected} bytes", resolved.path);
            }
            Ok(())
        })?;
    }

    Ok(server)
}

fn query_args(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (name.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Post => "POST",
        _ => "GET",
    }
}

impl SensorSuite {
    fn detect(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        let mut suite = Self {
            pin,
            delay: Ets,
            last: SensorReading::new(0.0, 0.0),
        };

        // The DHT22 needs a settle period after power-up before it answers.
        thread::sleep(Duration::from_secs(2));
        let reading = suite
            .sample()
            .ok_or_else(|| anyhow!("no response on GPIO{DHT22_PIN}"))?;
        info!(
            "DHT22 ready on GPIO{DHT22_PIN}: {:.1}°C, {:.1}%",
            reading.temperature_c, reading.relative_humidity
        );
        suite.last = reading;
        Ok(suite)
    }

    /// Current reading, or the last good one if the sensor did not answer.
    fn read(&mut self) -> SensorReading {
        if let Some(reading) = self.sample() {
            self.last = reading;
        }
        self.last
    }

    fn sample(&mut self) -> Option<SensorReading> {
        if let Err(err) = self.pin.set_high() {
            warn!("failed to set DHT22 line high before read: {err:?}");
            return None;
        }

        match dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(raw) => {
                let reading = SensorReading::new(raw.temperature, raw.relative_humidity);
                if reading.is_plausible() {
                    Some(reading)
                } else {
                    warn!("discarding implausible DHT22 reading {reading:?}");
                    None
                }
            }
            Err(err) => {
                warn!("failed to read DHT22 on GPIO{DHT22_PIN}: {err:?}");
                None
            }
        }
    }
}

impl SecureFetcher {
    /// Installs the PEM bundle from flash as the global CA store, falling back
    /// to the certificate bundle compiled into ESP-IDF when no file exists.
    fn load() -> anyhow::Result<Self> {
        let bundle = match std::fs::read_to_string(CA_BUNDLE_FILE) {
            Ok(bundle) => bundle,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no {CA_BUNDLE_FILE}; using the built-in certificate bundle");
                return Ok(Self {
                    trust: TrustSource::CertificateBundle,
                });
            }
            Err(err) => return Err(err).context("failed to read CA bundle"),
        };

        let started = Instant::now();
        let certificates = parse_pem_bundle(&bundle)?;
        let bundle =
            CString::new(bundle).map_err(|_| anyhow!("CA bundle contains a NUL byte"))?;
        let bytes = bundle.as_bytes_with_nul();
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| anyhow!("CA bundle too large"))?;

        esp!(unsafe { esp_idf_svc::sys::esp_tls_set_global_ca_store(bytes.as_ptr(), len) })
            .context("failed to install global CA store")?;

        info!(
            "read {} CA certs into store in {} ms",
            certificates.len(),
            started.elapsed().as_millis()
        );
        Ok(Self {
            trust: TrustSource::GlobalStore,
        })
    }

    fn get(&self, url: &str) -> FetchOutcome {
        info!("contacting server at {url}");
        match self.try_get(url) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("can't make a secure connection to external server: {err:#}");
                FetchOutcome::Failed
            }
        }
    }

    fn try_get(&self, url: &str) -> anyhow::Result<FetchOutcome> {
        let http_conf = match self.trust {
            TrustSource::GlobalStore => HttpClientConfiguration {
                timeout: Some(HTTP_TIMEOUT),
                use_global_ca_store: true,
                ..Default::default()
            },
            TrustSource::CertificateBundle => HttpClientConfiguration {
                timeout: Some(HTTP_TIMEOUT),
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            },
        };

        let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);
        let request = client.request(Method::Get, url, &[])?;
        let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

        let status = response.status();
        info!("HTTP response code: {status}");

        let outcome = FetchOutcome::from_status(status, || {
            read_body(&mut response)
                .map_err(|err| warn!("failed to read response body: {err:#}"))
                .ok()
        });
        if !outcome.is_success() {
            warn!("made a secure connection; server or URL problem?");
        }
        Ok(outcome)
    }
}

fn read_body(response: &mut impl Read) -> anyhow::Result<String> {
    let mut body = Vec::new();
    let mut chunk = [0_u8; FILE_CHUNK_SIZE];

    loop {
        let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
        if read == 0 {
            break;
        }
        if body.len() + read > MAX_RESPONSE_BODY {
            return Err(anyhow!("response body exceeds {MAX_RESPONSE_BODY} bytes"));
        }
        body.extend_from_slice(&chunk[..read]);
    }

    String::from_utf8(body).context("response body is not UTF-8")
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<Box<EspWifi<'static>>> {
    if !network.has_station_credentials() {
        return Err(anyhow!("wifi credentials missing; set WIFI_SSID at build time"));
    }

    let mut esp_wifi = Box::new(EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?);
    let mut wifi = BlockingWifi::wrap(esp_wifi.as_mut(), sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => break,
            Err(err) => {
                warn!("wifi connect attempt {attempt} failed: {err:#}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }
    }

    let ip = wifi.wifi().sta_netif().get_ip_info()?;
    info!("connected to `{}`, IP address {}", network.wifi_ssid, ip.ip);
    drop(wifi);
    Ok(esp_wifi)
}

fn mount_spiffs() -> anyhow::Result<()> {
    let base_path = CString::new(SPIFFS_MOUNT)?;
    let conf = esp_idf_svc::sys::esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: core::ptr::null(),
        max_files: 5,
        format_if_mount_failed: false,
    };

    esp!(unsafe { esp_idf_svc::sys::esp_vfs_spiffs_register(&conf) })?;
    Ok(())
}

fn unix_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn halt(reason: &str) -> ! {
    error!("{reason}; entering deep sleep");
    thread::sleep(Duration::from_millis(100));
    unsafe { esp_idf_svc::sys::esp_deep_sleep_start() }
}
