use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::ImageFormat;
use reqwest::blocking::Client as HttpClient;
use serde_json::{Map, Value};
use smile_contracts::controller::FALLBACK_ERROR_MESSAGE;
use smile_contracts::events::EventWriter;
use smile_contracts::{
    Download, Notification, NotificationLevel, Phase, RelayClient, SelectedFile,
    TransformRequest, TransformResponse, UploadController,
};
use smile_engine::config::non_empty_env;
use smile_engine::server::{serve, TRANSFORM_ROUTE};
use smile_engine::{
    GeminiProvider, OpenAiProvider, ProviderKind, Relay, RelayConfig, ServerConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_RELAY_BASE: &str = "http://127.0.0.1:8787";

#[derive(Debug, Parser)]
#[command(name = "smile-rs", version, about = "Teeth transform relay and client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay HTTP server.
    Serve(ServeArgs),
    /// Upload a photo to a relay and save the transformed smile.
    Transform(TransformArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Parser)]
struct TransformArgs {
    #[arg(long)]
    image: PathBuf,
    /// Relay endpoint; defaults to SMILE_RELAY_URL or the local server.
    #[arg(long)]
    relay: Option<String>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    regenerate: u32,
    #[arg(long, default_value_t = 180)]
    timeout_secs: u64,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("smile-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            init_tracing("info");
            run_serve(args)?;
            Ok(0)
        }
        Command::Transform(args) => {
            init_tracing("warn");
            run_transform(args)
        }
    }
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let kind = match args.provider.as_deref() {
        Some(raw) => raw.parse()?,
        None => ProviderKind::from_env()?,
    };
    let mut config = RelayConfig::from_env(kind)?;
    if let Some(model) = args.model {
        config.profile.model = model;
    }
    let mut server = ServerConfig::from_env()?;
    if let Some(bind) = args.bind {
        server.bind = bind;
    }
    if let Some(max_body_bytes) = args.max_body_bytes {
        server.max_body_bytes = max_body_bytes;
    }

    match config.api_key.as_ref() {
        Some(key) => info!(
            provider = kind.name(),
            model = %config.profile.model,
            key = %key.fingerprint(),
            "provider credential loaded"
        ),
        None => warn!(
            provider = kind.name(),
            "no provider credential configured; every transform will fail"
        ),
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    match kind {
        ProviderKind::Gemini => {
            let relay = Relay::with_http(GeminiProvider::new(config.profile.clone()), &config);
            runtime.block_on(serve(Arc::new(relay), &server))
        }
        ProviderKind::OpenAi => {
            let relay = Relay::with_http(OpenAiProvider::new(config.profile.clone()), &config);
            runtime.block_on(serve(Arc::new(relay), &server))
        }
    }
}

/// Blocking HTTP client for a deployed relay.
struct HttpRelayClient {
    url: String,
    http: HttpClient,
}

impl HttpRelayClient {
    fn new(url: String, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { url, http })
    }

    fn post(&self, request: &TransformRequest) -> Result<(u16, String)> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .with_context(|| format!("relay request failed ({})", self.url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .context("failed reading relay response body")?;
        Ok((status, body))
    }
}

impl RelayClient for HttpRelayClient {
    fn transform(&self, request: &TransformRequest) -> TransformResponse {
        match self.post(request) {
            Ok((status, body)) => TransformResponse::from_http(status, &body),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "relay unreachable");
                TransformResponse::failure(FALLBACK_ERROR_MESSAGE)
            }
        }
    }
}

fn relay_url(explicit: Option<String>) -> String {
    explicit
        .or_else(|| non_empty_env("SMILE_RELAY_URL"))
        .unwrap_or_else(|| format!("{DEFAULT_RELAY_BASE}{TRANSFORM_ROUTE}"))
}

fn run_transform(args: TransformArgs) -> Result<i32> {
    let client = HttpRelayClient::new(
        relay_url(args.relay),
        Duration::from_secs(args.timeout_secs.max(1)),
    )?;
    let events = args
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, Uuid::new_v4().to_string()));

    let mut session = Session {
        controller: UploadController::new(),
        events,
    };
    session.select(SelectedFile::from_path(&args.image)?)?;
    if session.controller.phase() == Phase::Empty {
        return Ok(1);
    }

    for attempt in 0..=args.regenerate {
        if attempt > 0 && session.controller.phase() != Phase::Done {
            break;
        }
        session.transform(&client)?;
    }

    if session.controller.phase() != Phase::Done {
        return Ok(2);
    }
    let Some(download) = session.controller.download() else {
        return Ok(2);
    };
    let path = write_download(&args.out, &download)?;
    session.flush()?;
    println!("{}", path.display());
    Ok(0)
}

/// Controller plus its notification sinks.
struct Session {
    controller: UploadController,
    events: Option<EventWriter>,
}

impl Session {
    fn select(&mut self, file: SelectedFile) -> Result<()> {
        let name = file.name.clone();
        if self.controller.select_file(file) {
            if let Some(original) = self.controller.original() {
                eprintln!(
                    "selected {name} ({}, {} bytes)",
                    original.mime_type(),
                    original.len()
                );
            }
        }
        self.flush()
    }

    fn transform(&mut self, client: &HttpRelayClient) -> Result<()> {
        let Some(pending) = self.controller.begin_transform() else {
            return Ok(());
        };
        eprintln!("{}", self.controller.view().transform_label);
        self.emit_view()?;
        let response = client.transform(&pending.request);
        self.controller.complete_transform(pending.attempt, response);
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        for notification in self.controller.drain_notifications() {
            print_notification(&notification);
            if let Some(events) = self.events.as_ref() {
                events.emit_notification(&notification)?;
            }
        }
        self.emit_view()
    }

    fn emit_view(&self) -> Result<()> {
        let Some(events) = self.events.as_ref() else {
            return Ok(());
        };
        let payload = match serde_json::to_value(self.controller.view())? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        events.emit("state_changed", payload)?;
        Ok(())
    }
}

fn print_notification(notification: &Notification) {
    let marker = match notification.level {
        NotificationLevel::Success => "ok",
        NotificationLevel::Error => "error",
    };
    eprintln!("[{marker}] {}", notification.message);
}

/// Writes the export under `out_dir`. Non-PNG results are re-encoded so the
/// bytes match the `.png` name; undecodable ones are written as received.
fn write_download(out_dir: &Path, download: &Download) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(download.file_name);
    let image = &download.image;

    let bytes = if image.mime_type().eq_ignore_ascii_case("image/png") {
        image.bytes().to_vec()
    } else {
        match image::load_from_memory(image.bytes()) {
            Ok(decoded) => {
                let mut out = Cursor::new(Vec::new());
                decoded
                    .write_to(&mut out, ImageFormat::Png)
                    .context("failed to encode PNG export")?;
                out.into_inner()
            }
            Err(err) => {
                warn!(mime = image.mime_type(), error = %err, "export left in original encoding");
                image.bytes().to_vec()
            }
        }
    };
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
