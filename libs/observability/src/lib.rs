// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Observability crate for logging.

use std::{
    fmt,
    io::IsTerminal,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use http::Request;
use rand::{RngCore, SeedableRng, rng};
use rand_chacha::ChaChaRng;
use serde::Serialize;
use tower_http::{
    LatencyUnit,
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{DefaultOnFailure, DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Span, Subscriber, subscriber::SetGlobalDefaultError};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::time::UtcTime, prelude::*, registry::LookupSpan,
};

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Name used for log files and bunyan records if the executable name is unavailable.
const FALLBACK_APP_NAME: &str = "libnetwork-plugin";

/// Output format of log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// Bunyan JSON records, one per line.
    Json,
}

/// Setup logging using the tracing library.
///
/// # Arguments
///
/// * `log_dir`: If provided, logs are written to a file that carries the name of the current
///   executable in this directory.
/// * `log_to_stderr`: If true, logs will additionally printed to stderr.
/// * `format`: Output format for all writers.
///
/// The returned guards flush the writers when dropped and must be held for the lifetime of
/// the process.
pub fn setup_tracing<P: AsRef<Path>>(
    log_dir: Option<P>,
    log_to_stderr: bool,
    format: LogFormat,
) -> Result<Vec<WorkerGuard>, SetGlobalDefaultError> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers = vec![JsonStorageLayer.boxed()];

    if let Some(log_dir) = log_dir {
        let log_file =
            tracing_appender::rolling::never(log_dir.as_ref(), format!("{}.log", exec_name()));
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(log_file);
        let file_logger = formatted_layer(non_blocking_writer, format, false)
            .with_filter(tracing::level_filters::LevelFilter::DEBUG);
        layers.push(file_logger.boxed());
        guards.push(file_guard);
    }

    if log_to_stderr {
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        // Enable colors if the stderr is a terminal.
        let stderr_logger =
            formatted_layer(non_blocking_writer, format, std::io::stderr().is_terminal())
                .with_filter(log_level);
        layers.push(stderr_logger.boxed());
        guards.push(guard);
    }

    // global subscriber
    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!(?format, "Logging initialized!");
    Ok(guards)
}

fn formatted_layer<S>(
    writer: NonBlocking,
    format: LogFormat,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt::layer()
                .with_ansi(ansi)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed()
        }
        LogFormat::Json => BunyanFormattingLayer::new(exec_name(), writer).boxed(),
    }
}

/// Direction of a logged plugin message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Received from the container engine.
    Request,
    /// Sent back to the container engine.
    Response,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::Request => write!(f, "request"),
            MessageDirection::Response => write!(f, "response"),
        }
    }
}

/// Logs a protocol message as JSON at debug level.
///
/// Serialization is skipped entirely when debug logging is disabled.
///
/// Messages are logged within the current span, so the request span of
/// [info_trace_layer] identifies the method.
pub fn log_json_message<T: Serialize + ?Sized>(direction: MessageDirection, message: &T) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    match serde_json::to_string(message) {
        Ok(json) => tracing::debug!(%direction, %json, "Plugin message"),
        Err(e) => tracing::debug!(%direction, "Plugin message is not serializable: {e}"),
    }
}

/// Trace layer that logs at info level and uses random span ids.
pub fn info_trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RandomSpans> {
    let lvl = tracing::Level::INFO;
    let trace_id_seed = rng().next_u64();
    let latency_unit = LatencyUnit::Micros;

    TraceLayer::new_for_http()
        .make_span_with(RandomSpans::new(trace_id_seed))
        .on_failure(
            DefaultOnFailure::new()
                .latency_unit(latency_unit)
                .level(lvl),
        )
        .on_response(
            DefaultOnResponse::new()
                .latency_unit(latency_unit)
                .level(lvl),
        )
}

/// Random span generator.
#[derive(Clone)]
pub struct RandomSpans {
    counter: Arc<Mutex<ChaChaRng>>,
}

impl RandomSpans {
    fn new(seed: u64) -> Self {
        Self {
            counter: Arc::new(Mutex::new(ChaChaRng::seed_from_u64(seed))),
        }
    }
}

impl<B> MakeSpan<B> for RandomSpans {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let cur = self
            .counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_u64();
        let span_id = format!("{cur:016x}");
        tracing::span!(
            tracing::Level::INFO,
            "request",
            span_id = span_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

/// Name of the executable that is currently running.
fn exec_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_APP_NAME.to_string())
}
