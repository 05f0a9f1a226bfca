//! Logging and event bus demonstration
//!
//! Simulates a download lifecycle and shows how it looks in each log format.
//!
//! Run with:
//! ```bash
//! cargo run -p core-runtime --example logging_demo
//! cargo run -p core-runtime --example logging_demo -- json
//! cargo run -p core-runtime --example logging_demo -- compact "core_runtime=trace"
//! ```

use bridge_traits::time::LogLevel;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, EventStream};
use core_runtime::logging::{init_logging, redact_url, strip_path, LogFormat, LoggingConfig};
use std::env;
use tracing::{debug, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace);

    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    init_logging(config)?;
    info!(format = ?format, "Logging initialized");

    let bus = EventBus::default();
    let mut downloads =
        EventStream::new(bus.subscribe()).filter(|e| matches!(e, CoreEvent::Download(_)));

    let printer = tokio::spawn(async move {
        while let Ok(event) = downloads.recv().await {
            info!(
                severity = ?event.severity(),
                content_id = ?event.content_id(),
                "{}",
                event.description()
            );
            if matches!(event, CoreEvent::Download(DownloadEvent::Completed { .. })) {
                break;
            }
        }
    });

    simulate_download(&bus, "m1", 4 * 1024 * 1024).await;
    printer.await.ok();

    Ok(())
}

#[instrument(skip(bus))]
async fn simulate_download(bus: &EventBus, content_id: &str, total: u64) {
    let source = "https://cdn.example.com/media/m1.mp4?Expires=1700000000&Signature=abc";
    let staging = "/home/jo/.cache/offline-media-core/staging/6d31.part";

    info!(
        source_url = %redact_url(source),
        staging = %strip_path(staging),
        "Starting transfer"
    );

    for step in 1..=4u64 {
        let bytes = total * step / 4;
        debug!(bytes, total, "Chunk written");
        bus.emit(CoreEvent::Download(DownloadEvent::Progress {
            content_id: content_id.to_string(),
            bytes_transferred: bytes,
            total_bytes: Some(total),
        }))
        .ok();
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    warn!("Server ignored Range header on a previous attempt; restarted from zero");

    bus.emit(CoreEvent::Download(DownloadEvent::Completed {
        content_id: content_id.to_string(),
        size_bytes: total,
    }))
    .ok();
}
