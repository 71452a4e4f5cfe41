//! Logs upload events for a human watching the terminal.

use chunkup_uploader::UploadEvent;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Logs events until the orchestrator drops its sender.
pub async fn log_events(mut events: mpsc::Receiver<UploadEvent>) {
    let mut last_percent = None;
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Hashing { path } => info!(path = %path.display(), "hashing"),
            UploadEvent::Hashed {
                fingerprint,
                total_count,
                file_size,
            } => info!(
                %fingerprint,
                chunks = total_count,
                size = %format_bytes(file_size),
                "hashed"
            ),
            UploadEvent::Negotiated {
                status,
                needed,
                total_count,
            } => info!(?status, needed, total = total_count, "negotiated"),
            UploadEvent::Progress {
                percent,
                bytes_sent,
                bytes_per_second,
            } => {
                if last_percent == Some(percent) {
                    continue;
                }
                last_percent = Some(percent);
                info!(
                    "{percent:>3}%  {} sent  {}/s",
                    format_bytes(bytes_sent),
                    format_bytes(bytes_per_second as u64)
                );
            }
            UploadEvent::Merging => info!("merging"),
            UploadEvent::Retrying { attempt, error } => warn!(attempt, %error, "retrying"),
            UploadEvent::Completed {
                address,
                deduplicated,
            } => info!(%address, deduplicated, "upload complete"),
            UploadEvent::Failed { error } => warn!(%error, "upload failed"),
        }
    }
}

/// Formats a byte count with a binary unit.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
