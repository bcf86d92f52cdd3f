//! Transfer progress display with progress bars.

use fragnet_core::progress::channel;
use fragnet_core::{EventReceiver, EventSender, TransferEvent, TransferProgress};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar driven by orchestrator events
pub struct ProgressDisplay {
    bar: ProgressBar,
    task: JoinHandle<TransferProgress>,
}

impl ProgressDisplay {
    /// Start rendering events for a transfer of `total_bytes`
    ///
    /// Returns the display and the sender to hand to the orchestrator. The
    /// total may be zero when unknown; it is filled in from events.
    #[must_use]
    pub fn start(total_bytes: u64, label: &str) -> (Self, EventSender) {
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        let (tx, rx) = channel();
        let task = tokio::spawn(render(rx, bar.clone(), label.to_string()));
        (Self { bar, task }, tx)
    }

    /// Wait for the event stream to end and finish the bar
    ///
    /// The orchestrator's sender must be dropped first.
    pub async fn finish(self, msg: String) -> TransferProgress {
        let progress = self.task.await.unwrap_or_default();
        self.bar.finish_with_message(msg);
        progress
    }

    /// Abandon the bar (for errors)
    pub fn abandon(self) {
        self.task.abort();
        self.bar.abandon();
    }
}

async fn render(mut rx: EventReceiver, bar: ProgressBar, label: String) -> TransferProgress {
    let mut progress = TransferProgress::new();
    while let Some(event) = rx.recv().await {
        progress.apply(&event);
        match event {
            TransferEvent::FragmentStored { .. } | TransferEvent::FragmentFetched { .. } => {
                if progress.bytes_done > bar.length().unwrap_or(0) {
                    bar.set_length(progress.bytes_done);
                }
                bar.set_position(progress.bytes_done);
            }
            TransferEvent::FragmentState { .. } => {
                if progress.fragments_finalized > 0 {
                    bar.set_message(format!(
                        "{label} ({}/{} finalized)",
                        progress.fragments_finalized, progress.fragments_total
                    ));
                }
            }
            TransferEvent::UploadStarted { bytes, .. } => {
                bar.set_length(bytes);
            }
            TransferEvent::DownloadStarted { .. } => {}
        }
    }
    progress
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragnet_files::RootHash;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(20 * 1024 * 1024), "20.00 MB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[tokio::test]
    async fn test_display_folds_events() {
        let (display, tx) = ProgressDisplay::start(0, "test");
        tx.send(TransferEvent::UploadStarted {
            fragments: 2,
            bytes: 30,
        })
        .unwrap();
        for index in 0..2 {
            tx.send(TransferEvent::FragmentStored {
                index,
                root: RootHash::from_bytes([index as u8; 32]),
                replicas: 1,
                bytes: 15,
            })
            .unwrap();
        }
        drop(tx);

        let progress = display.finish("done".to_string()).await;
        assert_eq!(progress.fragments_done, 2);
        assert_eq!(progress.bytes_done, 30);
        assert!(progress.is_complete());
    }
}
