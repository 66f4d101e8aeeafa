//! Progress Estimator for one streamed transfer.
//!
//! [`TransferSession`] counts every chunk and, at most every
//! [`SAMPLE_INTERVAL`], derives a [`ProgressSnapshot`]. Only publishing is
//! throttled; counting never is. Time is passed in by the caller so the
//! estimator stays deterministic under test.

use std::time::{Duration, Instant};

use serde::Serialize;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
const BYTES_PER_MB: f64 = 1_048_576.0;

/// Display values for one sampling tick. Replaced wholesale on every publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// `None` when the total size is unknown; never a fake `0`.
    pub percentage: Option<u8>,
    pub throughput_label: String,
    pub size_label: String,
    pub eta_label: String,
}

/// Live state of one in-flight download.
#[derive(Debug, Clone)]
pub struct TransferSession {
    total_bytes: u64,
    bytes_received: u64,
    started_at: Instant,
    last_sample_at: Instant,
}

impl TransferSession {
    /// `total_bytes` comes from the declared content length; absent or zero
    /// means unknown.
    pub fn start(total_bytes: Option<u64>, now: Instant) -> Self {
        Self {
            total_bytes: total_bytes.unwrap_or(0),
            bytes_received: 0,
            started_at: now,
            last_sample_at: now,
        }
    }

    pub fn total_bytes(&self) -> Option<u64> {
        (self.total_bytes > 0).then_some(self.total_bytes)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Counts `len` bytes and returns a snapshot when more than
    /// [`SAMPLE_INTERVAL`] passed since the previous one.
    pub fn record_chunk(&mut self, len: usize, now: Instant) -> Option<ProgressSnapshot> {
        self.bytes_received = self.bytes_received.saturating_add(len as u64);
        if now.saturating_duration_since(self.last_sample_at) <= SAMPLE_INTERVAL {
            return None;
        }
        let snapshot = self.sample(now)?;
        self.last_sample_at = now;
        Some(snapshot)
    }

    /// Computes a snapshot for `now` without touching the sampling clock.
    /// Returns `None` when no time has elapsed yet.
    pub fn sample(&self, now: Instant) -> Option<ProgressSnapshot> {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let throughput = self.bytes_received as f64 / elapsed;
        let total = self.total_bytes();

        Some(ProgressSnapshot {
            percentage: total.map(|total| percentage(self.bytes_received, total)),
            throughput_label: format_throughput(throughput),
            size_label: format_size(self.bytes_received, total),
            eta_label: format_eta(
                total.and_then(|total| eta_seconds(self.bytes_received, total, throughput)),
            ),
        })
    }
}

/// `round(100 * received / total)` with halves rounded up, clamped to 100.
/// Integer math keeps it monotonic in `received`.
pub fn percentage(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let received = u128::from(received.min(total));
    let total = u128::from(total);
    ((200 * received + total) / (2 * total)) as u8
}

pub fn eta_seconds(received: u64, total: u64, bytes_per_second: f64) -> Option<u64> {
    if total == 0 || !(bytes_per_second > 0.0) {
        return None;
    }
    let remaining = total.saturating_sub(received) as f64;
    Some((remaining / bytes_per_second).round() as u64)
}

pub fn format_eta(seconds: Option<u64>) -> String {
    let Some(seconds) = seconds else {
        return "Estimating time remaining...".to_string();
    };
    if seconds > 60 {
        let minutes = seconds / 60;
        let rest = seconds % 60;
        format!(
            "~{minutes} {} {rest} {} remaining",
            plural(minutes, "minute"),
            plural(rest, "second")
        )
    } else {
        format!("~{seconds} {} remaining", plural(seconds, "second"))
    }
}

fn plural(count: u64, word: &str) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

pub fn format_throughput(bytes_per_second: f64) -> String {
    format!("{:.1} MB/s", bytes_per_second / BYTES_PER_MB)
}

pub fn format_size(received: u64, total: Option<u64>) -> String {
    let received_mb = received as f64 / BYTES_PER_MB;
    match total {
        Some(total) => format!("{received_mb:.1} MB / {:.1} MB", total as f64 / BYTES_PER_MB),
        None => format!("{received_mb:.1} MB / unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_048_576;

    #[test]
    fn percentage_stays_in_range_and_never_decreases() {
        for total in [1u64, 3, 7, 100, 999, 10 * MB + 17] {
            let mut previous = 0;
            let step = (total / 97).max(1);
            let mut received = 0;
            while received <= total {
                let value = percentage(received, total);
                assert!(value <= 100);
                assert!(value >= previous, "dropped at {received}/{total}");
                previous = value;
                received += step;
            }
            assert_eq!(percentage(total, total), 100);
        }
    }

    #[test]
    fn percentage_rounds_halves_up() {
        assert_eq!(percentage(1, 200), 1);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(15, 10), 100);
    }

    #[test]
    fn unknown_total_is_indeterminate() {
        let start = Instant::now();
        let mut session = TransferSession::start(None, start);
        let snapshot = session
            .record_chunk(5 * MB as usize, start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(snapshot.percentage, None);
        assert_eq!(snapshot.eta_label, "Estimating time remaining...");
        assert_eq!(snapshot.size_label, "5.0 MB / unknown");
        assert_eq!(snapshot.throughput_label, "5.0 MB/s");

        let zero_total = TransferSession::start(Some(0), start);
        assert!(zero_total.total_bytes().is_none());
    }

    #[test]
    fn eta_labels_switch_wording_after_a_minute() {
        assert_eq!(format_eta(Some(45)), "~45 seconds remaining");
        assert_eq!(format_eta(Some(90)), "~1 minute 30 seconds remaining");
        assert_eq!(format_eta(Some(61)), "~1 minute 1 second remaining");
        assert_eq!(format_eta(Some(1)), "~1 second remaining");
        assert_eq!(format_eta(Some(60)), "~60 seconds remaining");
        assert_eq!(format_eta(Some(125)), "~2 minutes 5 seconds remaining");
    }

    #[test]
    fn eta_is_undefined_without_throughput() {
        assert_eq!(eta_seconds(0, 100, 0.0), None);
        assert_eq!(eta_seconds(10, 0, 5.0), None);
        assert_eq!(eta_seconds(50, 100, 10.0), Some(5));
        assert_eq!(eta_seconds(150, 100, 10.0), Some(0));
    }

    #[test]
    fn size_label_uses_binary_megabytes() {
        assert_eq!(format_size(5_242_880, Some(10_485_760)), "5.0 MB / 10.0 MB");
        assert_eq!(format_throughput(1.5 * MB as f64), "1.5 MB/s");
    }

    #[test]
    fn publish_is_throttled_to_the_sample_interval() {
        let start = Instant::now();
        let mut session = TransferSession::start(Some(10 * MB), start);
        assert!(session.record_chunk(1024, start).is_none());
        assert!(
            session
                .record_chunk(1024, start + Duration::from_millis(499))
                .is_none()
        );
        assert!(session.record_chunk(1024, start + SAMPLE_INTERVAL).is_none());
        assert!(
            session
                .record_chunk(1024, start + Duration::from_millis(501))
                .is_some()
        );
        // the interval restarts from the last publish
        assert!(
            session
                .record_chunk(1024, start + Duration::from_millis(900))
                .is_none()
        );
        assert!(
            session
                .record_chunk(1024, start + Duration::from_millis(1002))
                .is_some()
        );
    }

    #[test]
    fn counted_total_matches_chunk_sum_regardless_of_throttle() {
        let start = Instant::now();
        let mut session = TransferSession::start(Some(10 * MB), start);
        let mut expected = 0u64;
        let mut published = 0;
        for i in 0..5_000u64 {
            let len = (i % 13 + 1) as usize * 7;
            expected += len as u64;
            if session
                .record_chunk(len, start + Duration::from_millis(i))
                .is_some()
            {
                published += 1;
            }
        }
        assert_eq!(session.bytes_received(), expected);
        assert!(published > 0 && published < 10);
    }

    #[test]
    fn snapshot_combines_all_labels() {
        let start = Instant::now();
        let mut session = TransferSession::start(Some(10 * MB), start);
        let snapshot = session
            .record_chunk(5 * MB as usize, start + Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            snapshot,
            ProgressSnapshot {
                percentage: Some(50),
                throughput_label: "1.0 MB/s".into(),
                size_label: "5.0 MB / 10.0 MB".into(),
                eta_label: "~5 seconds remaining".into(),
            }
        );
    }

    #[test]
    fn sample_skips_zero_elapsed_time() {
        let start = Instant::now();
        let session = TransferSession::start(Some(100), start);
        assert!(session.sample(start).is_none());
    }
}
