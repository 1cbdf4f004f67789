//! Stage timing and split throughput metrics.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Stage;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one pipeline run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Split files written
    pub records_written: AtomicU64,

    /// Bytes written into split files
    pub bytes_written: AtomicU64,

    /// Split writes that failed
    pub write_failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage wall time (in microseconds for precision)
    /// Time spent preparing the workspace (microseconds)
    pub prepare_us: AtomicU64,

    /// Time spent splitting (microseconds)
    pub split_us: AtomicU64,

    /// Time spent building and publishing the manifest (microseconds)
    pub manifest_us: AtomicU64,

    /// Time spent in the external counter (microseconds)
    pub count_us: AtomicU64,

    /// Time spent in the external collector (microseconds)
    pub collect_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record one split file of `bytes` bytes.
    pub fn add_record_written(&self, bytes: u64) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a failed split write.
    pub fn add_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record wall time spent in a stage.
    pub fn add_stage_time(&self, stage: Stage, duration: Duration) {
        let counter = match stage {
            Stage::Prepare => &self.prepare_us,
            Stage::Split => &self.split_us,
            Stage::Manifest => &self.manifest_us,
            Stage::Count => &self.count_us,
            Stage::Collect => &self.collect_us,
        };
        counter.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Average wall time per written record.
    pub fn secs_per_record(&self) -> f64 {
        let records = self.records_written.load(Ordering::Relaxed);
        if records > 0 {
            self.elapsed().as_secs_f64() / records as f64
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let secs = |c: &AtomicU64| c.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        MetricsSnapshot {
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            secs_per_record: self.secs_per_record(),
            prepare_secs: secs(&self.prepare_us),
            split_secs: secs(&self.split_us),
            manifest_secs: secs(&self.manifest_us),
            count_secs: secs(&self.count_us),
            collect_secs: secs(&self.collect_us),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub records_written: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub secs_per_record: f64,
    pub prepare_secs: f64,
    pub split_secs: f64,
    pub manifest_secs: f64,
    /// Wall time of the external counter
    pub count_secs: f64,
    /// Wall time of the external collector, build steps included
    pub collect_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Summary ===");
        println!("Total time: {:.2}s", self.elapsed.as_secs_f64());
        println!("Records split: {}", self.records_written);
        println!("Data written: {:.2} MB", self.bytes_written as f64 / (1024.0 * 1024.0));
        println!("Average time per record: {:.3}s", self.secs_per_record);

        let total = self.prepare_secs + self.split_secs + self.manifest_secs + self.count_secs + self.collect_secs;
        if total > 0.0 {
            println!("\n--- Stage Time Breakdown ---");
            for (name, secs) in [
                ("Staging", self.prepare_secs),
                ("Split", self.split_secs),
                ("Manifest", self.manifest_secs),
                ("Counting", self.count_secs),
                ("Collection", self.collect_secs),
            ] {
                println!("{:<11} {:>8.2}s ({:>5.1}%)", format!("{name}:"), secs, secs / total * 100.0);
            }
        }
        println!("========================\n");
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Records: {} ({:.2} MB, {} failed) | Elapsed: {:.2}s ({:.3}s/record) | \
             Time: split {:.2}s | count {:.2}s | collect {:.2}s",
            self.records_written,
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.write_failures,
            self.elapsed.as_secs_f64(),
            self.secs_per_record,
            self.split_secs,
            self.count_secs,
            self.collect_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counters() {
        let metrics = Metrics::new();

        metrics.add_record_written(100);
        metrics.add_record_written(50);
        metrics.add_write_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_written, 2);
        assert_eq!(snapshot.bytes_written, 150);
        assert_eq!(snapshot.write_failures, 1);
    }

    #[test]
    fn test_stage_timing() {
        let metrics = Metrics::new();

        metrics.add_stage_time(Stage::Split, Duration::from_millis(100));
        metrics.add_stage_time(Stage::Count, Duration::from_millis(250));
        metrics.add_stage_time(Stage::Collect, Duration::from_millis(75));
        metrics.add_stage_time(Stage::Collect, Duration::from_millis(25));

        let snapshot = metrics.snapshot();
        assert!((snapshot.split_secs - 0.1).abs() < 0.001);
        assert!((snapshot.count_secs - 0.25).abs() < 0.001);
        assert!((snapshot.collect_secs - 0.1).abs() < 0.001);
        assert_eq!(snapshot.manifest_secs, 0.0);
    }

    #[test]
    fn test_zero_records_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };
        assert_eq!(metrics.secs_per_record(), 0.0);
        assert_eq!(metrics.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_display_and_json() {
        let metrics = Metrics::new();
        metrics.add_record_written(2048);
        let snapshot = metrics.snapshot();

        let display = format!("{}", snapshot);
        assert!(display.contains("Records: 1"));
        assert!(display.contains("0 failed"));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        snapshot.save_to_file(path.to_str().unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["records_written"], 1);
        assert_eq!(json["bytes_written"], 2048);
    }
}
