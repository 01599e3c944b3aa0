use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

pub const PACKETS_READ: &str = "packets_read";
pub const PACKETS_ROUTED: &str = "packets_routed";
pub const PACKETS_DROPPED: &str = "packets_dropped";
pub const PACKETS_WRITTEN: &str = "packets_written";
pub const FRAMES_DECODED: &str = "frames_decoded";
pub const FRAMES_RATE_DROPPED: &str = "frames_rate_dropped";

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub counters: BTreeMap<String, u64>,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Run metrics shared by the pipeline and its taps. Clones share storage.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn increment(&self, counter: &str, by: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard.counters.entry(counter.to_string()).or_default() += by;
        }
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.inner
            .lock()
            .ok()
            .and_then(|guard| guard.counters.get(counter).copied())
            .unwrap_or(0)
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

/// Records the elapsed time of a stage when dropped.
pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        packets_read = snapshot.counters.get(PACKETS_READ).copied().unwrap_or(0),
        packets_written = snapshot.counters.get(PACKETS_WRITTEN).copied().unwrap_or(0),
        "Transcode metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
    for (counter, value) in &snapshot.counters {
        debug!(counter = counter.as_str(), value, "Counter");
    }
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for (counter, value) in &self.counters {
            output.push_str(&format!("# TYPE bunker_transcode_{counter}_total counter\n"));
            output.push_str(&format!("bunker_transcode_{counter}_total {value}\n"));
        }
        output.push_str("# HELP bunker_transcode_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE bunker_transcode_stage_calls_total counter\n");
        output.push_str(
            "# HELP bunker_transcode_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE bunker_transcode_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP bunker_transcode_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE bunker_transcode_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "bunker_transcode_stage_calls_total{{stage=\"{}\"}} {}\n",
                stage, metrics.calls
            ));
            output.push_str(&format!(
                "bunker_transcode_stage_duration_seconds_total{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "bunker_transcode_stage_duration_seconds_max{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP bunker_transcode_run_duration_seconds Total run duration\n");
        output.push_str("# TYPE bunker_transcode_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "bunker_transcode_run_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
