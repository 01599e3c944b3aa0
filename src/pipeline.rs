//! The pull loop that drives a wired stage graph.
//!
//! One thread pulls packets from the demuxer and pushes each through the
//! chain registered for its stream index before pulling the next one.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, info_span, instrument, trace, warn};

use crate::chain::{Consumer, Outlet, Shared};
use crate::demux::Demuxer;
use crate::error::Result;
use crate::media::Packet;
use crate::mux::{Muxer, MuxerState};
use crate::observability::{
    MetricsCollector, PACKETS_DROPPED, PACKETS_READ, PACKETS_ROUTED, PACKETS_WRITTEN,
};

/// Counts gathered by one [`Pipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub packets_read: u64,
    pub packets_routed: u64,
    pub packets_dropped: u64,
    /// Packets muxed per output stream index.
    pub packets_written: Vec<u64>,
    pub trailer_written: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct Pipeline {
    demuxer: Demuxer,
    muxer: Shared<Muxer>,
    routes: BTreeMap<usize, Outlet<Packet>>,
    metrics: MetricsCollector,
    summary: PipelineSummary,
}

impl Pipeline {
    pub fn new(demuxer: Demuxer, muxer: Shared<Muxer>) -> Self {
        Self {
            demuxer,
            muxer,
            routes: BTreeMap::new(),
            metrics: MetricsCollector::new(),
            summary: PipelineSummary::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    pub fn muxer(&self) -> &Shared<Muxer> {
        &self.muxer
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Sends packets of input stream `stream_index` to `consumer`. Routing
    /// the same index twice fans out to both consumers.
    pub fn route(&mut self, stream_index: usize, consumer: impl Consumer<Packet> + 'static) {
        self.routes.entry(stream_index).or_default().connect(consumer);
    }

    pub fn route_boxed(&mut self, stream_index: usize, consumer: Box<dyn Consumer<Packet>>) {
        self.routes
            .entry(stream_index)
            .or_default()
            .connect_boxed(consumer);
    }

    pub fn routed_streams(&self) -> Vec<usize> {
        self.routes.keys().copied().collect()
    }

    /// Runs to the end of the input, flushes every chain and writes the
    /// trailer.
    ///
    /// On failure the stage graph is released and the muxer closed best
    /// effort, so whatever was written stays structurally valid; the
    /// original error is returned.
    #[instrument(name = "pipeline", skip(self), fields(routes = self.routes.len()))]
    pub fn run(mut self) -> Result<PipelineSummary> {
        let started = Instant::now();
        let outcome = self.drive();
        self.demuxer.close();
        self.routes.clear();

        if let Err(err) = outcome {
            warn!(error = %err, "pipeline failed, closing output");
            if let Err(close_err) = self.close_muxer() {
                warn!(error = %close_err, "closing muxer after failure also failed");
            }
            return Err(err);
        }
        self.close_muxer()?;

        self.summary.elapsed = started.elapsed();
        self.metrics.record_total_duration(self.summary.elapsed);
        info!(
            read = self.summary.packets_read,
            routed = self.summary.packets_routed,
            dropped = self.summary.packets_dropped,
            written = self.summary.packets_written.iter().sum::<u64>(),
            elapsed_ms = self.summary.elapsed.as_secs_f64() * 1_000.0,
            "Pipeline finished"
        );
        Ok(self.summary)
    }

    fn drive(&mut self) -> Result<()> {
        {
            let _span = info_span!("pump").entered();
            let _timer = self.metrics.start_stage("pump");
            while let Some(packet) = self.demuxer.next_packet()? {
                self.dispatch(&packet)?;
            }
        }
        {
            let _span = info_span!("flush").entered();
            let _timer = self.metrics.start_stage("flush");
            for outlet in self.routes.values_mut() {
                outlet.finish()?;
            }
        }
        let _timer = self.metrics.start_stage("trailer");
        self.muxer.lock()?.write_trailer()
    }

    fn dispatch(&mut self, packet: &Packet) -> Result<()> {
        self.summary.packets_read += 1;
        self.metrics.increment(PACKETS_READ, 1);
        match self.routes.get_mut(&packet.stream_index) {
            Some(outlet) => {
                self.summary.packets_routed += 1;
                self.metrics.increment(PACKETS_ROUTED, 1);
                outlet.publish(packet)
            }
            None => {
                self.summary.packets_dropped += 1;
                self.metrics.increment(PACKETS_DROPPED, 1);
                trace!(stream = packet.stream_index, "no route, packet dropped");
                Ok(())
            }
        }
    }

    fn close_muxer(&mut self) -> Result<()> {
        let mut muxer = self.muxer.lock()?;
        let result = muxer.close();
        self.summary.packets_written = (0..muxer.streams().len())
            .map(|index| muxer.packets_written(index))
            .collect();
        self.summary.trailer_written = muxer.state() == MuxerState::TrailerWritten;
        self.metrics
            .increment(PACKETS_WRITTEN, muxer.total_packets());
        result
    }
}
