use tracing::{debug, trace};

use crate::chain::{Consumer, Outlet, Producer};
use crate::engine::{MediaEngine, SampleConverter};
use crate::error::{Result, TranscodeError};
use crate::media::{AudioParameters, Frame, FrameData};
use crate::transform::fifo::AudioFifo;

/// Converts decoded audio to the encoder's format and re-blocks it into
/// encoder-sized frames.
///
/// Output frames carry a running sample count as pts, in `1/sample_rate`.
pub struct AudioResampler {
    converter: Box<dyn SampleConverter>,
    output: AudioParameters,
    frame_size: usize,
    fifo: AudioFifo,
    outlet: Outlet<Frame>,
    stream_index: usize,
    next_pts: i64,
    frames_out: u64,
}

impl AudioResampler {
    /// `frame_size` of zero forwards whatever is buffered after each input.
    pub fn open(
        engine: &dyn MediaEngine,
        input: &AudioParameters,
        output: &AudioParameters,
        frame_size: usize,
    ) -> Result<Self> {
        if input.sample_rate != output.sample_rate {
            return Err(TranscodeError::unsupported_conversion(format!(
                "resampling {} Hz to {} Hz is not supported",
                input.sample_rate, output.sample_rate
            )));
        }
        let converter = engine.open_resampler(input, output)?;
        debug!(
            from_format = %input.sample_format,
            from_layout = %input.channel_layout.name(),
            to_format = %output.sample_format,
            to_layout = %output.channel_layout.name(),
            sample_rate = output.sample_rate,
            frame_size,
            "resampler opened"
        );
        Ok(Self {
            converter,
            output: output.clone(),
            frame_size,
            fifo: AudioFifo::new(
                output.sample_format,
                output.channel_layout,
                output.sample_rate,
            ),
            outlet: Outlet::new(),
            stream_index: 0,
            next_pts: 0,
            frames_out: 0,
        })
    }

    pub fn output(&self) -> &AudioParameters {
        &self.output
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.fifo.size()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_out
    }

    /// Publishes full blocks; with `force`, the short remainder as well.
    pub fn drain(&mut self, force: bool) -> Result<()> {
        loop {
            let size = self.fifo.size();
            let block = if self.frame_size == 0 {
                size
            } else {
                self.frame_size
            };
            if size == 0 || !(size >= block || force) {
                return Ok(());
            }
            let Some(samples) = self.fifo.read(block)? else {
                return Ok(());
            };
            let nb_samples = samples.nb_samples as i64;
            let mut frame = Frame::new(self.stream_index, FrameData::Audio(samples));
            frame.pts = self.next_pts;
            frame.best_effort_timestamp = self.next_pts;
            frame.duration = nb_samples;
            self.next_pts += nb_samples;
            self.frames_out += 1;
            trace!(pts = frame.pts, samples = nb_samples, force, "resampled frame");
            self.outlet.publish(&frame)?;
        }
    }
}

impl Producer<Frame> for AudioResampler {
    fn outlet(&mut self) -> &mut Outlet<Frame> {
        &mut self.outlet
    }
}

impl Consumer<Frame> for AudioResampler {
    fn accept(&mut self, frame: &Frame) -> Result<()> {
        let samples = frame
            .audio()
            .ok_or_else(|| TranscodeError::invalid_state("resampler received a video frame"))?;
        if samples.sample_rate != self.output.sample_rate {
            return Err(TranscodeError::unsupported_conversion(format!(
                "frame at {} Hz cannot feed a {} Hz encoder",
                samples.sample_rate, self.output.sample_rate
            )));
        }
        self.stream_index = frame.stream_index;
        let converted = self.converter.convert(samples)?;
        self.fifo.write(&converted)?;
        self.drain(false)
    }

    fn finish(&mut self) -> Result<()> {
        self.drain(true)?;
        self.outlet.finish()
    }
}
