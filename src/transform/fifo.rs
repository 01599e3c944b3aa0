use std::collections::VecDeque;

use crate::error::{Result, TranscodeError};
use crate::media::{AudioSamples, ChannelLayout, SampleFormat};

/// Unbounded sample queue used to re-block audio into encoder-sized frames.
///
/// Each plane holds `size() * stride` bytes at all times, so the queue never
/// contains a partial sample frame.
#[derive(Debug)]
pub struct AudioFifo {
    format: SampleFormat,
    layout: ChannelLayout,
    sample_rate: u32,
    stride: usize,
    planes: Vec<VecDeque<u8>>,
    size: usize,
}

impl AudioFifo {
    pub fn new(format: SampleFormat, layout: ChannelLayout, sample_rate: u32) -> Self {
        let channels = layout.channels();
        Self {
            format,
            layout,
            sample_rate,
            stride: format.plane_stride(channels),
            planes: (0..format.plane_count(channels))
                .map(|_| VecDeque::new())
                .collect(),
            size: 0,
        }
    }

    /// Buffered samples per channel.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Appends every sample of `samples`, which must match the queue layout.
    pub fn write(&mut self, samples: &AudioSamples) -> Result<()> {
        if samples.format != self.format || samples.layout != self.layout {
            return Err(TranscodeError::unsupported_conversion(format!(
                "fifo holds {} {}, got {} {}",
                self.format,
                self.layout.name(),
                samples.format,
                samples.layout.name()
            )));
        }
        let len = samples.nb_samples * self.stride;
        if samples.planes.len() != self.planes.len()
            || samples.planes.iter().any(|plane| plane.len() < len)
        {
            return Err(TranscodeError::invalid_state(
                "audio frame is shorter than its sample count",
            ));
        }
        for queue in &mut self.planes {
            queue
                .try_reserve(len)
                .map_err(|err| TranscodeError::exhausted("audio fifo", err))?;
        }
        for (queue, plane) in self.planes.iter_mut().zip(&samples.planes) {
            queue.extend(&plane[..len]);
        }
        self.size += samples.nb_samples;
        Ok(())
    }

    /// Removes up to `nb_samples` samples from the front. `None` when empty.
    pub fn read(&mut self, nb_samples: usize) -> Result<Option<AudioSamples>> {
        let take = nb_samples.min(self.size);
        if take == 0 {
            return Ok(None);
        }
        let len = take * self.stride;
        let mut planes = Vec::with_capacity(self.planes.len());
        for queue in &mut self.planes {
            let mut plane = Vec::new();
            plane
                .try_reserve_exact(len)
                .map_err(|err| TranscodeError::exhausted("audio fifo read", err))?;
            plane.extend(queue.drain(..len));
            planes.push(plane);
        }
        self.size -= take;
        Ok(Some(AudioSamples {
            format: self.format,
            layout: self.layout,
            sample_rate: self.sample_rate,
            nb_samples: take,
            planes,
        }))
    }

    pub fn clear(&mut self) {
        self.planes.iter_mut().for_each(VecDeque::clear);
        self.size = 0;
    }
}
