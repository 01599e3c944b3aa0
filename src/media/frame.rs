use crate::error::{Result, TranscodeError};
use crate::media::format::{ChannelLayout, PixelFormat, SampleFormat};
use crate::time::NO_PTS;

/// Zero-filled buffer of `len` bytes, reporting allocation failure instead
/// of aborting.
pub(crate) fn alloc_zeroed(len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|err| TranscodeError::exhausted(what, err))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// A decoded block of audio samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub format: SampleFormat,
    pub layout: ChannelLayout,
    pub sample_rate: u32,
    pub nb_samples: usize,
    /// One buffer for interleaved formats, one per channel for planar ones.
    pub planes: Vec<Vec<u8>>,
}

impl AudioSamples {
    pub fn alloc(
        format: SampleFormat,
        layout: ChannelLayout,
        sample_rate: u32,
        nb_samples: usize,
    ) -> Result<Self> {
        let channels = layout.channels();
        let plane_len = nb_samples * format.plane_stride(channels);
        let planes = (0..format.plane_count(channels))
            .map(|_| alloc_zeroed(plane_len, "audio frame"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            format,
            layout,
            sample_rate,
            nb_samples,
            planes,
        })
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    /// Size of one sample instant across all channels.
    pub fn sample_frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub linesize: usize,
}

/// A decoded picture made of one or more planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
}

impl Picture {
    /// Tightly packed, zero-filled picture.
    pub fn alloc(format: PixelFormat, width: u32, height: u32) -> Result<Self> {
        let planes = format
            .plane_layout(width, height)
            .into_iter()
            .map(|(row, rows)| {
                Ok(Plane {
                    data: alloc_zeroed(row * rows, "picture plane")?,
                    linesize: row,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            format,
            width,
            height,
            planes,
        })
    }

    /// Copies the visible rows of every plane into one contiguous buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let layout = self.format.plane_layout(self.width, self.height);
        let mut out = Vec::with_capacity(self.format.picture_size(self.width, self.height));
        for (plane, (row, rows)) in self.planes.iter().zip(layout) {
            for y in 0..rows {
                let start = y * plane.linesize;
                out.extend_from_slice(&plane.data[start..start + row]);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Audio(AudioSamples),
    Video(Picture),
}

/// Decoded media with the timing it inherited from its packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Input stream this frame originates from.
    pub stream_index: usize,
    pub pts: i64,
    pub pkt_dts: i64,
    pub duration: i64,
    pub best_effort_timestamp: i64,
    pub data: FrameData,
}

impl Frame {
    pub fn new(stream_index: usize, data: FrameData) -> Self {
        Self {
            stream_index,
            pts: NO_PTS,
            pkt_dts: NO_PTS,
            duration: 0,
            best_effort_timestamp: NO_PTS,
            data,
        }
    }

    /// Best guess at the presentation time: `best_effort_timestamp`, then
    /// `pts`, then the packet dts.
    pub fn timestamp(&self) -> i64 {
        [self.best_effort_timestamp, self.pts, self.pkt_dts]
            .into_iter()
            .find(|ts| *ts != NO_PTS)
            .unwrap_or(NO_PTS)
    }

    /// Copies the time fields of `other` onto this frame.
    pub fn copy_timing_from(&mut self, other: &Frame) {
        self.stream_index = other.stream_index;
        self.pts = other.pts;
        self.pkt_dts = other.pkt_dts;
        self.duration = other.duration;
        self.best_effort_timestamp = other.best_effort_timestamp;
    }

    pub fn audio(&self) -> Option<&AudioSamples> {
        match &self.data {
            FrameData::Audio(samples) => Some(samples),
            FrameData::Video(_) => None,
        }
    }

    pub fn picture(&self) -> Option<&Picture> {
        match &self.data {
            FrameData::Video(picture) => Some(picture),
            FrameData::Audio(_) => None,
        }
    }

    pub fn picture_mut(&mut self) -> Option<&mut Picture> {
        match &mut self.data {
            FrameData::Video(picture) => Some(picture),
            FrameData::Audio(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_audio_allocates_one_buffer_per_channel() {
        let samples =
            AudioSamples::alloc(SampleFormat::F32p, ChannelLayout::STEREO, 48_000, 960).unwrap();
        assert_eq!(samples.planes.len(), 2);
        assert_eq!(samples.planes[0].len(), 960 * 4);
        assert_eq!(samples.sample_frame_bytes(), 8);
    }

    #[test]
    fn timestamp_prefers_best_effort() {
        let picture = Picture::alloc(PixelFormat::Gray8, 2, 2).unwrap();
        let mut frame = Frame::new(0, FrameData::Video(picture));
        assert_eq!(frame.timestamp(), NO_PTS);
        frame.pkt_dts = 3;
        assert_eq!(frame.timestamp(), 3);
        frame.pts = 4;
        frame.best_effort_timestamp = 5;
        assert_eq!(frame.timestamp(), 5);
    }

    #[test]
    fn packed_copy_skips_padding() {
        let mut picture = Picture::alloc(PixelFormat::Gray8, 2, 2).unwrap();
        picture.planes[0] = Plane {
            data: vec![1, 2, 0, 0, 3, 4, 0, 0],
            linesize: 4,
        };
        assert_eq!(picture.to_packed(), vec![1, 2, 3, 4]);
    }
}
