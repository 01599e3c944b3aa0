use crate::engine::SampleConverter;
use crate::error::{Result, TranscodeError};
use crate::media::{AudioParameters, AudioSamples, ChannelLayout, SampleFormat};

const FOLD: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Sample format and channel layout conversion through an `f64` mixing
/// matrix. Sample rates must match.
pub(super) struct NativeResampler {
    in_format: SampleFormat,
    in_layout: ChannelLayout,
    out_format: SampleFormat,
    out_layout: ChannelLayout,
    sample_rate: u32,
    /// `matrix[out][in]` gain.
    matrix: Vec<Vec<f64>>,
}

impl NativeResampler {
    pub(super) fn new(input: &AudioParameters, output: &AudioParameters) -> Result<Self> {
        if input.sample_rate != output.sample_rate {
            return Err(TranscodeError::unsupported_conversion(format!(
                "sample rate conversion {} Hz -> {} Hz is not supported",
                input.sample_rate, output.sample_rate
            )));
        }
        if input.channel_layout.is_empty() || output.channel_layout.is_empty() {
            return Err(TranscodeError::unsupported_conversion(
                "channel layout must name at least one channel",
            ));
        }
        Ok(Self {
            in_format: input.sample_format,
            in_layout: input.channel_layout,
            out_format: output.sample_format,
            out_layout: output.channel_layout,
            sample_rate: input.sample_rate,
            matrix: mixing_matrix(input.channel_layout, output.channel_layout),
        })
    }
}

fn mixing_matrix(input: ChannelLayout, output: ChannelLayout) -> Vec<Vec<f64>> {
    let ins = input.positions();
    let outs = output.positions();
    let mut matrix = vec![vec![0.0; ins.len()]; outs.len()];
    let position = |layout: &[ChannelLayout], wanted: ChannelLayout| {
        layout.iter().position(|pos| *pos == wanted)
    };

    if output == ChannelLayout::MONO && input != ChannelLayout::MONO {
        let gain = 1.0 / ins.len() as f64;
        matrix[0].iter_mut().for_each(|g| *g = gain);
        return matrix;
    }
    if input == ChannelLayout::MONO {
        let targets: &[ChannelLayout] = if output.contains(ChannelLayout::FRONT_CENTER) {
            &[ChannelLayout::FRONT_CENTER]
        } else {
            &[ChannelLayout::FRONT_LEFT, ChannelLayout::FRONT_RIGHT]
        };
        for target in targets {
            if let Some(o) = position(&outs, *target) {
                matrix[o][0] = 1.0;
            }
        }
        return matrix;
    }

    for (i, pos) in ins.iter().enumerate() {
        if let Some(o) = position(&outs, *pos) {
            matrix[o][i] = 1.0;
            continue;
        }
        let folds: &[(ChannelLayout, f64)] = if *pos == ChannelLayout::FRONT_CENTER {
            &[
                (ChannelLayout::FRONT_LEFT, FOLD),
                (ChannelLayout::FRONT_RIGHT, FOLD),
            ]
        } else if *pos == ChannelLayout::BACK_LEFT || *pos == ChannelLayout::SIDE_LEFT {
            &[
                (ChannelLayout::SIDE_LEFT, 1.0),
                (ChannelLayout::BACK_LEFT, 1.0),
                (ChannelLayout::FRONT_LEFT, FOLD),
            ]
        } else if *pos == ChannelLayout::BACK_RIGHT || *pos == ChannelLayout::SIDE_RIGHT {
            &[
                (ChannelLayout::SIDE_RIGHT, 1.0),
                (ChannelLayout::BACK_RIGHT, 1.0),
                (ChannelLayout::FRONT_RIGHT, FOLD),
            ]
        } else if *pos == ChannelLayout::BACK_CENTER {
            &[
                (ChannelLayout::FRONT_LEFT, 0.5),
                (ChannelLayout::FRONT_RIGHT, 0.5),
            ]
        } else {
            &[]
        };
        // First target the output actually has wins for surround pairs.
        let mut placed = false;
        for (target, gain) in folds {
            let is_front =
                *target == ChannelLayout::FRONT_LEFT || *target == ChannelLayout::FRONT_RIGHT;
            if placed && !is_front {
                continue;
            }
            if let Some(o) = position(&outs, *target) {
                matrix[o][i] += gain;
                placed = true;
                if !is_front {
                    break;
                }
            }
        }
    }
    matrix
}

fn read_sample(format: SampleFormat, bytes: &[u8]) -> f64 {
    match format.packed() {
        SampleFormat::U8 => (bytes[0] as f64 - 128.0) / 128.0,
        SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64 / 32_768.0,
        SampleFormat::S32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 2_147_483_648.0
        }
        SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        _ => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            f64::from_le_bytes(raw)
        }
    }
}

fn write_sample(format: SampleFormat, value: f64, out: &mut [u8]) {
    match format.packed() {
        SampleFormat::U8 => {
            out[0] = (value * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
        }
        SampleFormat::S16 => {
            let v = (value * 32_768.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 => {
            let v = (value * 2_147_483_648.0)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        _ => out[..8].copy_from_slice(&value.to_le_bytes()),
    }
}

/// Byte offset of `(sample, channel)` and the plane it lives in.
fn locate(format: SampleFormat, channels: usize, sample: usize, channel: usize) -> (usize, usize) {
    let bps = format.bytes_per_sample();
    if format.is_planar() {
        (channel, sample * bps)
    } else {
        (0, (sample * channels + channel) * bps)
    }
}

impl SampleConverter for NativeResampler {
    fn convert(&mut self, input: &AudioSamples) -> Result<AudioSamples> {
        if input.sample_rate != self.sample_rate {
            return Err(TranscodeError::unsupported_conversion(format!(
                "frame at {} Hz reached a converter configured for {} Hz",
                input.sample_rate, self.sample_rate
            )));
        }
        if input.format != self.in_format || input.layout != self.in_layout {
            return Err(TranscodeError::unsupported_conversion(format!(
                "converter configured for {} {} received {} {}",
                self.in_format,
                self.in_layout.name(),
                input.format,
                input.layout.name()
            )));
        }
        if self.in_format == self.out_format && self.in_layout == self.out_layout {
            return Ok(input.clone());
        }

        let nb = input.nb_samples;
        let in_channels = self.in_layout.channels();
        let out_channels = self.out_layout.channels();
        let in_bps = self.in_format.bytes_per_sample();
        let out_bps = self.out_format.bytes_per_sample();
        let mut output =
            AudioSamples::alloc(self.out_format, self.out_layout, self.sample_rate, nb)?;

        let mut frame = vec![0.0f64; in_channels];
        for s in 0..nb {
            for (c, value) in frame.iter_mut().enumerate() {
                let (plane, offset) = locate(self.in_format, in_channels, s, c);
                *value = read_sample(self.in_format, &input.planes[plane][offset..offset + in_bps]);
            }
            for o in 0..out_channels {
                let mixed: f64 = self.matrix[o]
                    .iter()
                    .zip(&frame)
                    .map(|(gain, value)| gain * value)
                    .sum();
                let (plane, offset) = locate(self.out_format, out_channels, s, o);
                write_sample(
                    self.out_format,
                    mixed,
                    &mut output.planes[plane][offset..offset + out_bps],
                );
            }
        }
        Ok(output)
    }
}
