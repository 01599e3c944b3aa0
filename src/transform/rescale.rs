use tracing::debug;

use crate::chain::{Consumer, Outlet, Producer};
use crate::engine::{MediaEngine, PictureScaler};
use crate::error::{Result, TranscodeError};
use crate::media::{Frame, FrameData, Interpolation, Picture, VideoParameters};

/// Converts pictures to the output size and pixel format.
///
/// The destination frame is allocated once and overwritten for every input;
/// consumers that keep a frame must clone it. Timing is copied unchanged.
pub struct VideoRescaler {
    scaler: Box<dyn PictureScaler>,
    output: VideoParameters,
    interpolation: Interpolation,
    destination: Frame,
    outlet: Outlet<Frame>,
}

impl VideoRescaler {
    pub fn open(
        engine: &dyn MediaEngine,
        input: &VideoParameters,
        output: &VideoParameters,
        interpolation: Interpolation,
    ) -> Result<Self> {
        let scaler = engine.open_scaler(input, output, interpolation)?;
        let picture = Picture::alloc(output.pixel_format, output.width, output.height)?;
        debug!(
            from = %format!("{}x{} {}", input.width, input.height, input.pixel_format),
            to = %format!("{}x{} {}", output.width, output.height, output.pixel_format),
            ?interpolation,
            "rescaler opened"
        );
        Ok(Self {
            scaler,
            output: output.clone(),
            interpolation,
            destination: Frame::new(0, FrameData::Video(picture)),
            outlet: Outlet::new(),
        })
    }

    pub fn output(&self) -> &VideoParameters {
        &self.output
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }
}

impl Producer<Frame> for VideoRescaler {
    fn outlet(&mut self) -> &mut Outlet<Frame> {
        &mut self.outlet
    }
}

impl Consumer<Frame> for VideoRescaler {
    fn accept(&mut self, frame: &Frame) -> Result<()> {
        let picture = frame
            .picture()
            .ok_or_else(|| TranscodeError::invalid_state("rescaler received an audio frame"))?;
        self.destination.copy_timing_from(frame);
        let target = self
            .destination
            .picture_mut()
            .ok_or_else(|| TranscodeError::invalid_state("rescaler destination is not video"))?;
        self.scaler.scale(picture, target)?;
        self.outlet.publish(&self.destination)
    }

    fn finish(&mut self) -> Result<()> {
        self.outlet.finish()
    }
}
