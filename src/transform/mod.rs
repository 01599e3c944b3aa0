//! Per-stream frame transforms placed between a decoder and an encoder.

pub mod fifo;
pub mod limiter;
pub mod resample;
pub mod rescale;

pub use fifo::AudioFifo;
pub use limiter::RateLimiter;
pub use resample::AudioResampler;
pub use rescale::VideoRescaler;
