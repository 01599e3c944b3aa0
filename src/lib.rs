pub mod chain;
pub mod config;
pub mod decode;
pub mod demux;
pub mod encode;
pub mod engine;
pub mod error;
pub mod io;
pub mod media;
pub mod mux;
pub mod observability;
pub mod pipeline;
pub mod presets;
pub mod report;
pub mod time;
pub mod timestamp;
pub mod transcoder;
pub mod transform;
pub mod validation;

pub use config::TranscodeConfig;
pub use engine::MediaEngine;
pub use engine::native::NativeEngine;
pub use error::{ErrorKind, Result, TranscodeError};
pub use pipeline::{Pipeline, PipelineSummary};
pub use transcoder::Transcoder;
