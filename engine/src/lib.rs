pub mod calibration;
pub mod decoder;
pub mod error;
pub mod models;
pub mod pianoroll;
pub mod settings;

pub use calibration::{BlendingSample, CalibrationConfig, Calibrator, CollectionPath};
pub use decoder::{CancelToken, Decoder, Transcription};
pub use error::{DecodeError, ModelError};
pub use pianoroll::{BinaryVector, PitchFrame};
pub use settings::DecodingConfig;
