pub mod analyser;
pub mod capture;
pub mod encode;
pub mod player;
pub mod recorder;
pub mod resample;

pub use analyser::SpectrumAnalyser;
pub use capture::CaptureManager;
pub use player::{FinishedCallback, PlaybackError, SpeechOutput};
pub use recorder::{AudioCaptureError, MicRecorder, list_input_device_names};
