use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub channel: ChannelSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub call: CallSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub api_base_url: String,
    pub ws_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            ws_url: "ws://localhost:8005/ws/chat".into(),
        }
    }
}

/// Tuning for the spectral voice-activity detector.
///
/// The defaults are empirically chosen and have not been calibrated against
/// recorded fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    // Energy on the analyser's 0..=255 byte scale.
    pub voice_threshold: f32,
    pub flatness_threshold: f32,
    pub detection_window_ms: u64,
    pub min_detections: usize,
    pub silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 50.0,
            flatness_threshold: 0.3,
            detection_window_ms: 500,
            min_detections: 5,
            silence_duration_ms: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub microphone_device: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            microphone_device: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub tick_interval_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            response_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"vad":{"voice_threshold":42.0},"call":{}}"#).unwrap();
        assert_eq!(cfg.vad.voice_threshold, 42.0);
        assert_eq!(cfg.vad.min_detections, 5);
        assert_eq!(cfg.vad.silence_duration_ms, 1200);
        assert_eq!(cfg.channel.reconnect_delay_ms, 3_000);
        assert_eq!(cfg.call.tick_interval_ms, 16);
        assert!(cfg.capture.auto_gain_control);
    }
}
