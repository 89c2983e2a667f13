use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tutorcall_core::{AppConfig, CallError, CallSession, CharacterId, CharacterRef};
use tutorcall_engine::traits::{CharacterLookup, HangupNavigator};
use tutorcall_engine::{CallCommand, CallDeps, CallEngine, CallEvent, CallIo, run_call};
use tutorcall_providers::{ChannelConfig, CharacterService, CredentialSource, spawn_channel};
use tutorcall_runtime::secrets::{SecretKey, delete_secret, get_secret, set_secret};
use tutorcall_runtime::{ConfigStore, KeyringCredentials};

use crate::devices::{DeviceCapture, DevicePlayer, ServiceLookup};

const EVENT_BUFFER: usize = 64;

/// Short, actionable text for errors the user has to act on. Details go to the log.
pub fn user_facing_call_error(e: &CallError) -> String {
    match e {
        CallError::DeviceUnavailable(raw) => {
            let raw = raw.to_lowercase();
            if raw.contains("no input device") {
                return "No microphone detected. Connect one or pick another device in the config."
                    .into();
            }
            if raw.contains("permission") || raw.contains("access") || raw.contains("denied") {
                if cfg!(windows) {
                    return "Microphone access appears blocked. Check Windows Settings > Privacy & security > Microphone.".into();
                }
                if cfg!(target_os = "macos") {
                    return "Microphone access appears blocked. Check System Settings > Privacy & Security > Microphone.".into();
                }
                return "Microphone access appears blocked. Check your system's audio permissions."
                    .into();
            }
            "The microphone could not be opened. Check the device and try again.".into()
        }
        CallError::Playback(_) => "The tutor's reply could not be played.".into(),
        CallError::ChannelClosed(_) | CallError::SendWhileDisconnected => {
            "Connection to the tutor was lost. Reconnecting...".into()
        }
        other => other.to_string(),
    }
}

/// A running call. Dropping `commands` hangs up.
pub struct CallHandle {
    pub commands: mpsc::Sender<CallCommand>,
    pub events: mpsc::Receiver<CallEvent>,
    pub task: JoinHandle<CallSession>,
}

impl CallHandle {
    pub async fn hang_up(self) -> anyhow::Result<CallSession> {
        let _ = self.commands.send(CallCommand::HangUp).await;
        self.task.await.context("call task failed")
    }
}

#[derive(Clone)]
pub struct CallService {
    config_store: ConfigStore,
    credentials: Arc<KeyringCredentials>,
}

impl CallService {
    pub fn new(config_path: PathBuf, token_override: Option<String>) -> Self {
        Self {
            config_store: ConfigStore::at_path(config_path),
            credentials: Arc::new(KeyringCredentials::new(token_override)),
        }
    }

    pub fn config_path(&self) -> &std::path::Path {
        self.config_store.path()
    }

    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        self.config_store.load()
    }

    pub fn save_config(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        self.config_store.save(cfg)
    }

    pub fn set_session_token(&self, value: &str) -> anyhow::Result<()> {
        set_secret(SecretKey::SessionToken, value.trim())
    }

    pub fn session_token_present(&self) -> anyhow::Result<bool> {
        Ok(get_secret(SecretKey::SessionToken)?.is_some())
    }

    pub fn clear_session_token(&self) -> anyhow::Result<()> {
        delete_secret(SecretKey::SessionToken)
    }

    pub fn list_microphones(&self) -> anyhow::Result<Vec<String>> {
        tutorcall_audio::list_input_device_names().context("list input devices")
    }

    /// Connects the channel, opens the speaker and starts the call loop.
    /// The microphone opens once the channel is up.
    pub async fn start_call(
        &self,
        character: CharacterId,
        navigator: Arc<dyn HangupNavigator>,
    ) -> anyhow::Result<CallHandle> {
        let cfg = self.load_config()?;
        if self.credentials.token().is_none() {
            anyhow::bail!("no session token stored; log in first");
        }

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let player = DevicePlayer::open(done_tx).context("open speaker")?;

        let channel_cfg = ChannelConfig::from_settings(&cfg.backend, &cfg.channel)?;
        let credentials: Arc<dyn CredentialSource> = self.credentials.clone();
        let (channel, inbound) = spawn_channel(channel_cfg, credentials.clone());
        let status = channel.subscribe_status();

        let lookup: Arc<dyn CharacterLookup> = Arc::new(ServiceLookup(CharacterService::new(
            cfg.backend.api_base_url.clone(),
            credentials,
        )));

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let engine = CallEngine::new(
            CharacterRef::new(character),
            cfg.vad.clone(),
            cfg.call.clone(),
            CallDeps {
                capture: Arc::new(DeviceCapture::new(cfg.capture.clone())),
                player: Arc::new(player),
                sink: Arc::new(channel),
                navigator,
            },
            events_tx,
        );
        let io = CallIo {
            inbound,
            status,
            playback_done: done_rx,
            commands: cmd_rx,
        };

        log::info!("starting call with character {character}");
        let tick = Duration::from_millis(cfg.call.tick_interval_ms);
        let task = tokio::spawn(run_call(engine, io, Some(lookup), tick));

        Ok(CallHandle {
            commands: cmd_tx,
            events: events_rx,
            task,
        })
    }
}
