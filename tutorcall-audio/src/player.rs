//
// rodio speech output.
//
// `OutputStream` is not `Send`, so the stream and the active sink live on a
// dedicated thread driven over a command channel.

use std::io::Cursor;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink, Source};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no audio output available: {0}")]
    Output(String),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("player thread is gone")]
    WorkerGone,
}

/// Invoked on the player thread when playback `id` drains on its own.
pub type FinishedCallback = Arc<dyn Fn(u64) + Send + Sync + 'static>;

enum PlayerCmd {
    Play {
        id: u64,
        bytes: Vec<u8>,
        resp: mpsc::Sender<Result<(), PlaybackError>>,
    },
    Stop,
    Shutdown,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct SpeechOutput {
    cmd_tx: mpsc::Sender<PlayerCmd>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SpeechOutput {
    pub fn open(on_finished: FinishedCallback) -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerCmd>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker = std::thread::Builder::new()
            .name("tutorcall-speaker".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let mut current: Option<(u64, Sink)> = None;
                loop {
                    match cmd_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(PlayerCmd::Play { id, bytes, resp }) => {
                            if let Some((_, old)) = current.take() {
                                old.stop();
                            }
                            let started = Decoder::new(Cursor::new(bytes))
                                .map_err(|e| PlaybackError::Decode(e.to_string()))
                                .and_then(|source| {
                                    let sink = Sink::try_new(&handle)
                                        .map_err(|e| PlaybackError::Output(e.to_string()))?;
                                    sink.append(source.convert_samples::<f32>());
                                    Ok(sink)
                                });
                            match started {
                                Ok(sink) => {
                                    current = Some((id, sink));
                                    let _ = resp.send(Ok(()));
                                }
                                Err(e) => {
                                    let _ = resp.send(Err(e));
                                }
                            }
                        }
                        Ok(PlayerCmd::Stop) => {
                            if let Some((id, sink)) = current.take() {
                                sink.stop();
                                log::debug!("playback {id} stopped");
                            }
                        }
                        Ok(PlayerCmd::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            if let Some((_, sink)) = current.take() {
                                sink.stop();
                            }
                            return;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }

                    if current.as_ref().is_some_and(|(_, s)| s.empty()) {
                        if let Some((id, _)) = current.take() {
                            on_finished(id);
                        }
                    }
                }
            })
            .map_err(|e| PlaybackError::Output(format!("spawn player: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(PlaybackError::Output(e))
            }
            Err(_) => Err(PlaybackError::WorkerGone),
        }
    }

    /// Replaces whatever is playing with `bytes` (any format rodio can decode).
    pub fn play(&self, id: u64, bytes: Vec<u8>) -> Result<(), PlaybackError> {
        let (resp_tx, resp_rx) = mpsc::channel();
        self.cmd_tx
            .send(PlayerCmd::Play {
                id,
                bytes,
                resp: resp_tx,
            })
            .map_err(|_| PlaybackError::WorkerGone)?;
        resp_rx.recv().map_err(|_| PlaybackError::WorkerGone)?
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PlayerCmd::Stop);
    }
}

impl Drop for SpeechOutput {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCmd::Shutdown);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}
