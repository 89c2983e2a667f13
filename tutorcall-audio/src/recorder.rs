//
// CPAL microphone recorder.
//
// The input stream lives on a dedicated worker thread; callers talk to it over a
// command channel. Every mono chunk is offered to an optional sample tap (the
// spectrum analyser) whether or not a recording is in progress.

use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("failed to list input devices: {0}")]
    ListDevices(#[from] cpal::DevicesError),

    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    /// The host refused the stream (permission denied, device busy or unplugged).
    #[error("input stream refused: {0}")]
    StreamRefused(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("recording stop timed out")]
    StopTimeout,

    #[error("failed to resample: {0}")]
    Resample(#[source] anyhow::Error),

    #[error("failed to encode wav: {0}")]
    Encode(#[from] hound::Error),

    #[error("audio worker is gone")]
    WorkerGone,
}

pub type SampleTap = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

type SharedTap = Arc<Mutex<Option<SampleTap>>>;

enum Cmd {
    Begin,
    Finish(mpsc::Sender<Vec<f32>>),
    Shutdown,
}

enum Startup {
    Running,
    Failed(String),
}

/// Mono samples at the device's native rate.
#[derive(Debug, Clone, Default)]
pub struct RawCapture {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

pub struct MicRecorder {
    cmd_tx: mpsc::Sender<Cmd>,
    worker: Option<std::thread::JoinHandle<()>>,
    sample_rate_hz: u32,
    tap: SharedTap,
}

pub fn list_input_device_names() -> Result<Vec<String>, AudioCaptureError> {
    let host = cpal::default_host();
    let mut names: Vec<String> = host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

fn find_input_device(preferred: Option<&str>) -> Result<Device, AudioCaptureError> {
    let host = cpal::default_host();

    if let Some(wanted) = preferred.map(str::trim).filter(|s| !s.is_empty()) {
        let found = host
            .input_devices()
            .ok()
            .and_then(|mut devs| devs.find(|d| d.name().is_ok_and(|n| n == wanted)));
        match found {
            Some(dev) => {
                log::info!("using input device: {wanted}");
                return Ok(dev);
            }
            None => log::warn!("input device not found, falling back to default: {wanted}"),
        }
    }

    host.default_input_device()
        .ok_or(AudioCaptureError::NoInputDevice)
}

impl MicRecorder {
    /// Opens `preferred` (or the default input) and starts the stream.
    ///
    /// Blocks for up to two seconds while the worker builds the stream, so callers
    /// on an async runtime should run this on a blocking thread.
    pub fn open(preferred: Option<&str>) -> Result<Self, AudioCaptureError> {
        let device = find_input_device(preferred)?;
        let supported = device.default_input_config()?;
        let sample_rate_hz = supported.sample_rate().0;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (startup_tx, startup_rx) = mpsc::channel::<Startup>();
        let tap: SharedTap = Arc::new(Mutex::new(None));
        let worker_tap = tap.clone();

        let worker = std::thread::Builder::new()
            .name("tutorcall-mic".into())
            .spawn(move || {
                let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();
                let channels = supported.channels() as usize;
                let cfg: cpal::StreamConfig = supported.config();

                let stream = match supported.sample_format() {
                    SampleFormat::I8 => build_input_stream::<i8>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::I16 => build_input_stream::<i16>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::I32 => build_input_stream::<i32>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::U8 => build_input_stream::<u8>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::U16 => build_input_stream::<u16>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::U32 => build_input_stream::<u32>(&device, &cfg, channels, chunk_tx),
                    SampleFormat::F64 => build_input_stream::<f64>(&device, &cfg, channels, chunk_tx),
                    _ => build_input_stream::<f32>(&device, &cfg, channels, chunk_tx),
                };

                let stream = match stream.and_then(|s| {
                    s.play().map_err(|e| format!("play stream: {e}"))?;
                    Ok(s)
                }) {
                    Ok(s) => s,
                    Err(e) => {
                        log::error!("microphone stream failed: {e}");
                        let _ = startup_tx.send(Startup::Failed(e));
                        return;
                    }
                };

                // Nobody is waiting any more: release the device right away.
                if startup_tx.send(Startup::Running).is_err() {
                    drop(stream);
                    return;
                }
                pump(chunk_rx, cmd_rx, worker_tap);
                drop(stream);
            })
            .map_err(|e| AudioCaptureError::StreamRefused(format!("spawn worker: {e}")))?;

        match startup_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Startup::Running) => {}
            Ok(Startup::Failed(e)) => {
                let _ = worker.join();
                return Err(AudioCaptureError::StreamRefused(e));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The worker may still come up; make sure it tears the stream down.
                let _ = cmd_tx.send(Cmd::Shutdown);
                return Err(AudioCaptureError::WorkerTimeout);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(AudioCaptureError::WorkerGone),
        }

        Ok(Self {
            cmd_tx,
            worker: Some(worker),
            sample_rate_hz,
            tap,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn set_sample_tap(&self, tap: SampleTap) {
        if let Ok(mut guard) = self.tap.lock() {
            *guard = Some(tap);
        }
    }

    /// Starts buffering, discarding anything buffered before.
    pub fn begin(&self) -> Result<(), AudioCaptureError> {
        self.cmd_tx
            .send(Cmd::Begin)
            .map_err(|_| AudioCaptureError::WorkerGone)
    }

    pub fn finish(&self) -> Result<RawCapture, AudioCaptureError> {
        let (resp_tx, resp_rx) = mpsc::channel();
        self.cmd_tx
            .send(Cmd::Finish(resp_tx))
            .map_err(|_| AudioCaptureError::WorkerGone)?;

        let samples = resp_rx
            .recv_timeout(Duration::from_secs(3))
            .map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => AudioCaptureError::StopTimeout,
                mpsc::RecvTimeoutError::Disconnected => AudioCaptureError::WorkerGone,
            })?;

        Ok(RawCapture {
            sample_rate_hz: self.sample_rate_hz,
            samples,
        })
    }

    /// Closes the stream and joins the worker, releasing the device.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for MicRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    channels: usize,
    chunk_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, String>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    let on_data = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let chunk: Vec<f32> = if channels == 1 {
            data.iter().map(|&s| s.to_sample::<f32>()).collect()
        } else {
            data.chunks_exact(channels)
                .map(|frame| {
                    frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                })
                .collect()
        };
        let _ = chunk_tx.send(chunk);
    };

    device
        .build_input_stream(
            config,
            on_data,
            |err| log::error!("microphone stream error: {err}"),
            None,
        )
        .map_err(|e| format!("build stream: {e}"))
}

fn pump(chunk_rx: mpsc::Receiver<Vec<f32>>, cmd_rx: mpsc::Receiver<Cmd>, tap: SharedTap) {
    let mut recording = false;
    let mut buffered: Vec<f32> = Vec::new();

    loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(Cmd::Begin) => {
                    recording = true;
                    buffered.clear();
                }
                Ok(Cmd::Finish(resp)) => {
                    recording = false;
                    let _ = resp.send(std::mem::take(&mut buffered));
                }
                Ok(Cmd::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => return,
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        match chunk_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => {
                let tap = tap.lock().ok().and_then(|g| g.clone());
                if let Some(tap) = tap {
                    tap(&chunk);
                }
                if recording {
                    buffered.extend_from_slice(&chunk);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
