//! Push-to-talk recorder. A dedicated reader thread owns the cpal input
//! stream between `start()` and `stop()`; sample chunks flow through a
//! bounded channel and are written out as a 16-bit mono WAV on stop.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use sparkbox_foundation::AudioError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Preferred capture rate; what the STT endpoint performs best at.
const PRIMARY_SAMPLE_RATE: u32 = 16_000;
/// Rate the board's codec falls back to when 16 kHz is refused.
const FALLBACK_SAMPLE_RATE: u32 = 44_100;
/// Chunks buffered between the stream callback and the drain on stop.
const CHUNK_QUEUE_CAPACITY: usize = 1024;

struct ActiveRecording {
    stop: Arc<AtomicBool>,
    chunk_rx: Receiver<Vec<i16>>,
    sample_rate: u32,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

pub struct VoiceRecorder {
    output_path: PathBuf,
    active: Mutex<Option<ActiveRecording>>,
    recording: AtomicBool,
    last_sample_rate: AtomicU32,
}

impl VoiceRecorder {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            active: Mutex::new(None),
            recording: AtomicBool::new(false),
            last_sample_rate: AtomicU32::new(PRIMARY_SAMPLE_RATE),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Sample rate of the most recent recording; forwarded to the
    /// transcription call.
    pub fn sample_rate(&self) -> u32 {
        self.last_sample_rate.load(Ordering::Relaxed)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Open the input stream and begin buffering chunks. Any previous
    /// recording file is removed first.
    pub fn start(&self) -> Result<(), AudioError> {
        let mut active = self.active.lock();
        if active.is_some() {
            tracing::debug!("Recorder already running; start ignored");
            return Ok(());
        }

        if self.output_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.output_path) {
                tracing::warn!(path = %self.output_path.display(), "Failed to remove old recording: {}", e);
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CHUNK_QUEUE_CAPACITY);
        let (startup_tx, startup_rx) = bounded::<Result<u32, AudioError>>(1);

        let thread_stop = stop.clone();
        let thread_dropped = dropped.clone();
        let handle = std::thread::Builder::new()
            .name("voice-recorder".to_string())
            .spawn(move || {
                run_stream(thread_stop, chunk_tx, thread_dropped, startup_tx);
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn recorder thread: {}", e)))?;

        let sample_rate = match startup_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                let _ = handle.join();
                return Err(AudioError::Fatal("recorder startup timed out".into()));
            }
        };

        tracing::info!(sample_rate, "Recording started");
        self.last_sample_rate.store(sample_rate, Ordering::Relaxed);
        self.recording.store(true, Ordering::Relaxed);
        *active = Some(ActiveRecording {
            stop,
            chunk_rx,
            sample_rate,
            dropped,
            handle,
        });
        Ok(())
    }

    /// Stop the stream, drain the buffered chunks and write the WAV.
    /// Returns the file path, or `NoAudioCaptured` when nothing arrived.
    pub fn stop(&self) -> Result<PathBuf, AudioError> {
        let recording = {
            let mut active = self.active.lock();
            self.recording.store(false, Ordering::Relaxed);
            active.take().ok_or(AudioError::NoAudioCaptured)?
        };

        recording.stop.store(true, Ordering::SeqCst);
        let _ = recording.handle.join();

        let mut samples: Vec<i16> = Vec::new();
        while let Ok(chunk) = recording.chunk_rx.try_recv() {
            samples.extend_from_slice(&chunk);
        }

        let dropped = recording.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "Recorder queue overflowed; chunks were lost");
        }

        if samples.is_empty() {
            tracing::warn!("No audio recorded");
            return Err(AudioError::NoAudioCaptured);
        }

        write_wav(&self.output_path, &samples, recording.sample_rate)?;
        tracing::info!(
            path = %self.output_path.display(),
            samples = samples.len(),
            "Recording saved"
        );
        Ok(self.output_path.clone())
    }
}

impl Drop for VoiceRecorder {
    fn drop(&mut self) {
        if let Some(recording) = self.active.lock().take() {
            recording.stop.store(true, Ordering::SeqCst);
            let _ = recording.handle.join();
        }
    }
}

/// Thread body: open the device, negotiate a rate, pump chunks until the
/// stop flag trips. The stream must live and die on this thread.
fn run_stream(
    stop: Arc<AtomicBool>,
    chunk_tx: Sender<Vec<i16>>,
    dropped: Arc<AtomicU64>,
    startup_tx: Sender<Result<u32, AudioError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = startup_tx.send(Err(AudioError::DeviceNotFound));
        return;
    };

    let stream = match open_input_stream(&device, PRIMARY_SAMPLE_RATE, &chunk_tx, &dropped) {
        Ok(s) => Ok((s, PRIMARY_SAMPLE_RATE)),
        Err(primary_err) => {
            tracing::warn!(
                "Failed to open stream at {} Hz ({}); falling back to {} Hz",
                PRIMARY_SAMPLE_RATE,
                primary_err,
                FALLBACK_SAMPLE_RATE
            );
            open_input_stream(&device, FALLBACK_SAMPLE_RATE, &chunk_tx, &dropped)
                .map(|s| (s, FALLBACK_SAMPLE_RATE))
        }
    };

    let (stream, sample_rate) = match stream {
        Ok(pair) => pair,
        Err(e) => {
            let _ = startup_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = startup_tx.send(Err(AudioError::Fatal(format!("play failed: {}", e))));
        return;
    }
    let _ = startup_tx.send(Ok(sample_rate));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
}

fn open_input_stream(
    device: &cpal::Device,
    sample_rate: u32,
    chunk_tx: &Sender<Vec<i16>>,
    dropped: &Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError> {
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let err_fn = |err| tracing::error!("Recorder stream error: {}", err);

    let default = device
        .default_input_config()
        .map_err(|e| AudioError::Fatal(format!("no input config: {}", e)))?;

    let stream = match default.sample_format() {
        SampleFormat::I16 => {
            let tx = chunk_tx.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push_chunk(&tx, &dropped, data.to_vec());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::F32 => {
            let tx = chunk_tx.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    push_chunk(&tx, &dropped, converted);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?}", other),
            })
        }
    };

    stream.map_err(|e| AudioError::Fatal(format!("build stream at {} Hz: {}", sample_rate, e)))
}

fn push_chunk(tx: &Sender<Vec<i16>>, dropped: &Arc<AtomicU64>, chunk: Vec<i16>) {
    match tx.try_send(chunk) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), AudioError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| AudioError::WavWrite(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| AudioError::WavWrite(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| AudioError::WavWrite(e.to_string()))?;
    Ok(())
}
