//! Gapless playback of PCM16 pushed at arbitrary, bursty intervals.
//!
//! Incoming buffers are converted to samples, resampled to the output device
//! rate and appended to a playback queue that the cpal callback drains. Each
//! buffer starts exactly where the previous one ends; a cursor that has fallen
//! behind real time snaps forward to "now" instead of accumulating latency.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use rubato::{FastFixedIn, Resampler};

use crate::error::LiveError;
use gemini_live_utils::audio::{self as audio_util, LIVE_API_OUTPUT_SAMPLE_RATE};

const VOLUME_TICK: Duration = Duration::from_millis(50);
const VOLUME_DECAY: f32 = 0.7;
const VOLUME_FLOOR: f32 = 1e-4;
const RESAMPLE_CHUNK_SIZE: usize = 480;

/// Chunk of samples scheduled at an absolute position of the stream clock.
struct ScheduledChunk {
    start: u64,
    samples: Vec<f32>,
    offset: usize,
}

/// Playback state shared with the device callback: a running sample clock,
/// the next-start cursor and the chunks not yet played out.
struct PlaybackQueue {
    clock: u64,
    next_start: u64,
    chunks: VecDeque<ScheduledChunk>,
}

impl PlaybackQueue {
    fn new() -> Self {
        Self {
            clock: 0,
            next_start: 0,
            chunks: VecDeque::new(),
        }
    }

    /// Schedule `samples` to begin exactly where the previous chunk ends. The
    /// cursor never regresses; when it has fallen behind the clock (playback
    /// underran while no audio arrived) it snaps forward to "now".
    fn push(&mut self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        if self.next_start < self.clock {
            tracing::debug!(
                "playback cursor {} samples behind, resetting to now",
                self.clock - self.next_start
            );
            self.next_start = self.clock;
        }
        let start = self.next_start;
        self.next_start += samples.len() as u64;
        self.chunks.push_back(ScheduledChunk {
            start,
            samples,
            offset: 0,
        });
    }

    /// Drop every chunk not yet played and snap the cursor to "now".
    fn clear(&mut self) {
        self.chunks.clear();
        self.next_start = self.clock;
    }

    /// Render mono frames into `out`, honoring each chunk's start position,
    /// and return the RMS of what was written.
    fn fill(&mut self, out: &mut [f32]) -> f32 {
        if out.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0f32;
        for slot in out.iter_mut() {
            let mut sample = 0.0f32;
            while let Some(chunk) = self.chunks.front_mut() {
                if chunk.offset >= chunk.samples.len() {
                    self.chunks.pop_front();
                    continue;
                }
                if chunk.start + chunk.offset as u64 > self.clock {
                    // scheduled ahead of the clock: silence until it is due
                    break;
                }
                sample = chunk.samples[chunk.offset];
                chunk.offset += 1;
                break;
            }
            *slot = sample;
            sum += sample * sample;
            self.clock += 1;
        }
        (sum / out.len() as f32).sqrt()
    }
}

/// Stateful resampler from the backend rate to the device rate. Input that
/// does not fill a whole resampler block is carried over to the next call so
/// consecutive buffers stay contiguous.
struct OutputResampler {
    inner: FastFixedIn<f32>,
    pending: VecDeque<f32>,
    block: usize,
}

impl OutputResampler {
    fn new(device_sample_rate: f64) -> anyhow::Result<Self> {
        let inner = audio_util::create_resampler(
            LIVE_API_OUTPUT_SAMPLE_RATE,
            device_sample_rate,
            RESAMPLE_CHUNK_SIZE,
        )?;
        let block = inner.input_frames_next();
        Ok(Self {
            inner,
            pending: VecDeque::new(),
            block,
        })
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend(samples.iter().copied());
        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let block: Vec<f32> = self.pending.drain(..self.block).collect();
            match self.inner.process(&[block.as_slice()], None) {
                Ok(mut resampled) => {
                    if let Some(channel) = resampled.pop() {
                        out.extend(channel);
                    }
                }
                Err(e) => {
                    tracing::error!("failed to resample output audio: {}", e);
                    break;
                }
            }
        }
        out
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

struct Shared {
    queue: Mutex<PlaybackQueue>,
    /// Raw RMS written by the device callback, as f32 bits
    level: AtomicU32,
    shutdown: AtomicBool,
}

struct Inner {
    shared: Arc<Shared>,
    resampler: Mutex<Option<OutputResampler>>,
    volume_rx: tokio::sync::watch::Receiver<f32>,
    meter_task: tokio::task::JoinHandle<()>,
    // dropping this wakes the audio thread, which drops the stream
    _stream_stop: std::sync::mpsc::Sender<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.meter_task.abort();
    }
}

/// Owns the output device for the lifetime of the handle. The `cpal::Stream`
/// lives on a dedicated thread (streams are not `Send`); all handles share
/// the playback queue it drains.
#[derive(Clone)]
pub struct AudioStreamer {
    inner: Arc<Inner>,
}

impl AudioStreamer {
    /// Open the default output device and begin rendering the (empty) queue.
    /// Fails with [`LiveError::Unavailable`] when no device can be set up, so
    /// callers can degrade audio instead of failing the session.
    pub fn start() -> Result<Self, LiveError> {
        let device = gemini_live_utils::device::get_or_default_output(None)
            .map_err(|e| LiveError::Unavailable(format!("no audio output device: {e}")))?;
        let supported = device
            .default_output_config()
            .map_err(|e| LiveError::Unavailable(format!("no output config: {e}")))?;
        let channels = supported.channels().max(1) as usize;
        let sample_rate = supported.sample_rate().0;
        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(PlaybackQueue::new()),
            level: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
        });

        let resampler = if (sample_rate as f64 - LIVE_API_OUTPUT_SAMPLE_RATE).abs() < f64::EPSILON {
            None
        } else {
            let resampler = OutputResampler::new(sample_rate as f64)
                .map_err(|e| LiveError::Unavailable(format!("failed to create resampler: {e}")))?;
            Some(resampler)
        };

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let callback_shared = shared.clone();
        std::thread::spawn(move || {
            let mut mono: Vec<f32> = Vec::new();
            let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                let rms = match callback_shared.queue.lock() {
                    Ok(mut queue) => queue.fill(&mut mono),
                    Err(_) => {
                        mono.fill(0.0);
                        0.0
                    }
                };
                for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    for slot in frame.iter_mut() {
                        *slot = *sample;
                    }
                }
                callback_shared
                    .level
                    .store(rms.to_bits(), Ordering::Relaxed);
            };
            let stream = match device.build_output_stream(
                &stream_config,
                data_fn,
                |err| tracing::error!("audio output stream error: {}", err),
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("failed to build output stream: {e}")));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("failed to start output stream: {e}")));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // park until every handle is gone, keeping the stream alive
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(LiveError::Unavailable(reason)),
            Err(_) => {
                return Err(LiveError::Unavailable(
                    "audio thread exited before the stream started".to_string(),
                ))
            }
        }

        let (volume_tx, volume_rx) = tokio::sync::watch::channel(0.0f32);
        let meter_shared = shared.clone();
        let meter_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(VOLUME_TICK);
            let mut level = 0.0f32;
            loop {
                tick.tick().await;
                if meter_shared.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let rms = f32::from_bits(meter_shared.level.swap(0, Ordering::Relaxed));
                level = rms.max(level * VOLUME_DECAY);
                if level < VOLUME_FLOOR {
                    level = 0.0;
                }
                if volume_tx.send(level).is_err() {
                    break;
                }
            }
        });

        tracing::info!(
            "audio output started: {} ch @ {} Hz",
            channels,
            sample_rate
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                resampler: Mutex::new(resampler),
                volume_rx,
                meter_task,
                _stream_stop: stop_tx,
            }),
        })
    }

    /// Queue PCM16 little-endian bytes for playback immediately after
    /// whatever is already scheduled.
    pub fn add_pcm16(&self, bytes: &[u8]) {
        let samples = audio_util::samples_from_pcm16(bytes);
        if samples.is_empty() {
            return;
        }
        let samples = match self.inner.resampler.lock() {
            Ok(mut resampler) => match resampler.as_mut() {
                Some(resampler) => resampler.process(&samples),
                None => samples,
            },
            Err(_) => return,
        };
        if samples.is_empty() {
            return;
        }
        if let Ok(mut queue) = self.inner.shared.queue.lock() {
            queue.push(samples);
        }
    }

    /// Cancel everything not yet played and silence output immediately.
    /// Callable any number of times.
    pub fn stop(&self) {
        if let Ok(mut resampler) = self.inner.resampler.lock() {
            if let Some(resampler) = resampler.as_mut() {
                resampler.reset();
            }
        }
        if let Ok(mut queue) = self.inner.shared.queue.lock() {
            queue.clear();
        }
        self.inner.shared.level.store(0, Ordering::Relaxed);
    }

    /// Latest playback level in [0, 1], updated on a fixed tick and decaying
    /// toward zero when nothing is playing.
    pub fn volume(&self) -> tokio::sync::watch::Receiver<f32> {
        self.inner.volume_rx.clone()
    }
}
