//! Render thread
//!
//! Plays the host's role for one track group: opens a realtime session on the
//! engine, then pulls blocks from a [`SignalSource`] through
//! [`RealtimeEngine::process`] on a dedicated thread until stopped. Rendered
//! samples can be forwarded, interleaved, to a [`RingProducer`] for monitoring.

use super::ring::RingProducer;
use super::signal::SignalSource;
use cadenza_core::domain::config::MAX_CHANNELS;
use cadenza_core::domain::engine::{EngineError, RealtimeEngine};
use cadenza_core::domain::track::TrackId;
use crossbeam::channel::{bounded, select, tick, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid render spec: {0}")]
    InvalidSpec(String),

    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Render thread panicked")]
    Panicked,
}

/// What to render, and how fast
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub track: TrackId,
    pub channels: usize,
    pub block_frames: usize,
    pub sample_rate: u32,
    /// Fader gain applied by the engine
    pub gain: f32,
    /// Wait one block duration between blocks instead of rendering flat out
    pub paced: bool,
}

impl RenderSpec {
    fn validate(&self, source_channels: usize) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(RenderError::InvalidSpec(format!(
                "channels must be between 1 and {}",
                MAX_CHANNELS
            )));
        }
        if self.channels != source_channels {
            return Err(RenderError::InvalidSpec(format!(
                "source has {} channels, spec has {}",
                source_channels, self.channels
            )));
        }
        if self.block_frames == 0 {
            return Err(RenderError::InvalidSpec("block_frames must be positive".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(RenderError::InvalidSpec("sample_rate must be positive".to_string()));
        }
        Ok(())
    }

    fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / f64::from(self.sample_rate))
    }
}

/// Counters updated by the render thread, readable from anywhere
#[derive(Debug, Default)]
pub struct RenderStats {
    blocks: AtomicU64,
    processed: AtomicU64,
    dropped_samples: AtomicU64,
    max_latency_us: AtomicU64,
}

impl RenderStats {
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Blocks in which at least one effect produced audio
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Samples lost because the monitor ring was full
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    pub fn max_latency_us(&self) -> u64 {
        self.max_latency_us.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> RenderReport {
        RenderReport {
            blocks: self.blocks(),
            processed: self.processed(),
            dropped_samples: self.dropped_samples(),
            max_latency_us: self.max_latency_us(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderReport {
    pub blocks: u64,
    pub processed: u64,
    pub dropped_samples: u64,
    pub max_latency_us: u64,
}

pub struct RenderThread {
    engine: Arc<RealtimeEngine>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<RenderStats>,
}

impl RenderThread {
    /// Open a session for `spec.track` and start rendering
    ///
    /// The session is set up on the calling thread so that failures surface
    /// here; on failure the engine is left finalized.
    pub fn spawn(
        engine: Arc<RealtimeEngine>,
        spec: RenderSpec,
        source: Box<dyn SignalSource>,
        monitor: Option<RingProducer>,
    ) -> Result<Self> {
        spec.validate(source.channels())?;

        let rate = f64::from(spec.sample_rate);
        engine.initialize(rate)?;
        if let Err(err) = engine
            .add_processor(spec.track, spec.channels, rate)
            .and_then(|()| engine.process_start())
        {
            if let Err(finalize_err) = engine.finalize() {
                warn!(error = %finalize_err, "Failed to finalize after setup error");
            }
            return Err(err.into());
        }

        let (stop_tx, stop_rx) = bounded(1);
        let stats = Arc::new(RenderStats::default());

        let worker = RenderLoop {
            engine: Arc::clone(&engine),
            spec: spec.clone(),
            source,
            monitor,
            stats: Arc::clone(&stats),
        };

        let handle = match thread::Builder::new()
            .name("cadenza-render".to_string())
            .spawn(move || worker.run(stop_rx))
        {
            Ok(handle) => handle,
            Err(err) => {
                let _ = engine.process_end();
                let _ = engine.finalize();
                return Err(err.into());
            }
        };

        info!(
            track = %spec.track,
            channels = spec.channels,
            block_frames = spec.block_frames,
            rate = spec.sample_rate,
            paced = spec.paced,
            "Render thread started"
        );

        Ok(Self {
            engine,
            stop: Some(stop_tx),
            handle: Some(handle),
            stats,
        })
    }

    pub fn stats(&self) -> &Arc<RenderStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop rendering, end processing and finalize the session
    pub fn stop(mut self) -> Result<RenderReport> {
        let joined = self.join();
        let ended = self.engine.process_end();
        let finalized = self.engine.finalize();
        joined?;
        ended?;
        finalized?;

        let report = self.stats.report();
        info!(blocks = report.blocks, dropped = report.dropped_samples, "Render thread stopped");
        Ok(report)
    }

    fn join(&mut self) -> Result<()> {
        // Dropping the sender disconnects the channel, which the loop treats as stop
        self.stop.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                error!("Render thread panicked");
                RenderError::Panicked
            }),
            None => Ok(()),
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        let _ = self.join();
        if self.engine.is_processing() {
            if let Err(err) = self.engine.process_end() {
                warn!(error = %err, "Failed to end processing on drop");
            }
        }
        if self.engine.is_active() {
            if let Err(err) = self.engine.finalize() {
                warn!(error = %err, "Failed to finalize on drop");
            }
        }
    }
}

struct RenderLoop {
    engine: Arc<RealtimeEngine>,
    spec: RenderSpec,
    source: Box<dyn SignalSource>,
    monitor: Option<RingProducer>,
    stats: Arc<RenderStats>,
}

impl RenderLoop {
    fn run(mut self, stop: Receiver<()>) {
        let frames = self.spec.block_frames;
        let channels = self.spec.channels;
        let ticker = tick(self.spec.block_duration());

        let mut data = vec![vec![0.0f32; frames]; channels];
        let mut interleaved = vec![0.0f32; frames * channels];

        loop {
            if self.spec.paced {
                select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => {}
                }
            } else {
                select! {
                    recv(stop) -> _ => break,
                    default => {}
                }
            }

            let mut buffers: [&mut [f32]; MAX_CHANNELS] =
                std::array::from_fn(|_| Default::default());
            for (slot, buf) in buffers.iter_mut().zip(data.iter_mut()) {
                *slot = buf.as_mut_slice();
            }
            let buffers = &mut buffers[..channels];

            self.source.fill(buffers, frames);
            let produced = self
                .engine
                .process(self.spec.track, self.spec.gain, buffers, frames);

            self.stats.blocks.fetch_add(1, Ordering::Relaxed);
            if produced > 0 {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            self.stats
                .max_latency_us
                .fetch_max(self.engine.latency(), Ordering::Relaxed);

            if let Some(monitor) = self.monitor.as_mut() {
                for (frame, out) in interleaved.chunks_exact_mut(channels).enumerate() {
                    for (c, sample) in out.iter_mut().enumerate() {
                        *sample = data[c][frame];
                    }
                }
                let written = monitor.push(&interleaved);
                let lost = (interleaved.len() - written) as u64;
                if lost > 0 {
                    self.stats.dropped_samples.fetch_add(lost, Ordering::Relaxed);
                }
            }
        }

        debug!(blocks = self.stats.blocks(), "Render loop exited");
    }
}
