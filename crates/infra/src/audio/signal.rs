//! Signal sources that feed the render loop

use std::f64::consts::TAU;

/// Fills one block of non-interleaved channel buffers per call
pub trait SignalSource: Send {
    fn channels(&self) -> usize;

    fn fill(&mut self, buffers: &mut [&mut [f32]], frames: usize);
}

/// Sine tone, identical on every channel
#[derive(Debug, Clone)]
pub struct ToneSource {
    channels: usize,
    frequency: f64,
    amplitude: f32,
    sample_rate: f64,
    phase: f64,
}

impl ToneSource {
    pub fn new(channels: usize, frequency: f64, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            channels,
            frequency,
            amplitude,
            sample_rate: f64::from(sample_rate.max(1)),
            phase: 0.0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }
}

impl SignalSource for ToneSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn fill(&mut self, buffers: &mut [&mut [f32]], frames: usize) {
        let step = TAU * self.frequency / self.sample_rate;
        let start = self.phase;

        for buf in buffers.iter_mut() {
            let mut phase = start;
            for sample in buf.iter_mut().take(frames) {
                *sample = self.amplitude * phase.sin() as f32;
                phase += step;
            }
        }

        self.phase = (start + step * frames as f64) % TAU;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SilenceSource {
    channels: usize,
}

impl SilenceSource {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl SignalSource for SilenceSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn fill(&mut self, buffers: &mut [&mut [f32]], frames: usize) {
        for buf in buffers.iter_mut() {
            let n = frames.min(buf.len());
            buf[..n].fill(0.0);
        }
    }
}
