//! Built-in utility effects
//!
//! Level and routing utilities that make the engine usable without any
//! third-party effects loaded. Parameter values are kept as given so that a
//! saved chain reads back byte-for-byte.

use crate::domain::effect::{EffectError, EffectParameters, EffectRegistry, RealtimeEffect, Result};

pub const GAIN: &str = "builtin.gain";
pub const POLARITY: &str = "builtin.polarity";
pub const STEREO_WIDTH: &str = "builtin.stereo_width";
pub const MONO_SUM: &str = "builtin.mono_sum";

const VERSION: &str = "1.0.0";
const BLOCK_SIZE: usize = 512;

/// Parameter limits
pub mod params {
    pub const GAIN_DB_MIN: f32 = -60.0;
    pub const GAIN_DB_MAX: f32 = 24.0;

    pub const WIDTH_MIN: f32 = 0.0;
    pub const WIDTH_MAX: f32 = 2.0;
}

pub fn register_builtins(registry: &mut EffectRegistry) {
    registry.register(GAIN, "Gain", || Box::new(Gain::default()));
    registry.register(POLARITY, "Polarity", || Box::new(Polarity::default()));
    registry.register(STEREO_WIDTH, "Stereo Width", || Box::new(StereoWidth::default()));
    registry.register(MONO_SUM, "Mono Sum", || Box::new(MonoSum::default()));
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| EffectError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Stores the accepted value of a single named parameter
fn store(parameters: &mut EffectParameters, name: &str, value: &str) {
    parameters.insert(name.to_string(), value.to_string());
}

/// Static gain in decibels, one channel in and out
#[derive(Debug)]
pub struct Gain {
    factor: f32,
    processors: usize,
    parameters: EffectParameters,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            factor: 1.0,
            processors: 0,
            parameters: EffectParameters::new(),
        }
    }
}

impl RealtimeEffect for Gain {
    fn name(&self) -> &str {
        "Gain"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn audio_in_count(&self) -> usize {
        1
    }

    fn audio_out_count(&self) -> usize {
        1
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn set_sample_rate(&mut self, _rate: f64) {}

    fn realtime_initialize(&mut self) -> Result<()> {
        self.processors = 0;
        Ok(())
    }

    fn realtime_add_processor(&mut self, _channels: usize, _rate: f64) -> Result<()> {
        self.processors += 1;
        Ok(())
    }

    fn realtime_process(
        &mut self,
        _processor: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        for (out, input) in outputs[0][..frames].iter_mut().zip(&inputs[0][..frames]) {
            *out = input * self.factor;
        }
        frames
    }

    fn realtime_finalize(&mut self) -> Result<()> {
        self.processors = 0;
        Ok(())
    }

    fn parameters(&self) -> EffectParameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &EffectParameters) -> Result<()> {
        if let Some(value) = parameters.get("gain_db") {
            let db: f32 = parse("gain_db", value)?;
            let db = db.clamp(params::GAIN_DB_MIN, params::GAIN_DB_MAX);
            self.factor = if db <= params::GAIN_DB_MIN {
                0.0
            } else {
                10.0_f32.powf(db / 20.0)
            };
            store(&mut self.parameters, "gain_db", value);
        }
        Ok(())
    }
}

/// Polarity inversion, one channel in and out
#[derive(Debug, Default)]
pub struct Polarity {
    invert: bool,
    parameters: EffectParameters,
}

impl RealtimeEffect for Polarity {
    fn name(&self) -> &str {
        "Polarity"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn audio_in_count(&self) -> usize {
        1
    }

    fn audio_out_count(&self) -> usize {
        1
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn set_sample_rate(&mut self, _rate: f64) {}

    fn realtime_initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn realtime_add_processor(&mut self, _channels: usize, _rate: f64) -> Result<()> {
        Ok(())
    }

    fn realtime_process(
        &mut self,
        _processor: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        let sign = if self.invert { -1.0 } else { 1.0 };
        for (out, input) in outputs[0][..frames].iter_mut().zip(&inputs[0][..frames]) {
            *out = input * sign;
        }
        frames
    }

    fn realtime_finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> EffectParameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &EffectParameters) -> Result<()> {
        if let Some(value) = parameters.get("invert") {
            self.invert = parse("invert", value)?;
            store(&mut self.parameters, "invert", value);
        }
        Ok(())
    }
}

/// Mid/side width control, two channels in and out
#[derive(Debug)]
pub struct StereoWidth {
    width: f32,
    parameters: EffectParameters,
}

impl Default for StereoWidth {
    fn default() -> Self {
        Self {
            width: 1.0,
            parameters: EffectParameters::new(),
        }
    }
}

impl RealtimeEffect for StereoWidth {
    fn name(&self) -> &str {
        "Stereo Width"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn audio_in_count(&self) -> usize {
        2
    }

    fn audio_out_count(&self) -> usize {
        2
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn set_sample_rate(&mut self, _rate: f64) {}

    fn realtime_initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn realtime_add_processor(&mut self, _channels: usize, _rate: f64) -> Result<()> {
        Ok(())
    }

    fn realtime_process(
        &mut self,
        _processor: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        let (left_out, right_out) = outputs.split_at_mut(1);
        for i in 0..frames {
            let (l, r) = (inputs[0][i], inputs[1][i]);
            let mid = 0.5 * (l + r);
            let side = 0.5 * (l - r) * self.width;
            left_out[0][i] = mid + side;
            right_out[0][i] = mid - side;
        }
        frames
    }

    fn realtime_finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> EffectParameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &EffectParameters) -> Result<()> {
        if let Some(value) = parameters.get("width") {
            let width: f32 = parse("width", value)?;
            self.width = width.clamp(params::WIDTH_MIN, params::WIDTH_MAX);
            store(&mut self.parameters, "width", value);
        }
        Ok(())
    }
}

/// Averages two channels into one
#[derive(Debug, Default)]
pub struct MonoSum;

impl RealtimeEffect for MonoSum {
    fn name(&self) -> &str {
        "Mono Sum"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn audio_in_count(&self) -> usize {
        2
    }

    fn audio_out_count(&self) -> usize {
        1
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn set_sample_rate(&mut self, _rate: f64) {}

    fn realtime_initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn realtime_add_processor(&mut self, _channels: usize, _rate: f64) -> Result<()> {
        Ok(())
    }

    fn realtime_process(
        &mut self,
        _processor: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        for i in 0..frames {
            outputs[0][i] = 0.5 * (inputs[0][i] + inputs[1][i]);
        }
        frames
    }

    fn realtime_finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> EffectParameters {
        EffectParameters::new()
    }

    fn set_parameters(&mut self, _parameters: &EffectParameters) -> Result<()> {
        Ok(())
    }
}
