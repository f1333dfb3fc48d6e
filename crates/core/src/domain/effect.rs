//! Real-time effect contract and the registry that resolves identifiers to instances
//!
//! An effect is anything that can be driven through the real-time lifecycle:
//! initialize, add one processor per channel group, bracket a render session with
//! start/end, process blocks, and finalize. The engine never knows the concrete
//! type behind an identifier; it asks an [`EffectResolver`] for a fresh instance.

use crate::domain::surface::EditorSurface;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, EffectError>;

/// Upper bound on the audio inputs or outputs of a single effect processor.
pub const MAX_EFFECT_CHANNELS: usize = 32;

/// Opaque effect parameters, name to string value.
pub type EffectParameters = BTreeMap<String, String>;

/// Errors raised by effect instances and the states that wrap them
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("Effect could not be resolved: {id}")]
    Unresolved { id: EffectId },

    #[error("Effect refused {operation}")]
    Refused { operation: &'static str },

    #[error("Effect panicked during {operation}")]
    Panicked { operation: &'static str },

    #[error("Effect requires {requested} channels, at most {max} are supported")]
    TooManyChannels { requested: usize, max: usize },

    #[error("Invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },
}

/// Stable identifier of an effect, used for persistence and resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EffectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Capability interface every real-time effect implements
///
/// Buffers are non-interleaved: one slice per channel. `realtime_process` is
/// called on the render thread and must not allocate or block.
pub trait RealtimeEffect: Send {
    /// Display name
    fn name(&self) -> &str;

    /// Version string persisted alongside the parameters
    fn version(&self) -> &str {
        ""
    }

    /// Number of input channels one processor consumes
    fn audio_in_count(&self) -> usize;

    /// Number of output channels one processor produces
    fn audio_out_count(&self) -> usize;

    /// Preferred number of frames per `realtime_process` call
    fn block_size(&self) -> usize;

    fn set_sample_rate(&mut self, rate: f64);

    fn realtime_initialize(&mut self) -> Result<()>;

    /// Register one more processor covering `channels` track channels
    fn realtime_add_processor(&mut self, channels: usize, rate: f64) -> Result<()>;

    fn realtime_process_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process `frames` frames for the given processor, returning the frames produced
    fn realtime_process(
        &mut self,
        processor: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize;

    fn realtime_process_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn realtime_finalize(&mut self) -> Result<()>;

    /// Returns false when the effect cannot be suspended right now
    fn realtime_suspend(&mut self) -> bool {
        true
    }

    fn realtime_resume(&mut self) -> bool {
        true
    }

    fn parameters(&self) -> EffectParameters;

    fn set_parameters(&mut self, parameters: &EffectParameters) -> Result<()>;

    /// Show the effect's editor; returns false if the effect has none
    fn show_interface(&mut self, _surface: &dyn EditorSurface) -> bool {
        false
    }

    fn close_interface(&mut self) {}
}

/// Turns an effect identifier into a fresh effect instance
pub trait EffectResolver: Send + Sync {
    fn resolve(&self, id: &EffectId) -> Option<Box<dyn RealtimeEffect>>;
}

type EffectFactory = Box<dyn Fn() -> Box<dyn RealtimeEffect> + Send + Sync>;

struct RegisteredEffect {
    name: String,
    factory: EffectFactory,
}

/// Entry describing an addable effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectDescriptor {
    pub id: EffectId,
    pub name: String,
}

/// Keyed registry of effect factories
#[derive(Default)]
pub struct EffectRegistry {
    effects: HashMap<EffectId, RegisteredEffect>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in utility effects
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::domain::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous factory for the same id
    pub fn register<F>(&mut self, id: impl Into<EffectId>, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn RealtimeEffect> + Send + Sync + 'static,
    {
        let id = id.into();
        let name = name.into();
        debug!(%id, name = %name, "Registering effect");
        self.effects.insert(
            id,
            RegisteredEffect {
                name,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, id: &EffectId) -> bool {
        self.effects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Addable effects sorted by identifier
    pub fn descriptors(&self) -> Vec<EffectDescriptor> {
        let mut list: Vec<_> = self
            .effects
            .iter()
            .map(|(id, entry)| EffectDescriptor {
                id: id.clone(),
                name: entry.name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn into_resolver(self) -> Arc<dyn EffectResolver> {
        Arc::new(self)
    }
}

impl From<String> for EffectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl EffectResolver for EffectRegistry {
    fn resolve(&self, id: &EffectId) -> Option<Box<dyn RealtimeEffect>> {
        self.effects.get(id).map(|entry| (entry.factory)())
    }
}
