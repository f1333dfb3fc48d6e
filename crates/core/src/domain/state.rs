//! One slot of an effect chain
//!
//! An [`EffectState`] pairs an effect identifier with the instance it resolves to,
//! the slot's bypass and fader-stage flags, and the per-group bookkeeping that
//! maps each track group to the processors registered for it.
//!
//! The instance is resolved lazily on first use. If resolution fails, or the
//! instance later panics, the state turns inert: every lifecycle call returns
//! false, processing produces nothing, and the identifier, flags and last known
//! parameters are still written out when the chain is saved.

use crate::domain::document::EffectDocument;
use crate::domain::effect::{
    EffectError, EffectId, EffectParameters, EffectResolver, RealtimeEffect, MAX_EFFECT_CHANNELS,
};
use crate::domain::fanout::FanOut;
use crate::domain::surface::EditorSurface;
use crate::domain::track::TrackId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Largest sub-chunk handed to an effect in one `realtime_process` call
pub const MAX_CHUNK_FRAMES: usize = 8192;

const EMPTY: &[f32] = &[];

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of an effect state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        Self(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state-{}", self.0)
    }
}

/// Whether a state has a usable effect instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Not resolved yet
    Pending,
    Ready,
    /// The identifier did not resolve to an instance
    Unresolved,
    /// The instance panicked and was dropped
    Faulted,
}

#[derive(Debug, Clone, Copy)]
struct GroupSlot {
    first_processor: usize,
    channels: usize,
}

/// Run an effect call, turning a panic into an error
pub(crate) fn isolate<R>(operation: &'static str, f: impl FnOnce() -> R) -> Result<R, EffectError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| EffectError::Panicked { operation })
}

pub struct EffectState {
    id: StateId,
    effect_id: EffectId,
    resolver: Arc<dyn EffectResolver>,
    effect: Option<Box<dyn RealtimeEffect>>,
    availability: Availability,
    version: String,
    parameters: EffectParameters,
    prefade: bool,
    bypassed: bool,
    suspend_count: u32,
    initialized: bool,
    groups: HashMap<TrackId, GroupSlot>,
    processors: usize,
    chunk: usize,
    scratch: Vec<Vec<f32>>,
}

impl EffectState {
    /// New post-fader state; suspended until the engine resumes it
    pub fn new(effect_id: EffectId, resolver: Arc<dyn EffectResolver>) -> Self {
        Self {
            id: StateId::next(),
            effect_id,
            resolver,
            effect: None,
            availability: Availability::Pending,
            version: String::new(),
            parameters: EffectParameters::new(),
            prefade: false,
            bypassed: false,
            suspend_count: 1,
            initialized: false,
            groups: HashMap::new(),
            processors: 0,
            chunk: 1,
            scratch: Vec::new(),
        }
    }

    /// Rebuild a state from its persisted form
    pub fn from_document(doc: &EffectDocument, resolver: Arc<dyn EffectResolver>) -> Self {
        let mut state = Self::new(doc.id.clone(), resolver);
        state.version = doc.version.clone();
        state.parameters = doc.parameters.clone();
        state.prefade = doc.prefader;
        state.bypassed = doc.bypass;
        state
    }

    pub fn to_document(&self) -> EffectDocument {
        EffectDocument {
            id: self.effect_id.clone(),
            version: self.version(),
            bypass: self.bypassed,
            prefader: self.prefade,
            parameters: self.parameters(),
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn effect_id(&self) -> &EffectId {
        &self.effect_id
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Display name of the effect, or its identifier when it has no instance
    pub fn name(&mut self) -> String {
        if self.ensure_effect() {
            if let Some(effect) = self.effect.as_deref() {
                return effect.name().to_string();
            }
        }
        self.effect_id.to_string()
    }

    pub fn version(&self) -> String {
        match self.effect.as_deref() {
            Some(effect) => effect.version().to_string(),
            None => self.version.clone(),
        }
    }

    /// Current parameters; the last known set when there is no instance
    pub fn parameters(&self) -> EffectParameters {
        match self.effect.as_deref() {
            Some(effect) => {
                isolate("parameters", || effect.parameters())
                    .unwrap_or_else(|_| self.parameters.clone())
            }
            None => self.parameters.clone(),
        }
    }

    /// Apply parameters now if resolved, otherwise keep them for later
    pub fn set_parameters(&mut self, parameters: EffectParameters) -> bool {
        if self.effect.is_none() {
            self.parameters = parameters;
            return true;
        }
        match self.call("set_parameters", |effect| effect.set_parameters(&parameters)) {
            Some(Ok(())) => {
                self.parameters = parameters;
                true
            }
            Some(Err(err)) => {
                warn!(state = %self.id, error = %err, "Effect rejected parameters");
                false
            }
            None => false,
        }
    }

    pub fn is_prefade(&self) -> bool {
        self.prefade
    }

    // Counts live in the chain; go through EffectChain::set_prefade.
    pub(crate) fn set_prefade(&mut self, prefade: bool) {
        self.prefade = prefade;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    pub fn suspend_count(&self) -> u32 {
        self.suspend_count
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }

    pub fn is_active(&self) -> bool {
        !self.bypassed && self.suspend_count == 0
    }

    /// True between a successful `initialize` and the next `finalize`
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn initialize(&mut self, rate: f64) -> bool {
        debug!(state = %self.id, effect = %self.effect_id, rate, "Initializing effect state");
        self.groups.clear();
        self.processors = 0;
        self.initialized = false;

        let ok = self.lifecycle("initialize", |effect| {
            effect.set_sample_rate(rate);
            effect.realtime_initialize()
        });
        self.initialized = ok;
        ok
    }

    /// Register the processors needed to cover `channels` channels of `track`
    ///
    /// A group is registered once per session; repeating the call for the same
    /// track keeps the existing processors.
    pub fn add_processor(&mut self, track: TrackId, channels: usize, rate: f64) -> bool {
        if self.groups.contains_key(&track) {
            debug!(state = %self.id, %track, "Group already has processors");
            return true;
        }
        let Some((num_in, num_out, block)) = self.call("add_processor", |effect| {
            (effect.audio_in_count(), effect.audio_out_count(), effect.block_size())
        }) else {
            return false;
        };

        let first_processor = self.processors;
        for group in FanOut::new(channels, num_in, num_out) {
            match self.call("add_processor", |effect| {
                effect.realtime_add_processor(group.input_count, rate)
            }) {
                Some(Ok(())) => self.processors += 1,
                Some(Err(err)) => {
                    warn!(state = %self.id, %track, error = %err, "Effect refused a processor");
                    return false;
                }
                None => return false,
            }
        }

        self.chunk = block.clamp(1, MAX_CHUNK_FRAMES);
        if self.scratch.len() < num_out || self.scratch.iter().any(|b| b.len() < self.chunk) {
            self.scratch = vec![vec![0.0; self.chunk]; num_out];
        }

        self.groups.insert(
            track,
            GroupSlot {
                first_processor,
                channels,
            },
        );
        debug!(
            state = %self.id,
            %track,
            channels,
            processors = self.processors - first_processor,
            "Added processors"
        );
        true
    }

    pub fn process_start(&mut self) -> bool {
        self.lifecycle("process_start", |effect| effect.realtime_process_start())
    }

    pub fn process_end(&mut self) -> bool {
        self.lifecycle("process_end", |effect| effect.realtime_process_end())
    }

    pub fn finalize(&mut self) -> bool {
        debug!(state = %self.id, effect = %self.effect_id, "Finalizing effect state");
        self.groups.clear();
        self.processors = 0;
        self.initialized = false;
        self.lifecycle("finalize", |effect| effect.realtime_finalize())
    }

    /// Increments the suspend count unless the effect refuses
    pub fn suspend(&mut self) -> bool {
        match self.call("suspend", |effect| effect.realtime_suspend()) {
            Some(true) => {
                self.suspend_count += 1;
                trace!(state = %self.id, count = self.suspend_count, "Suspended");
                true
            }
            Some(false) => {
                debug!(state = %self.id, "Effect refused suspension");
                false
            }
            None => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        if self.suspend_count == 0 {
            return false;
        }
        match self.call("resume", |effect| effect.realtime_resume()) {
            Some(true) => {
                self.suspend_count -= 1;
                trace!(state = %self.id, count = self.suspend_count, "Resumed");
                true
            }
            _ => false,
        }
    }

    /// Run one block of `track` through the effect
    ///
    /// `inputs` and `outputs` are distinct buffer sets with one slice per track
    /// channel. Output channels that no processor covers receive a copy of their
    /// input. Returns the frames produced by the last processor group, or 0 if
    /// the track has no processors here or the effect is unavailable.
    pub fn process(
        &mut self,
        track: TrackId,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        let Some(slot) = self.groups.get(&track).copied() else {
            return 0;
        };
        let channels = slot.channels.min(inputs.len()).min(outputs.len());
        let frames = inputs[..channels]
            .iter()
            .map(|b| b.len())
            .chain(outputs[..channels].iter().map(|b| b.len()))
            .fold(frames, usize::min);
        if channels == 0 || frames == 0 {
            return 0;
        }

        let outcome = {
            let Some(effect) = self.effect.as_deref_mut() else {
                return 0;
            };
            let scratch = &mut self.scratch;
            let chunk = self.chunk;
            isolate("process", || {
                fan_process(
                    effect,
                    scratch,
                    slot.first_processor,
                    &inputs[..channels],
                    &mut outputs[..channels],
                    frames,
                    chunk,
                )
            })
        };

        match outcome {
            Ok(produced) => produced,
            Err(err) => {
                self.fault(err);
                0
            }
        }
    }

    pub fn show_editor(&mut self, surface: &dyn EditorSurface) -> bool {
        self.call("show_editor", |effect| effect.show_interface(surface))
            .unwrap_or(false)
    }

    pub fn close_editor(&mut self) {
        self.call("close_editor", |effect| effect.close_interface());
    }

    fn ensure_effect(&mut self) -> bool {
        match self.availability {
            Availability::Ready => true,
            Availability::Unresolved | Availability::Faulted => false,
            Availability::Pending => match self.resolve() {
                Ok(effect) => {
                    self.effect = Some(effect);
                    self.availability = Availability::Ready;
                    true
                }
                Err(err) => {
                    warn!(state = %self.id, error = %err, "Effect state is inert");
                    self.availability = Availability::Unresolved;
                    false
                }
            },
        }
    }

    fn resolve(&self) -> Result<Box<dyn RealtimeEffect>, EffectError> {
        let mut effect = self
            .resolver
            .resolve(&self.effect_id)
            .ok_or_else(|| EffectError::Unresolved {
                id: self.effect_id.clone(),
            })?;

        let (num_in, num_out) =
            isolate("resolve", || (effect.audio_in_count(), effect.audio_out_count()))?;
        let widest = num_in.max(num_out);
        if widest > MAX_EFFECT_CHANNELS {
            return Err(EffectError::TooManyChannels {
                requested: widest,
                max: MAX_EFFECT_CHANNELS,
            });
        }

        if !self.parameters.is_empty() {
            let parameters = &self.parameters;
            if let Err(err) = isolate("set_parameters", || effect.set_parameters(parameters))? {
                warn!(state = %self.id, error = %err, "Stored parameters rejected");
            }
        }

        debug!(state = %self.id, effect = %self.effect_id, "Resolved effect");
        Ok(effect)
    }

    fn call<R>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn RealtimeEffect) -> R,
    ) -> Option<R> {
        if !self.ensure_effect() {
            return None;
        }
        let effect = self.effect.as_deref_mut()?;
        match isolate(operation, || f(effect)) {
            Ok(value) => Some(value),
            Err(err) => {
                self.fault(err);
                None
            }
        }
    }

    fn lifecycle(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn RealtimeEffect) -> Result<(), EffectError>,
    ) -> bool {
        match self.call(operation, f) {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                warn!(state = %self.id, operation, error = %err, "Effect call failed");
                false
            }
            None => false,
        }
    }

    fn fault(&mut self, err: EffectError) {
        error!(state = %self.id, effect = %self.effect_id, error = %err, "Effect faulted");
        if let Some(effect) = self.effect.take() {
            // Keep what we can for persistence before the instance goes away.
            if let Ok(parameters) = isolate("parameters", || effect.parameters()) {
                self.parameters = parameters;
            }
            if let Ok(version) = isolate("version", || effect.version().to_string()) {
                self.version = version;
            }
            let _ = isolate("drop", move || drop(effect));
        }
        self.availability = Availability::Faulted;
        self.groups.clear();
        self.initialized = false;
    }
}

/// Route one block through every processor group of the plan
fn fan_process(
    effect: &mut dyn RealtimeEffect,
    scratch: &mut [Vec<f32>],
    first_processor: usize,
    inputs: &[&[f32]],
    outputs: &mut [&mut [f32]],
    frames: usize,
    chunk: usize,
) -> usize {
    let channels = inputs.len();
    let num_in = effect.audio_in_count();
    let num_out = effect.audio_out_count();

    let mut produced = 0;
    let mut covered = 0;
    for group in FanOut::new(channels, num_in, num_out) {
        produced = 0;
        let mut offset = 0;
        while offset < frames {
            let len = chunk.min(frames - offset);
            let end = offset + len;

            let mut ins: [&[f32]; MAX_EFFECT_CHANNELS] = [EMPTY; MAX_EFFECT_CHANNELS];
            for (slot, input) in ins.iter_mut().take(num_in).enumerate() {
                *input = &inputs[group.input_channel(slot, channels)][offset..end];
            }

            let mut outs: [&mut [f32]; MAX_EFFECT_CHANNELS] =
                std::array::from_fn(|_| Default::default());
            let real = outputs[group.output_start..group.output_start + group.output_count]
                .iter_mut()
                .map(|buf| &mut buf[offset..end]);
            let dummies = scratch.iter_mut().map(|buf| &mut buf[..len]);
            for (out, buf) in outs.iter_mut().zip(real.chain(dummies)).take(num_out) {
                *out = buf;
            }

            produced += effect.realtime_process(
                first_processor + group.index,
                &ins[..num_in],
                &mut outs[..num_out],
                len,
            );
            offset = end;
        }
        covered = group.output_start + group.output_count;
    }

    for channel in covered..channels {
        outputs[channel][..frames].copy_from_slice(&inputs[channel][..frames]);
    }
    produced
}

impl fmt::Debug for EffectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectState")
            .field("id", &self.id)
            .field("effect_id", &self.effect_id)
            .field("availability", &self.availability)
            .field("prefade", &self.prefade)
            .field("bypassed", &self.bypassed)
            .field("suspend_count", &self.suspend_count)
            .field("initialized", &self.initialized)
            .field("processors", &self.processors)
            .finish()
    }
}
