//! Real-time effect engine
//!
//! One engine per project. It owns the master chain and the per-track chains,
//! drives the session lifecycle (initialize, add processors, start, process,
//! end, finalize) and routes each rendered block through the chains that apply
//! to it.
//!
//! # Concurrency
//!
//! A single mutex guards all chains and session bookkeeping. Every control-side
//! edit first raises the suspend depth, then takes the lock. The render path
//! checks the suspend depth and the processing flag before and after a
//! non-blocking `try_lock`; if either check fails, or the lock is busy, the block
//! is dropped (the call returns 0) instead of waiting.

use crate::domain::attach::AttachedObjects;
use crate::domain::chain::EffectChain;
use crate::domain::config::{ConfigError, EngineSettings, MAX_CHANNELS};
use crate::domain::document::ChainDocument;
use crate::domain::effect::{EffectId, EffectParameters, EffectResolver};
use crate::domain::history::UndoHistory;
use crate::domain::scratch::ScratchArena;
use crate::domain::state::{Availability, EffectState, StateId};
use crate::domain::surface::{EditorSurface, SurfaceHandle};
use crate::domain::track::{TrackGroups, TrackId};
use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine is already active")]
    AlreadyActive,

    #[error("Engine is not active")]
    NotActive,

    #[error("Engine is already processing")]
    AlreadyProcessing,

    #[error("Engine is not processing")]
    NotProcessing,

    #[error("Operation not allowed while a session is active")]
    SessionActive,

    #[error("Track group has {requested} channels, at most {max} are supported")]
    TooManyChannels { requested: usize, max: usize },

    #[error("Effect state not found: {0}")]
    StateNotFound(StateId),

    #[error("Index {index} out of bounds for a chain of {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("Invalid engine settings: {0}")]
    Settings(#[from] ConfigError),
}

/// Which chain an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainTarget {
    Master,
    /// The chain of the group containing this track
    Track(TrackId),
}

/// Read-only view of one chain slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub state: StateId,
    pub effect: EffectId,
    pub name: String,
    pub prefade: bool,
    pub bypassed: bool,
    pub active: bool,
    pub availability: Availability,
}

const EMPTY: &[f32] = &[];

type Windows<'a> = [&'a mut [f32]; MAX_CHANNELS];

#[derive(Debug, Default)]
struct Session {
    rate: f64,
    leaders: Vec<TrackId>,
    /// Every registered track, followers included, to its group leader
    members: HashMap<TrackId, TrackId>,
    chans: HashMap<TrackId, usize>,
    rates: HashMap<TrackId, f64>,
}

struct EngineInner {
    resolver: Arc<dyn EffectResolver>,
    session: Session,
    master: Option<EffectChain>,
    tracks: AttachedObjects<TrackId, EffectChain>,
    scratch: ScratchArena,
}

/// Holds the engine suspended until dropped
#[must_use = "the engine resumes as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    engine: &'a RealtimeEngine,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        let depth = self.engine.suspend_depth.fetch_sub(1, Ordering::AcqRel);
        trace!(depth = depth - 1, "Engine resumed");
    }
}

pub struct RealtimeEngine {
    resolver: Arc<dyn EffectResolver>,
    groups: Arc<dyn TrackGroups>,
    history: Arc<dyn UndoHistory>,
    settings: EngineSettings,
    inner: Mutex<EngineInner>,
    suspend_depth: AtomicUsize,
    active: AtomicBool,
    processing: AtomicBool,
    latency_us: CachePadded<AtomicU64>,
}

impl RealtimeEngine {
    pub fn new(
        settings: EngineSettings,
        resolver: Arc<dyn EffectResolver>,
        groups: Arc<dyn TrackGroups>,
        history: Arc<dyn UndoHistory>,
    ) -> Result<Self> {
        settings.validate()?;

        let factory_resolver = Arc::clone(&resolver);
        let inner = EngineInner {
            resolver: Arc::clone(&resolver),
            session: Session::default(),
            master: None,
            tracks: AttachedObjects::new(move |_: &TrackId| {
                EffectChain::new(Arc::clone(&factory_resolver))
            }),
            scratch: ScratchArena::new(settings.max_channels, settings.max_block_frames),
        };

        debug!(
            channels = settings.max_channels,
            frames = settings.max_block_frames,
            "Realtime engine created"
        );

        Ok(Self {
            resolver,
            groups,
            history,
            settings,
            inner: Mutex::new(inner),
            suspend_depth: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            latency_us: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<dyn EffectResolver> {
        &self.resolver
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth.load(Ordering::Acquire) > 0
    }

    /// Time spent in the most recent `process` call, in microseconds
    pub fn latency(&self) -> u64 {
        self.latency_us.load(Ordering::Relaxed)
    }

    /// Suspend rendering until the returned guard is dropped; nests
    pub fn suspend(&self) -> SuspendGuard<'_> {
        let depth = self.suspend_depth.fetch_add(1, Ordering::AcqRel);
        trace!(depth = depth + 1, "Engine suspended");
        SuspendGuard { engine: self }
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend, lock, run `f` with the session chains suspended, resume
    fn mutate<R>(&self, f: impl FnOnce(&mut EngineInner) -> Result<R>) -> Result<R> {
        let _guard = self.suspend();
        let mut inner = self.lock();
        inner.for_each_session_chain(EffectChain::suspend);
        let result = f(&mut *inner);
        inner.for_each_session_chain(EffectChain::resume);
        result
    }

    fn resolve_target(&self, target: ChainTarget) -> Result<ChainTarget> {
        match target {
            ChainTarget::Master => Ok(ChainTarget::Master),
            ChainTarget::Track(track) => {
                if !self.groups.contains(track) {
                    return Err(EngineError::UnknownTrack(track));
                }
                Ok(ChainTarget::Track(self.groups.leader_of(track)))
            }
        }
    }

    // ---- Session lifecycle ----

    pub fn initialize(&self, rate: f64) -> Result<()> {
        self.mutate(|inner| {
            if self.is_active() {
                return Err(EngineError::AlreadyActive);
            }
            inner.session = Session {
                rate,
                ..Session::default()
            };
            self.active.store(true, Ordering::Release);
            info!(rate, "Realtime session initialized");
            Ok(())
        })
    }

    /// Register a track group and prepare every applicable state for it
    pub fn add_processor(&self, track: TrackId, channels: usize, rate: f64) -> Result<()> {
        if !self.is_active() {
            return Err(EngineError::NotActive);
        }
        let max = self.settings.max_channels;
        if channels > max {
            return Err(EngineError::TooManyChannels {
                requested: channels,
                max,
            });
        }
        let leader = self.groups.leader_of(track);
        let members = self.groups.group_of(leader);

        self.mutate(|inner| {
            if !self.is_active() {
                return Err(EngineError::NotActive);
            }
            let EngineInner {
                resolver,
                session,
                master,
                tracks,
                ..
            } = inner;

            if !session.leaders.contains(&leader) {
                session.leaders.push(leader);
                // Joins the set resumed when the mutation ends.
                tracks.get_or_create(&leader).suspend();
            }
            session.members.insert(track, leader);
            for &member in &members {
                session.members.insert(member, leader);
            }
            session.chans.insert(leader, channels);
            session.rates.insert(leader, rate);

            let master = master.get_or_insert_with(|| EffectChain::new(Arc::clone(resolver)));
            for state in master.iter_mut() {
                attach_state(state, leader, channels, rate);
            }
            for state in tracks.get_or_create(&leader).iter_mut() {
                attach_state(state, leader, channels, rate);
            }

            debug!(%leader, channels, rate, "Processor group added");
            Ok(())
        })
    }

    pub fn process_start(&self) -> Result<()> {
        if !self.is_active() {
            return Err(EngineError::NotActive);
        }
        if self.is_processing() {
            return Err(EngineError::AlreadyProcessing);
        }

        self.mutate(|inner| {
            if self.is_processing() {
                return Err(EngineError::AlreadyProcessing);
            }
            inner.for_each_session_state(|state| {
                if state.is_initialized() {
                    state.process_start();
                }
            });
            self.processing.store(true, Ordering::Release);
            debug!("Processing started");
            Ok(())
        })
    }

    /// Run one block of `track` through the master chain, then the track's chain
    ///
    /// Any track of a registered group may be passed; it renders through the
    /// group leader's chain.
    ///
    /// `buffers` holds one slice per channel and is updated in place: the fader
    /// `gain` is applied first, post-fader states run on the gained signal, and
    /// the output of the pre-fader states (fed the un-gained signal) is added on
    /// top. Returns `frames` if any state produced audio, otherwise 0.
    pub fn process(
        &self,
        track: TrackId,
        gain: f32,
        buffers: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        if self.is_suspended() || !self.is_processing() {
            return 0;
        }
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                trace!(%track, "Engine busy, dropping block");
                return 0;
            }
        };
        if self.is_suspended() || !self.is_processing() {
            return 0;
        }

        let start = Instant::now();

        let leader = inner.session.members.get(&track).copied().unwrap_or(track);
        let Some(&channels) = inner.session.chans.get(&leader) else {
            return 0;
        };
        let channels = channels.min(buffers.len());
        let buffers = &mut buffers[..channels];
        let frames = buffers.iter().map(|b| b.len()).fold(frames, usize::min);

        let step = inner.scratch.frames();
        let mut ran = false;
        let mut offset = 0;
        while offset < frames {
            let len = step.min(frames - offset);
            ran |= inner.process_block(leader, gain, buffers, offset, len);
            offset += len;
        }

        let elapsed = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.latency_us.store(elapsed, Ordering::Relaxed);

        if ran {
            frames
        } else {
            0
        }
    }

    pub fn process_end(&self) -> Result<()> {
        if !self.is_processing() {
            return Err(EngineError::NotProcessing);
        }

        self.mutate(|inner| {
            inner.for_each_session_state(|state| {
                if state.is_initialized() {
                    state.process_end();
                }
            });
            self.processing.store(false, Ordering::Release);
            debug!("Processing ended");
            Ok(())
        })
    }

    /// End the session, waiting (bounded) for processing to stop first
    pub fn finalize(&self) -> Result<()> {
        if !self.is_active() {
            return Err(EngineError::NotActive);
        }

        let poll = Duration::from_millis(self.settings.finalize_poll_ms);
        let deadline = Instant::now() + Duration::from_millis(self.settings.finalize_timeout_ms);
        while self.is_processing() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.settings.finalize_timeout_ms,
                    "Processing did not end in time, ending it now"
                );
                break;
            }
            thread::sleep(poll);
        }

        self.mutate(|inner| {
            if !self.is_active() {
                return Err(EngineError::NotActive);
            }
            if self.processing.swap(false, Ordering::AcqRel) {
                inner.for_each_session_state(|state| {
                    if state.is_initialized() {
                        state.process_end();
                    }
                });
            }

            let EngineInner {
                session,
                master,
                tracks,
                ..
            } = inner;

            // Track chains leave the session here; undo the suspend from mutate.
            for leader in &session.leaders {
                if let Some(chain) = tracks.get_mut(leader) {
                    chain.resume();
                }
            }

            let chains = master.iter_mut().chain(tracks.values_mut());
            for chain in chains {
                for state in chain.iter_mut() {
                    if state.is_initialized() {
                        state.suspend();
                        state.finalize();
                    }
                }
            }

            *session = Session::default();
            self.active.store(false, Ordering::Release);
            info!("Realtime session finalized");
            Ok(())
        })
    }

    // ---- Chain editing ----

    /// Append an effect to a chain, preparing it if a session is running
    pub fn add_state(&self, target: ChainTarget, id: EffectId) -> Result<StateId> {
        let target = self.resolve_target(target)?;
        let active = self.is_active();

        let (state_id, name) = self.mutate(|inner| {
            let processing = self.is_processing();
            let EngineInner {
                resolver,
                session,
                master,
                tracks,
                ..
            } = inner;
            let chain = match target {
                ChainTarget::Master => {
                    master.get_or_insert_with(|| EffectChain::new(Arc::clone(resolver)))
                }
                ChainTarget::Track(leader) => tracks.get_or_create(&leader),
            };

            let state = chain.add_state(id);
            let name = state.name();
            if active {
                for &leader in &session.leaders {
                    let in_scope = match target {
                        ChainTarget::Master => true,
                        ChainTarget::Track(owner) => owner == leader,
                    };
                    if !in_scope {
                        continue;
                    }
                    let channels = session.chans.get(&leader).copied().unwrap_or(0);
                    let rate = session.rates.get(&leader).copied().unwrap_or(session.rate);
                    attach_state(state, leader, channels, rate);
                }
                if processing && state.is_initialized() {
                    state.process_start();
                }
            }
            Ok((state.id(), name))
        })?;

        debug!(state = %state_id, name = %name, "Effect added");
        self.history
            .push_state(&format!("Added {} effect", name), "Added Effect");
        Ok(state_id)
    }

    /// Remove an effect, ending and finalizing it first if it is live
    pub fn remove_state(&self, target: ChainTarget, state_id: StateId) -> Result<()> {
        let target = self.resolve_target(target)?;

        let name = self.mutate(|inner| {
            let chain = inner
                .existing_chain(target)
                .ok_or(EngineError::StateNotFound(state_id))?;
            let state = chain
                .state_by_id_mut(state_id)
                .ok_or(EngineError::StateNotFound(state_id))?;

            let name = state.name();
            if state.is_initialized() {
                if self.is_processing() {
                    state.process_end();
                }
                state.finalize();
            }
            chain.remove_state(state_id);
            Ok(name)
        })?;

        debug!(state = %state_id, name = %name, "Effect removed");
        self.history
            .push_state(&format!("Removed {} effect", name), "Removed Effect");
        Ok(())
    }

    pub fn swap(&self, target: ChainTarget, i: usize, j: usize) -> Result<()> {
        let target = self.resolve_target(target)?;
        self.mutate(|inner| {
            let chain = inner.chain(target);
            let len = chain.len();
            if chain.swap(i, j) {
                Ok(())
            } else {
                Err(EngineError::IndexOutOfBounds {
                    index: i.max(j),
                    len,
                })
            }
        })
    }

    pub fn set_prefade(&self, target: ChainTarget, state_id: StateId, prefade: bool) -> Result<()> {
        let target = self.resolve_target(target)?;
        self.mutate(|inner| {
            let found = inner
                .existing_chain(target)
                .map(|chain| chain.set_prefade(state_id, prefade))
                .unwrap_or(false);
            if found {
                Ok(())
            } else {
                Err(EngineError::StateNotFound(state_id))
            }
        })
    }

    pub fn set_state_bypass(
        &self,
        target: ChainTarget,
        state_id: StateId,
        bypass: bool,
    ) -> Result<()> {
        let target = self.resolve_target(target)?;
        self.mutate(|inner| {
            let state = inner
                .existing_chain(target)
                .and_then(|chain| chain.state_by_id_mut(state_id))
                .ok_or(EngineError::StateNotFound(state_id))?;
            state.set_bypassed(bypass);
            Ok(())
        })
    }

    /// Returns whether the effect accepted the parameters
    pub fn set_parameters(
        &self,
        target: ChainTarget,
        state_id: StateId,
        parameters: EffectParameters,
    ) -> Result<bool> {
        let target = self.resolve_target(target)?;
        self.mutate(|inner| {
            let state = inner
                .existing_chain(target)
                .and_then(|chain| chain.state_by_id_mut(state_id))
                .ok_or(EngineError::StateNotFound(state_id))?;
            Ok(state.set_parameters(parameters))
        })
    }

    /// Chain-wide bypass; does not suspend rendering
    pub fn bypass(&self, target: ChainTarget, bypass: bool) -> Result<()> {
        let target = self.resolve_target(target)?;
        self.lock().chain(target).bypass(bypass);
        Ok(())
    }

    pub fn is_bypassed(&self, target: ChainTarget) -> bool {
        let Ok(target) = self.resolve_target(target) else {
            return false;
        };
        self.lock()
            .existing_chain(target)
            .map(|chain| chain.is_bypassed())
            .unwrap_or(false)
    }

    pub fn has_prefaders(&self, target: ChainTarget) -> bool {
        let Ok(target) = self.resolve_target(target) else {
            return false;
        };
        self.lock()
            .existing_chain(target)
            .map(|chain| chain.has_prefaders())
            .unwrap_or(false)
    }

    pub fn has_postfaders(&self, target: ChainTarget) -> bool {
        let Ok(target) = self.resolve_target(target) else {
            return false;
        };
        self.lock()
            .existing_chain(target)
            .map(|chain| chain.has_postfaders())
            .unwrap_or(false)
    }

    pub fn chain_snapshot(&self, target: ChainTarget) -> Result<Vec<ChainEntry>> {
        let target = self.resolve_target(target)?;
        let mut inner = self.lock();
        let Some(chain) = inner.existing_chain(target) else {
            return Ok(Vec::new());
        };
        Ok(chain
            .iter_mut()
            .map(|state| ChainEntry {
                state: state.id(),
                effect: state.effect_id().clone(),
                name: state.name(),
                prefade: state.is_prefade(),
                bypassed: state.is_bypassed(),
                active: state.is_active(),
                availability: state.availability(),
            })
            .collect())
    }

    pub fn write_chain(&self, target: ChainTarget) -> Result<ChainDocument> {
        let target = self.resolve_target(target)?;
        Ok(self
            .lock()
            .existing_chain(target)
            .map(|chain| chain.to_document())
            .unwrap_or_default())
    }

    /// Replace a chain from a document; only between sessions
    pub fn read_chain(&self, target: ChainTarget, doc: &ChainDocument) -> Result<()> {
        let target = self.resolve_target(target)?;
        if self.is_active() {
            return Err(EngineError::SessionActive);
        }
        self.mutate(|inner| {
            if self.is_active() {
                return Err(EngineError::SessionActive);
            }
            inner.chain(target).load_document(doc);
            Ok(())
        })
    }

    /// Drop the chain attached to a track group that is going away
    pub fn detach_track(&self, leader: TrackId) -> Result<()> {
        self.mutate(|inner| {
            if inner.session.leaders.contains(&leader) {
                return Err(EngineError::SessionActive);
            }
            if inner.tracks.remove(&leader).is_some() {
                debug!(%leader, "Track chain detached");
            }
            Ok(())
        })
    }

    pub fn attach_surface(&self, target: ChainTarget, surface: SurfaceHandle) -> Result<()> {
        let target = self.resolve_target(target)?;
        self.lock().chain(target).attach_surface(surface);
        Ok(())
    }

    /// Open an effect's editor; never suspends rendering
    pub fn show_editor(
        &self,
        target: ChainTarget,
        state_id: StateId,
        surface: &dyn EditorSurface,
    ) -> Result<bool> {
        let target = self.resolve_target(target)?;
        let mut inner = self.lock();
        let state = inner
            .existing_chain(target)
            .and_then(|chain| chain.state_by_id_mut(state_id))
            .ok_or(EngineError::StateNotFound(state_id))?;
        Ok(state.show_editor(surface))
    }

    pub fn close_editor(&self, target: ChainTarget, state_id: StateId) -> Result<()> {
        let target = self.resolve_target(target)?;
        let mut inner = self.lock();
        let state = inner
            .existing_chain(target)
            .and_then(|chain| chain.state_by_id_mut(state_id))
            .ok_or(EngineError::StateNotFound(state_id))?;
        state.close_editor();
        Ok(())
    }

    /// Group leaders registered in the current session
    pub fn leaders(&self) -> Vec<TrackId> {
        self.lock().session.leaders.clone()
    }
}

/// Bring a state into the session for one more track group
fn attach_state(state: &mut EffectState, leader: TrackId, channels: usize, rate: f64) {
    if !state.is_initialized() {
        if !state.initialize(rate) {
            return;
        }
        state.resume();
    }
    state.add_processor(leader, channels, rate);
}

impl EngineInner {
    fn chain(&mut self, target: ChainTarget) -> &mut EffectChain {
        match target {
            ChainTarget::Master => {
                let resolver = &self.resolver;
                self.master
                    .get_or_insert_with(|| EffectChain::new(Arc::clone(resolver)))
            }
            ChainTarget::Track(leader) => self.tracks.get_or_create(&leader),
        }
    }

    fn existing_chain(&mut self, target: ChainTarget) -> Option<&mut EffectChain> {
        match target {
            ChainTarget::Master => self.master.as_mut(),
            ChainTarget::Track(leader) => self.tracks.get_mut(&leader),
        }
    }

    fn for_each_session_chain(&mut self, mut f: impl FnMut(&mut EffectChain)) {
        if let Some(master) = self.master.as_mut() {
            f(master);
        }
        for leader in &self.session.leaders {
            if let Some(chain) = self.tracks.get_mut(leader) {
                f(chain);
            }
        }
    }

    fn for_each_session_state(&mut self, mut f: impl FnMut(&mut EffectState)) {
        self.for_each_session_chain(|chain| chain.iter_mut().for_each(&mut f));
    }

    /// One arena-sized piece of a block; returns whether any state produced audio
    fn process_block(
        &mut self,
        leader: TrackId,
        gain: f32,
        buffers: &mut [&mut [f32]],
        offset: usize,
        len: usize,
    ) -> bool {
        let channels = buffers.len();
        let EngineInner {
            master,
            tracks,
            scratch,
            ..
        } = self;
        let mut chains = [master.as_mut(), tracks.get_mut(&leader)];
        let has_pre = chains.iter().flatten().any(|c| c.has_prefaders());
        let has_post = chains.iter().flatten().any(|c| c.has_postfaders());

        if has_pre {
            for (copy, buf) in scratch.pre_in.iter_mut().zip(buffers.iter()) {
                copy[..len].copy_from_slice(&buf[offset..offset + len]);
            }
        }

        if gain != 1.0 {
            for buf in buffers.iter_mut() {
                for sample in &mut buf[offset..offset + len] {
                    *sample *= gain;
                }
            }
        }

        let mut ran = false;

        if has_post {
            let pass = Pass {
                leader,
                prefade: false,
                channels,
                len,
            };
            let mut caller = caller_windows(buffers, offset, len);
            let mut other = scratch_windows(&mut scratch.post, len);
            let (in_caller, post_ran) =
                run_pass(&mut chains, pass, &mut caller, &mut other, None);
            if !in_caller {
                for c in 0..channels {
                    caller[c].copy_from_slice(&*other[c]);
                }
            }
            ran |= post_ran;
        }

        // Each pre-fader state feeds the next and also mixes into the caller.
        if has_pre {
            let pass = Pass {
                leader,
                prefade: true,
                channels,
                len,
            };
            let mut caller = caller_windows(buffers, offset, len);
            let mut dry = scratch_windows(&mut scratch.pre_in, len);
            let mut wet = scratch_windows(&mut scratch.pre_out, len);
            let (_, pre_ran) =
                run_pass(&mut chains, pass, &mut dry, &mut wet, Some(&mut caller));
            ran |= pre_ran;
        }

        ran
    }
}

fn caller_windows<'a>(buffers: &'a mut [&mut [f32]], offset: usize, len: usize) -> Windows<'a> {
    let mut windows: Windows<'a> = std::array::from_fn(|_| Default::default());
    for (window, buf) in windows.iter_mut().zip(buffers.iter_mut()) {
        *window = &mut buf[offset..offset + len];
    }
    windows
}

fn scratch_windows(set: &mut [Vec<f32>], len: usize) -> Windows<'_> {
    let mut windows: Windows<'_> = std::array::from_fn(|_| Default::default());
    for (window, buf) in windows.iter_mut().zip(set.iter_mut()) {
        *window = &mut buf[..len];
    }
    windows
}

/// Shape of one pre- or post-fader pass over a block piece
#[derive(Debug, Clone, Copy)]
struct Pass {
    leader: TrackId,
    prefade: bool,
    channels: usize,
    len: usize,
}

/// Run the pre- or post-fader states of both chains in order, ping-ponging
/// between `a` and `b`. When `mix` is given, every state's output is also
/// added into it. Returns whether the result is in `a`, and whether any state
/// produced audio.
fn run_pass(
    chains: &mut [Option<&mut EffectChain>; 2],
    pass: Pass,
    a: &mut Windows<'_>,
    b: &mut Windows<'_>,
    mut mix: Option<&mut Windows<'_>>,
) -> (bool, bool) {
    let mut in_a = true;
    let mut ran = false;
    for chain in chains.iter_mut().flatten() {
        chain.process_group(|state, bypassed| {
            if bypassed || state.is_prefade() != pass.prefade {
                return;
            }
            let produced = if in_a {
                run_state(state, pass, a, b)
            } else {
                run_state(state, pass, b, a)
            };
            if produced == 0 {
                return;
            }
            if let Some(mix) = mix.as_mut() {
                let output = if in_a { &*b } else { &*a };
                mix_into(mix, output, pass.channels);
            }
            in_a = !in_a;
            ran = true;
        });
    }
    (in_a, ran)
}

fn run_state(
    state: &mut EffectState,
    pass: Pass,
    src: &Windows<'_>,
    dst: &mut Windows<'_>,
) -> usize {
    let channels = pass.channels;
    let inputs: [&[f32]; MAX_CHANNELS] =
        std::array::from_fn(|c| if c < channels { &*src[c] } else { EMPTY });
    state.process(pass.leader, &inputs[..channels], &mut dst[..channels], pass.len)
}

fn mix_into(dst: &mut Windows<'_>, src: &Windows<'_>, channels: usize) {
    for (out, add) in dst.iter_mut().zip(src.iter()).take(channels) {
        for (sample, value) in out.iter_mut().zip(add.iter()) {
            *sample += value;
        }
    }
}
