//! Ordered effect chains
//!
//! A chain belongs to one track group or to the project master. Structural
//! edits happen on the control side while the engine is suspended; the render
//! side only walks the chain through [`EffectChain::process_group`].

use crate::domain::document::ChainDocument;
use crate::domain::effect::{EffectId, EffectResolver};
use crate::domain::state::{EffectState, StateId};
use crate::domain::surface::SurfaceHandle;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct EffectChain {
    resolver: Arc<dyn EffectResolver>,
    states: Vec<EffectState>,
    bypassed: bool,
    prefaders: usize,
    postfaders: usize,
    suspend_count: u32,
    surface: Option<SurfaceHandle>,
}

impl EffectChain {
    pub fn new(resolver: Arc<dyn EffectResolver>) -> Self {
        Self {
            resolver,
            states: Vec::new(),
            bypassed: false,
            prefaders: 0,
            postfaders: 0,
            suspend_count: 0,
            surface: None,
        }
    }

    pub fn with_surface(resolver: Arc<dyn EffectResolver>, surface: SurfaceHandle) -> Self {
        let mut chain = Self::new(resolver);
        chain.surface = Some(surface);
        chain
    }

    pub fn attach_surface(&mut self, surface: SurfaceHandle) {
        self.surface = Some(surface);
    }

    pub fn detach_surface(&mut self) -> Option<SurfaceHandle> {
        self.surface.take()
    }

    fn notify_rebuild(&self) {
        if let Some(surface) = &self.surface {
            surface.notify_rebuild();
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
        debug!(bypass, "Chain bypass changed");
        self.notify_rebuild();
    }

    pub fn suspend(&mut self) {
        self.suspend_count = self.suspend_count.saturating_add(1);
    }

    pub fn resume(&mut self) {
        self.suspend_count = self.suspend_count.saturating_sub(1);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }

    /// Visit every state with its effective bypass
    ///
    /// A state counts as bypassed when the chain is bypassed or the state is
    /// inactive; evaluated fresh on each call.
    pub fn process_group<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&mut EffectState, bool),
    {
        let chain_bypassed = self.bypassed;
        for state in &mut self.states {
            let bypassed = chain_bypassed || !state.is_active();
            visitor(state, bypassed);
        }
    }

    /// Append a post-fader state for `id`
    pub fn add_state(&mut self, id: EffectId) -> &mut EffectState {
        let state = EffectState::new(id, Arc::clone(&self.resolver));
        self.push(state)
    }

    fn push(&mut self, state: EffectState) -> &mut EffectState {
        if state.is_prefade() {
            self.prefaders += 1;
        } else {
            self.postfaders += 1;
        }
        trace!(state = %state.id(), "State added to chain");
        self.states.push(state);
        self.notify_rebuild();
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    pub fn remove_state(&mut self, id: StateId) -> Option<EffectState> {
        let index = self.index_of(id)?;
        let state = self.states.remove(index);
        if state.is_prefade() {
            self.prefaders -= 1;
        } else {
            self.postfaders -= 1;
        }
        trace!(state = %id, "State removed from chain");
        self.notify_rebuild();
        Some(state)
    }

    /// Exchange the states at two positions; false if either is out of range
    pub fn swap(&mut self, i: usize, j: usize) -> bool {
        if i >= self.states.len() || j >= self.states.len() {
            return false;
        }
        self.states.swap(i, j);
        self.notify_rebuild();
        true
    }

    /// Move a state between the pre-fader and post-fader groups
    pub fn set_prefade(&mut self, id: StateId, prefade: bool) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let state = &mut self.states[index];
        if state.is_prefade() == prefade {
            return true;
        }
        state.set_prefade(prefade);
        if prefade {
            self.postfaders -= 1;
            self.prefaders += 1;
        } else {
            self.prefaders -= 1;
            self.postfaders += 1;
        }
        true
    }

    pub fn prefader_count(&self) -> usize {
        self.prefaders
    }

    pub fn postfader_count(&self) -> usize {
        self.postfaders
    }

    pub fn has_prefaders(&self) -> bool {
        self.prefaders > 0
    }

    pub fn has_postfaders(&self) -> bool {
        self.postfaders > 0
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn index_of(&self, id: StateId) -> Option<usize> {
        self.states.iter().position(|s| s.id() == id)
    }

    pub fn state(&self, index: usize) -> Option<&EffectState> {
        self.states.get(index)
    }

    pub fn state_by_id(&self, id: StateId) -> Option<&EffectState> {
        self.states.iter().find(|s| s.id() == id)
    }

    pub fn state_by_id_mut(&mut self, id: StateId) -> Option<&mut EffectState> {
        self.states.iter_mut().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectState> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EffectState> {
        self.states.iter_mut()
    }

    pub fn to_document(&self) -> ChainDocument {
        ChainDocument {
            bypass: self.bypassed,
            effects: self.states.iter().map(EffectState::to_document).collect(),
        }
    }

    /// Replace the chain contents with the states described by `doc`, in order
    pub fn load_document(&mut self, doc: &ChainDocument) {
        self.states.clear();
        self.prefaders = 0;
        self.postfaders = 0;
        self.bypassed = doc.bypass;
        for entry in &doc.effects {
            let state = EffectState::from_document(entry, Arc::clone(&self.resolver));
            if state.is_prefade() {
                self.prefaders += 1;
            } else {
                self.postfaders += 1;
            }
            self.states.push(state);
        }
        debug!(states = self.states.len(), bypass = self.bypassed, "Chain loaded");
        self.notify_rebuild();
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("states", &self.states)
            .field("bypassed", &self.bypassed)
            .field("prefaders", &self.prefaders)
            .field("postfaders", &self.postfaders)
            .field("suspend_count", &self.suspend_count)
            .field("surface", &self.surface)
            .finish()
    }
}
