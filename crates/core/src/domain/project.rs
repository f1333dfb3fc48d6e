//! Project: the tracks, the effect registry and one lazily created engine

use crate::domain::config::EngineSettings;
use crate::domain::effect::{EffectRegistry, EffectResolver};
use crate::domain::engine::{RealtimeEngine, Result};
use crate::domain::history::{NoHistory, UndoHistory};
use crate::domain::track::{ProjectId, TrackGroups, TrackId, TrackList};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

pub struct Project {
    id: ProjectId,
    tracks: Arc<TrackList>,
    registry: Arc<EffectRegistry>,
    history: Arc<dyn UndoHistory>,
    settings: EngineSettings,
    engine: OnceLock<Arc<RealtimeEngine>>,
}

impl Project {
    pub fn new(id: ProjectId, registry: EffectRegistry, settings: EngineSettings) -> Self {
        Self::with_history(id, registry, settings, Arc::new(NoHistory))
    }

    pub fn with_history(
        id: ProjectId,
        registry: EffectRegistry,
        settings: EngineSettings,
        history: Arc<dyn UndoHistory>,
    ) -> Self {
        info!(project = id.as_u64(), effects = registry.len(), "Project created");
        Self {
            id,
            tracks: Arc::new(TrackList::new(id)),
            registry: Arc::new(registry),
            history,
            settings,
            engine: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn tracks(&self) -> &Arc<TrackList> {
        &self.tracks
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// The project's engine, created on first use
    pub fn realtime_engine(&self) -> Result<Arc<RealtimeEngine>> {
        if let Some(engine) = self.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let resolver = Arc::clone(&self.registry) as Arc<dyn EffectResolver>;
        let groups = Arc::clone(&self.tracks) as Arc<dyn TrackGroups>;
        let engine = Arc::new(RealtimeEngine::new(
            self.settings.clone(),
            resolver,
            groups,
            Arc::clone(&self.history),
        )?);

        // Another thread may have won the race; use whichever got stored.
        let engine = self.engine.get_or_init(|| engine);
        debug!(project = self.id.as_u64(), "Realtime engine attached");
        Ok(Arc::clone(engine))
    }

    pub fn add_group(&self, name: &str, channels: usize) -> TrackId {
        self.tracks.add_group(name, channels)
    }

    /// Remove a track group and drop its effect chain
    pub fn remove_group(&self, leader: TrackId) -> Result<Vec<TrackId>> {
        if let Some(engine) = self.engine.get() {
            engine.detach_track(leader)?;
        }
        Ok(self.tracks.remove_group(leader))
    }
}
