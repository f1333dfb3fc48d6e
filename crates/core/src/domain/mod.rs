//! Domain entities and business rules

pub mod attach;
pub mod builtin;
pub mod chain;
pub mod config;
pub mod document;
pub mod effect;
pub mod engine;
pub mod fanout;
pub mod history;
pub mod project;
pub mod scratch;
pub mod state;
pub mod surface;
pub mod track;

// Re-export specific items to avoid ambiguous glob imports
pub use attach::AttachedObjects;
pub use chain::EffectChain;
pub use config::{
    AppConfig, CadenzaConfig, ConfigError, ConfigManager, EngineSettings, PresetManager,
    MAX_CHANNELS,
};
pub use document::{ChainDocument, DocumentError, EffectDocument};
pub use effect::{
    EffectDescriptor, EffectError, EffectId, EffectParameters, EffectRegistry, EffectResolver,
    RealtimeEffect, MAX_EFFECT_CHANNELS,
};
pub use engine::{ChainEntry, ChainTarget, EngineError, RealtimeEngine, SuspendGuard};
pub use fanout::{FanGroup, FanOut};
pub use history::{HistoryEntry, HistoryLog, NoHistory, UndoHistory};
pub use project::Project;
pub use scratch::ScratchArena;
pub use state::{Availability, EffectState, StateId, MAX_CHUNK_FRAMES};
pub use surface::{DisplaySurface, EditorSurface, SurfaceHandle};
pub use track::{ProjectId, Track, TrackGroups, TrackId, TrackList, VolumeDecibels};
