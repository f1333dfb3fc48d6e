//! Tracks and the channel groups they form
//!
//! A track carries one channel. Tracks that move together (a stereo pair, a
//! surround bed) form a group whose first track is the group leader; the leader
//! owns the group's effect chain and fader.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

/// Identity of a project that owns tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(u64);

impl ProjectId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Stable identity of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(u64);

impl TrackId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Fader level in decibels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeDecibels(f32);

impl VolumeDecibels {
    pub const MIN_GAIN: f32 = -60.0; // treated as silence
    pub const UNITY_GAIN: f32 = 0.0;
    pub const MAX_GAIN: f32 = 6.0;

    pub fn new(db: f32) -> Self {
        Self(db.clamp(Self::MIN_GAIN, Self::MAX_GAIN))
    }

    pub fn db(&self) -> f32 {
        self.0
    }

    /// Linear gain factor applied by the fader
    pub fn to_amplitude(&self) -> f32 {
        if self.0 <= Self::MIN_GAIN {
            0.0
        } else {
            10.0_f32.powf(self.0 / 20.0)
        }
    }
}

impl Default for VolumeDecibels {
    fn default() -> Self {
        Self(Self::UNITY_GAIN)
    }
}

/// One channel of audio in a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Leader of the group this track belongs to; equals `id` for leaders
    pub leader: TrackId,
    pub volume: VolumeDecibels,
}

impl Track {
    pub fn is_leader(&self) -> bool {
        self.leader == self.id
    }
}

/// What the engine needs to know about tracks
pub trait TrackGroups: Send + Sync {
    /// Project owning the tracks
    fn project(&self) -> ProjectId;

    fn contains(&self, track: TrackId) -> bool;

    /// Leader of the group containing `track`; a track unknown to the list leads itself
    fn leader_of(&self, track: TrackId) -> TrackId;

    /// Tracks in the group led by `leader`, leader first
    fn group_of(&self, leader: TrackId) -> Vec<TrackId>;
}

/// Thread-safe list of the tracks in a project
#[derive(Debug)]
pub struct TrackList {
    project: ProjectId,
    next_id: AtomicU64,
    tracks: RwLock<Vec<Track>>,
}

impl TrackList {
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            next_id: AtomicU64::new(1),
            tracks: RwLock::new(Vec::new()),
        }
    }

    /// Add a group of `channels` linked tracks and return its leader
    pub fn add_group(&self, name: &str, channels: usize) -> TrackId {
        let channels = channels.max(1);
        let first = self.next_id.fetch_add(channels as u64, Ordering::Relaxed);
        let leader = TrackId::new(first);

        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        for offset in 0..channels as u64 {
            let name = if channels == 1 {
                name.to_string()
            } else {
                format!("{} {}", name, offset + 1)
            };
            tracks.push(Track {
                id: TrackId::new(first + offset),
                name,
                leader,
                volume: VolumeDecibels::default(),
            });
        }

        debug!(%leader, channels, "Added track group");
        leader
    }

    /// Remove the group led by `leader`; returns the removed track ids
    pub fn remove_group(&self, leader: TrackId) -> Vec<TrackId> {
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<_> = tracks
            .iter()
            .filter(|t| t.leader == leader)
            .map(|t| t.id)
            .collect();
        tracks.retain(|t| t.leader != leader);
        debug!(%leader, count = removed.len(), "Removed track group");
        removed
    }

    pub fn get(&self, track: TrackId) -> Option<Track> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == track)
            .cloned()
    }

    pub fn leaders(&self) -> Vec<TrackId> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.is_leader())
            .map(|t| t.id)
            .collect()
    }

    /// Set the fader of a group, addressed by any of its tracks
    pub fn set_volume(&self, track: TrackId, db: f32) {
        let leader = self.leader_of(track);
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = tracks.iter_mut().find(|t| t.id == leader) {
            t.volume = VolumeDecibels::new(db);
            trace!(%leader, db, "Track volume set");
        }
    }

    /// Linear fader gain of the group containing `track`
    pub fn gain_of(&self, track: TrackId) -> f32 {
        self.get(self.leader_of(track))
            .map(|t| t.volume.to_amplitude())
            .unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrackGroups for TrackList {
    fn project(&self) -> ProjectId {
        self.project
    }

    fn contains(&self, track: TrackId) -> bool {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.id == track)
    }

    fn leader_of(&self, track: TrackId) -> TrackId {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == track)
            .map(|t| t.leader)
            .unwrap_or(track)
    }

    fn group_of(&self, leader: TrackId) -> Vec<TrackId> {
        self.tracks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.leader == leader)
            .map(|t| t.id)
            .collect()
    }
}
