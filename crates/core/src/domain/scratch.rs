//! Pre-sized buffers the engine routes audio through
//!
//! Allocated once per engine from the configured channel and frame limits and
//! reused for every block, so the render path never touches the allocator.

/// Three non-interleaved buffer sets of `channels x frames` samples
#[derive(Debug)]
pub struct ScratchArena {
    channels: usize,
    frames: usize,
    /// Ping-pong partner of the caller's buffers for post-fader states
    pub(crate) post: Vec<Vec<f32>>,
    /// Un-gained copy of the input for pre-fader states
    pub(crate) pre_in: Vec<Vec<f32>>,
    /// Ping-pong partner of `pre_in`
    pub(crate) pre_out: Vec<Vec<f32>>,
}

impl ScratchArena {
    pub fn new(channels: usize, frames: usize) -> Self {
        let set = || vec![vec![0.0; frames]; channels];
        Self {
            channels,
            frames,
            post: set(),
            pre_in: set(),
            pre_out: set(),
        }
    }

    /// Channels per set
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames per channel; longer blocks are processed in pieces of this size
    pub fn frames(&self) -> usize {
        self.frames
    }
}
