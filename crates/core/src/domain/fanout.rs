//! Channel fan-out planning
//!
//! An effect processor has a fixed number of inputs and outputs while a track
//! group may carry any number of channels. [`FanOut`] carves the track's channels
//! into processor-sized groups:
//!
//! - A group takes `num_in` inputs while enough remain. When fewer remain, the
//!   last group takes all of them and the missing slots wrap around to earlier
//!   channels (a mono track feeding a stereo effect sees the same channel twice).
//! - A group writes `num_out` outputs while enough remain. When fewer remain, the
//!   surplus outputs go to scratch buffers and are discarded.
//! - Iteration stops once either side runs out.
//!
//! Both processor registration and block routing walk the same iterator, so they
//! always agree on the number and shape of the groups.

/// One processor's slice of a track group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanGroup {
    /// Position of this group in the plan
    pub index: usize,
    /// First track channel fed to input slot 0
    pub input_start: usize,
    /// Distinct track channels consumed by this group
    pub input_count: usize,
    /// First track channel written by output slot 0
    pub output_start: usize,
    /// Output slots that land on track channels; the rest go to scratch
    pub output_count: usize,
}

impl FanGroup {
    /// Track channel feeding input `slot`, given the track's channel count
    #[inline]
    pub fn input_channel(&self, slot: usize, channels: usize) -> usize {
        (self.input_start + slot) % channels
    }
}

/// Iterator over the processor groups for a `(channels, num_in, num_out)` triple
#[derive(Debug, Clone)]
pub struct FanOut {
    channels: usize,
    num_in: usize,
    num_out: usize,
    in_remaining: usize,
    out_remaining: usize,
    in_pos: usize,
    out_pos: usize,
    index: usize,
    degenerate_done: bool,
}

impl FanOut {
    pub fn new(channels: usize, num_in: usize, num_out: usize) -> Self {
        Self {
            channels,
            num_in,
            num_out,
            in_remaining: channels,
            out_remaining: channels,
            in_pos: 0,
            out_pos: 0,
            index: 0,
            degenerate_done: false,
        }
    }

    /// Number of processors the plan needs
    pub fn group_count(channels: usize, num_in: usize, num_out: usize) -> usize {
        Self::new(channels, num_in, num_out).count()
    }

    fn is_degenerate(&self) -> bool {
        self.num_in == 0 || self.num_out == 0
    }

    // Sources or sinks consume nothing on one side; they get a single group.
    fn next_degenerate(&mut self) -> Option<FanGroup> {
        if self.degenerate_done || self.channels == 0 {
            return None;
        }
        self.degenerate_done = true;
        Some(FanGroup {
            index: 0,
            input_start: 0,
            input_count: self.num_in.min(self.channels),
            output_start: 0,
            output_count: self.num_out.min(self.channels),
        })
    }
}

impl Iterator for FanOut {
    type Item = FanGroup;

    fn next(&mut self) -> Option<FanGroup> {
        if self.is_degenerate() {
            return self.next_degenerate();
        }
        if self.in_remaining == 0 || self.out_remaining == 0 {
            return None;
        }

        let input_start = self.in_pos;
        let input_count = if self.in_remaining < self.num_in {
            self.in_remaining
        } else {
            self.num_in
        };
        self.in_remaining -= input_count;
        self.in_pos += input_count;

        let output_start = self.out_pos;
        let output_count = self.out_remaining.min(self.num_out);
        self.out_remaining -= output_count;
        self.out_pos += output_count;

        let index = self.index;
        self.index += 1;

        Some(FanGroup {
            index,
            input_start,
            input_count,
            output_start,
            output_count,
        })
    }
}
