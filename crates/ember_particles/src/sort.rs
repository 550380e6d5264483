//! # Incremental Sort State
//!
//! The bitonic network over the alive list is walked one dispatch at a time
//! and suspended between frames. [`SortState`] is the resumable cursor: it
//! knows the problem size the network was laid out for, the next step, and
//! whether the list has been fully ordered since the last restart.
//!
//! ```text
//! Presort -> Flip{1024} -> Inner{1024}
//!         -> Flip{2048} -> Disperse{2048, 512} -> Inner{2048}
//!         -> ...                                -> Inner{padded}
//! ```
//!
//! The host never reads the alive count back synchronously. It keys the
//! network on the latest *resolved* count, which may lag the GPU; steps skip
//! pairs past the live count, so a stale size only costs ordering quality.

use crate::gpu_types::SortDispatchInfo;
use crate::kernels::{disperse_info, flip_info, SORT_BLOCK_SIZE};

/// One dispatch of the sort network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStep {
    /// Sort every 512-entry block in shared memory.
    Presort,
    /// Mirror-compare halves of every `block`.
    Flip {
        /// Merge width.
        block: u32,
    },
    /// Global compare at `stride` (at least one sort block).
    Disperse {
        /// Merge width.
        block: u32,
        /// Compare distance.
        stride: u32,
    },
    /// Every stride below one sort block, per block.
    Inner {
        /// Merge width.
        block: u32,
    },
}

impl SortStep {
    /// Dispatch info for global steps, `None` for block-local ones.
    #[must_use]
    pub const fn dispatch_info(self, padded: u32) -> Option<SortDispatchInfo> {
        match self {
            Self::Flip { block } => Some(flip_info(block, padded)),
            Self::Disperse { stride, .. } => Some(disperse_info(stride, padded)),
            Self::Presort | Self::Inner { .. } => None,
        }
    }

    /// The step after `self` in a network over `padded` entries.
    #[must_use]
    pub fn next(self, padded: u32) -> Option<Self> {
        let next_stage = |block: u32| {
            let block = block * 2;
            (block <= padded).then_some(Self::Flip { block })
        };
        match self {
            Self::Presort => next_stage(SORT_BLOCK_SIZE),
            Self::Flip { block } => Some(Self::disperse_or_inner(block, block / 4)),
            Self::Disperse { block, stride } => Some(Self::disperse_or_inner(block, stride / 2)),
            Self::Inner { block } => next_stage(block),
        }
    }

    fn disperse_or_inner(block: u32, stride: u32) -> Self {
        if stride >= SORT_BLOCK_SIZE {
            Self::Disperse { block, stride }
        } else {
            Self::Inner { block }
        }
    }
}

/// Problem size of the network for `count` entries.
#[inline]
#[must_use]
pub fn padded_size(count: u32) -> u32 {
    count.max(1).next_power_of_two()
}

/// Steps of the merge stage producing sorted runs of `block` entries.
#[must_use]
pub fn stage_steps(block: u32, padded: u32) -> Vec<SortStep> {
    let mut step = SortStep::Flip { block };
    let mut steps = Vec::new();
    loop {
        steps.push(step);
        match (step, step.next(padded)) {
            (SortStep::Inner { .. }, _) | (_, None) => break,
            (_, Some(next)) => step = next,
        }
    }
    steps
}

/// Dispatches in a full network for `count` entries.
#[must_use]
pub fn network_len(count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let padded = padded_size(count);
    let mut step = Some(SortStep::Presort);
    let mut len = 0;
    while let Some(current) = step {
        len += 1;
        step = current.next(padded);
    }
    len
}

/// Resumable cursor over the sort network.
#[derive(Debug, Clone, Default)]
pub struct SortState {
    /// Alive count the current network was started for.
    presorted_count: Option<u32>,
    padded: u32,
    cursor: Option<SortStep>,
    /// The list was rebuilt while the network was running.
    disturbed: bool,
    sorted: bool,
    restarts: u64,
}

impl SortState {
    /// A state that restarts on the first frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays out a fresh network for `count` entries.
    pub fn restart(&mut self, count: u32) {
        self.presorted_count = Some(count);
        self.padded = padded_size(count);
        self.cursor = (count > 0).then_some(SortStep::Presort);
        self.disturbed = false;
        self.sorted = count == 0;
        self.restarts += 1;
    }

    /// Forgets all progress; the next frame restarts.
    pub fn invalidate(&mut self) {
        self.presorted_count = None;
        self.cursor = None;
        self.disturbed = false;
        self.sorted = false;
    }

    /// Reconciles the cursor with this frame's alive list.
    ///
    /// `rebuilt` is set when simulation rewrote the list since the last
    /// frame. Returns whether the network restarted.
    pub fn begin_frame(&mut self, count: u32, rebuilt: bool) -> bool {
        if self.presorted_count != Some(count) || (rebuilt && self.sorted) {
            self.restart(count);
            return true;
        }
        if rebuilt {
            self.disturbed = true;
        }
        false
    }

    /// Records that every step up to and including `Inner { block }` ran
    /// outside the cursor.
    pub fn finish_stage(&mut self, block: u32) {
        self.cursor = SortStep::Inner { block }.next(self.padded);
        if self.cursor.is_none() {
            self.disturbed = false;
            self.sorted = true;
        }
    }

    /// Whether the cursor sits at the start of the stage merging into runs
    /// of `block` entries.
    #[must_use]
    pub fn awaits_stage(&self, block: u32) -> bool {
        self.cursor == Some(SortStep::Flip { block })
    }

    /// Takes the next step, or `None` once the list is held sorted.
    ///
    /// Finishing a disturbed network starts over instead of holding.
    pub fn next_step(&mut self) -> Option<SortStep> {
        let step = self.cursor?;
        self.cursor = step.next(self.padded);
        if self.cursor.is_none() {
            if self.disturbed {
                if let Some(count) = self.presorted_count {
                    self.restart(count);
                }
            } else {
                self.sorted = true;
            }
        }
        Some(step)
    }

    /// Whether the list is fully ordered for [`presorted_count`](Self::presorted_count).
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Alive count the running network was laid out for.
    #[must_use]
    pub fn presorted_count(&self) -> Option<u32> {
        self.presorted_count
    }

    /// Padded problem size of the running network.
    #[must_use]
    pub fn padded(&self) -> u32 {
        self.padded
    }

    /// Network restarts so far.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(count: u32) -> Vec<SortStep> {
        let mut state = SortState::new();
        state.restart(count);
        std::iter::from_fn(|| state.next_step()).collect()
    }

    #[test]
    fn test_small_lists_only_presort() {
        assert_eq!(steps(1), vec![SortStep::Presort]);
        assert_eq!(steps(512), vec![SortStep::Presort]);
        assert!(steps(0).is_empty());
    }

    #[test]
    fn test_step_sequence_for_2048() {
        assert_eq!(
            steps(1500),
            vec![
                SortStep::Presort,
                SortStep::Flip { block: 1024 },
                SortStep::Inner { block: 1024 },
                SortStep::Flip { block: 2048 },
                SortStep::Disperse { block: 2048, stride: 512 },
                SortStep::Inner { block: 2048 },
            ]
        );
    }

    #[test]
    fn test_network_len() {
        assert_eq!(network_len(0), 0);
        assert_eq!(network_len(300), 1);
        assert_eq!(network_len(2048), 6);
        // 1 presort + sum of (flips, disperses, inner) over ten merge stages.
        assert_eq!(network_len(400 * 1024), 66);
    }

    #[test]
    fn test_holds_once_sorted() {
        let mut state = SortState::new();
        assert!(state.begin_frame(1000, true));
        while state.next_step().is_some() {}
        assert!(state.is_sorted());

        // Same list, nothing to do.
        assert!(!state.begin_frame(1000, false));
        assert_eq!(state.next_step(), None);

        // A rebuilt list must be sorted again.
        assert!(state.begin_frame(1000, true));
        assert_eq!(state.next_step(), Some(SortStep::Presort));
    }

    #[test]
    fn test_count_change_restarts() {
        let mut state = SortState::new();
        state.begin_frame(4096, true);
        state.next_step();
        state.next_step();
        assert!(state.begin_frame(5000, false));
        assert_eq!(state.presorted_count(), Some(5000));
        assert_eq!(state.padded(), 8192);
        assert_eq!(state.next_step(), Some(SortStep::Presort));
        assert_eq!(state.restarts(), 2);
    }

    #[test]
    fn test_disturbed_network_restarts_on_completion() {
        let mut state = SortState::new();
        state.begin_frame(1024, true);
        state.next_step();
        assert!(!state.begin_frame(1024, true));
        state.next_step();
        assert_eq!(state.next_step(), Some(SortStep::Inner { block: 1024 }));
        assert!(!state.is_sorted());
        assert_eq!(state.next_step(), Some(SortStep::Presort));
    }

    #[test]
    fn test_stage_steps_end_with_inner() {
        assert_eq!(
            stage_steps(4096, 4096),
            vec![
                SortStep::Flip { block: 4096 },
                SortStep::Disperse { block: 4096, stride: 1024 },
                SortStep::Disperse { block: 4096, stride: 512 },
                SortStep::Inner { block: 4096 },
            ]
        );
    }

    #[test]
    fn test_finish_stage_moves_cursor() {
        let mut state = SortState::new();
        state.restart(2048);
        assert_eq!(state.next_step(), Some(SortStep::Presort));
        state.finish_stage(1024);
        assert_eq!(state.next_step(), Some(SortStep::Flip { block: 2048 }));
        state.finish_stage(2048);
        assert!(state.is_sorted());
        assert_eq!(state.next_step(), None);
    }

    #[test]
    fn test_dispatch_info_only_for_global_steps() {
        assert!(SortStep::Presort.dispatch_info(1024).is_none());
        assert!(SortStep::Inner { block: 1024 }.dispatch_info(1024).is_none());
        let info = SortStep::Flip { block: 1024 }.dispatch_info(1024).unwrap();
        assert_eq!((info.x, info.y, info.z), (512, 1023, -1));
    }

    #[test]
    fn test_awaits_stage_tracks_cursor() {
        let mut state = SortState::new();
        state.restart(1500);
        assert!(!state.awaits_stage(1024));
        assert_eq!(state.next_step(), Some(SortStep::Presort));
        assert!(state.awaits_stage(1024));
        assert!(!state.awaits_stage(2048));
        state.finish_stage(1024);
        assert!(state.awaits_stage(2048));
        state.finish_stage(2048);
        assert!(state.is_sorted());
        assert!(!state.awaits_stage(4096));
    }
}
