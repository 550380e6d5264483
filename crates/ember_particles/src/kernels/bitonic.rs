//! Bitonic sort programs over the alive list.
//!
//! All comparators face the same way: the first step of every merge stage
//! is a "flip" that pairs mirrored positions, later steps are plain
//! "disperse" strides. Pairs whose upper element lies past the alive count
//! are skipped, which behaves like padding with nearest-possible entries.
//!
//! Work is split three ways:
//! - presort: each workgroup fully sorts one 512-entry block in shared memory
//! - step: one global flip or disperse step with stride >= 512
//! - inner: all strides below 512 of one merge stage, per block

use ember_gfx::{group_count, Bindings, ComputeKernel, Slot, DEFAULT_WORKGROUP_SIZE};

use super::threads;
use crate::gpu_types::{AliveEntry, CounterConstants, SortDispatchInfo};
use crate::shaders;

/// Entries sorted by one workgroup in shared memory.
pub const SORT_BLOCK_SIZE: u32 = 2 * DEFAULT_WORKGROUP_SIZE;

/// Workgroups covering the padded problem for `count` entries.
#[must_use]
pub fn sort_group_count(count: u32) -> u32 {
    if count == 0 {
        0
    } else {
        group_count(count.next_power_of_two(), SORT_BLOCK_SIZE)
    }
}

/// Comparator pair of thread `t` for a step laid out by `info`.
#[inline]
fn comparator(t: u32, info: &SortDispatchInfo) -> (u32, u32) {
    let low = t & (info.x as u32 - 1);
    let high = 2 * (t - low);
    let index = high + low;
    let swap = (high as i32 + info.y + info.z * low as i32) as u32;
    (index, swap)
}

/// Flip step merging blocks of `block` entries.
#[must_use]
pub const fn flip_info(block: u32, padded: u32) -> SortDispatchInfo {
    let half = block / 2;
    SortDispatchInfo {
        x: half as i32,
        y: (2 * half - 1) as i32,
        z: -1,
        w: padded as i32,
    }
}

/// Disperse step with the given stride.
#[must_use]
pub const fn disperse_info(stride: u32, padded: u32) -> SortDispatchInfo {
    SortDispatchInfo {
        x: stride as i32,
        y: stride as i32,
        z: 1,
        w: padded as i32,
    }
}

/// Runs one step over a block held in local memory.
fn block_step(local: &mut [AliveEntry], len: u32, info: &SortDispatchInfo) {
    for t in 0..DEFAULT_WORKGROUP_SIZE {
        let (i, j) = comparator(t, info);
        if j < len && local[i as usize].should_swap(&local[j as usize]) {
            local.swap(i as usize, j as usize);
        }
    }
}

/// Loads the block of `group`, returning its base and live length.
fn load_block(
    group: [u32; 3],
    count: u32,
    bindings: &Bindings<'_>,
    local: &mut [AliveEntry; SORT_BLOCK_SIZE as usize],
) -> Option<(u32, u32)> {
    let base = group[0] * SORT_BLOCK_SIZE;
    if base >= count {
        return None;
    }
    let len = (count - base).min(SORT_BLOCK_SIZE);
    for i in 0..len {
        local[i as usize] = bindings.load(0, base + i);
    }
    Some((base, len))
}

fn store_block(base: u32, len: u32, bindings: &mut Bindings<'_>, local: &[AliveEntry]) {
    for i in 0..len {
        bindings.store(0, base + i, local[i as usize]);
    }
}

/// Sorts each 512-entry block of the alive list.
///
/// `b0` alive count, `u0` alive list.
pub struct BitonicPresortKernel;

impl ComputeKernel for BitonicPresortKernel {
    fn label(&self) -> &'static str {
        "particles_sort_presort"
    }

    fn source(&self) -> &'static str {
        shaders::SORT_PRESORT
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::ReadWrite(0)]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let alive: CounterConstants = bindings.constant(0);
        let mut local = [AliveEntry::default(); SORT_BLOCK_SIZE as usize];
        let Some((base, len)) = load_block(group, alive.count, bindings, &mut local) else {
            return;
        };

        let mut block = 2;
        while block <= SORT_BLOCK_SIZE {
            block_step(&mut local, len, &flip_info(block, SORT_BLOCK_SIZE));
            let mut stride = block / 4;
            while stride > 0 {
                block_step(&mut local, len, &disperse_info(stride, SORT_BLOCK_SIZE));
                stride /= 2;
            }
            block *= 2;
        }
        store_block(base, len, bindings, &local);
    }
}

/// One global flip or disperse step.
///
/// `b0` alive count, `b1` sort dispatch info, `u0` alive list.
pub struct BitonicStepKernel;

impl ComputeKernel for BitonicStepKernel {
    fn label(&self) -> &'static str {
        "particles_sort_step"
    }

    fn source(&self) -> &'static str {
        shaders::SORT_STEP
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::Constant(1), Slot::ReadWrite(0)]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let alive: CounterConstants = bindings.constant(0);
        let info: SortDispatchInfo = bindings.constant(1);
        if info.x <= 0 {
            return;
        }
        for t in threads(group, self.workgroup_size()) {
            let (i, j) = comparator(t, &info);
            if j >= alive.count {
                continue;
            }
            let a: AliveEntry = bindings.load(0, i);
            let b: AliveEntry = bindings.load(0, j);
            if a.should_swap(&b) {
                bindings.store(0, i, b);
                bindings.store(0, j, a);
            }
        }
    }
}

/// Every disperse stride below 512 of one merge stage.
///
/// `b0` alive count, `u0` alive list.
pub struct BitonicInnerKernel;

impl ComputeKernel for BitonicInnerKernel {
    fn label(&self) -> &'static str {
        "particles_sort_inner"
    }

    fn source(&self) -> &'static str {
        shaders::SORT_INNER
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::ReadWrite(0)]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let alive: CounterConstants = bindings.constant(0);
        let mut local = [AliveEntry::default(); SORT_BLOCK_SIZE as usize];
        let Some((base, len)) = load_block(group, alive.count, bindings, &mut local) else {
            return;
        };

        let mut stride = SORT_BLOCK_SIZE / 2;
        while stride > 0 {
            block_step(&mut local, len, &disperse_info(stride, SORT_BLOCK_SIZE));
            stride /= 2;
        }
        store_block(base, len, bindings, &local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(values: &mut [AliveEntry]) {
        let len = values.len() as u32;
        let padded = len.next_power_of_two();
        let mut block = 2;
        while block <= padded {
            let mut infos = vec![flip_info(block, padded)];
            let mut stride = block / 4;
            while stride > 0 {
                infos.push(disperse_info(stride, padded));
                stride /= 2;
            }
            for info in infos {
                for t in 0..padded / 2 {
                    let (i, j) = comparator(t, &info);
                    if j < len && values[i as usize].should_swap(&values[j as usize]) {
                        values.swap(i as usize, j as usize);
                    }
                }
            }
            block *= 2;
        }
    }

    #[test]
    fn test_flip_pairs_mirror_positions() {
        let info = flip_info(8, 8);
        let pairs: Vec<(u32, u32)> = (0..4).map(|t| comparator(t, &info)).collect();
        assert_eq!(pairs, vec![(0, 7), (1, 6), (2, 5), (3, 4)]);

        let info = disperse_info(2, 8);
        let pairs: Vec<(u32, u32)> = (0..4).map(|t| comparator(t, &info)).collect();
        assert_eq!(pairs, vec![(0, 2), (1, 3), (4, 6), (5, 7)]);
    }

    #[test]
    fn test_network_sorts_non_power_of_two() {
        for len in [1usize, 2, 3, 5, 17, 100, 513] {
            let mut values: Vec<AliveEntry> = (0..len)
                .map(|i| AliveEntry {
                    distance: ((i * 7919) % 101) as f32,
                    index: i as u32,
                })
                .collect();
            network(&mut values);
            assert!(
                values.windows(2).all(|w| !w[0].should_swap(&w[1])),
                "len {len} not sorted"
            );
        }
    }

    #[test]
    fn test_sort_group_count() {
        assert_eq!(sort_group_count(0), 0);
        assert_eq!(sort_group_count(1), 1);
        assert_eq!(sort_group_count(512), 1);
        assert_eq!(sort_group_count(513), 2);
        assert_eq!(sort_group_count(400 * 1024), 1024);
    }
}
