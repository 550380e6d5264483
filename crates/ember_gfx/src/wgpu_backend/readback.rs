//! Non-blocking counter readback ring.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Pending,
    Ready,
    Failed,
}

struct ReadbackSlot {
    buffer: wgpu::Buffer,
    state: Arc<Mutex<SlotState>>,
    /// Issue order, so harvested values never go backwards in time.
    generation: u64,
}

/// Ring of 4-byte mappable buffers for one counter.
pub(super) struct CounterReadback {
    label: &'static str,
    slots: Vec<ReadbackSlot>,
    issued: u64,
    latest: Option<(u64, u32)>,
}

impl CounterReadback {
    pub(super) fn new(device: &wgpu::Device, label: &'static str, depth: usize) -> Self {
        let slots = (0..depth)
            .map(|_| ReadbackSlot {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: 4,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                state: Arc::new(Mutex::new(SlotState::Idle)),
                generation: 0,
            })
            .collect();
        Self {
            label,
            slots,
            issued: 0,
            latest: None,
        }
    }

    /// Collects completed maps, then claims an idle slot for a new copy.
    pub(super) fn harvest_and_claim(&mut self) -> Option<usize> {
        for slot in &mut self.slots {
            let state = *slot.state.lock();
            match state {
                SlotState::Ready => {
                    let value: u32 =
                        bytemuck::pod_read_unaligned(&slot.buffer.slice(..).get_mapped_range());
                    slot.buffer.unmap();
                    if self.latest.map_or(true, |(generation, _)| generation < slot.generation) {
                        self.latest = Some((slot.generation, value));
                    }
                    *slot.state.lock() = SlotState::Idle;
                }
                SlotState::Failed => {
                    warn!(counter = self.label, "counter readback failed");
                    *slot.state.lock() = SlotState::Idle;
                }
                SlotState::Idle | SlotState::Pending => {}
            }
        }

        let index = self
            .slots
            .iter()
            .position(|slot| *slot.state.lock() == SlotState::Idle)?;
        self.issued += 1;
        self.slots[index].generation = self.issued;
        *self.slots[index].state.lock() = SlotState::Pending;
        Some(index)
    }

    /// Staging buffer of `slot`.
    pub(super) fn buffer(&self, slot: usize) -> &wgpu::Buffer {
        &self.slots[slot].buffer
    }

    /// Requests a map of `slot` once its copy has been submitted.
    pub(super) fn map(&self, slot: usize) {
        let state = Arc::clone(&self.slots[slot].state);
        self.slots[slot]
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                *state.lock() = if result.is_ok() {
                    SlotState::Ready
                } else {
                    SlotState::Failed
                };
            });
    }

    /// Most recent counter value that has landed.
    pub(super) fn latest(&self) -> Option<u32> {
        self.latest.map(|(_, value)| value)
    }
}
