use std::collections::VecDeque;

use ash::vk;

/// Command buffer and fence of one submission.
#[derive(Clone, Copy, Debug)]
pub(super) struct Slot {
    pub cbuf: vk::CommandBuffer,
    pub fence: vk::Fence,
}

/// Tracks submissions to the single queue by epoch.
///
/// Epochs grow monotonically. Queue executes submissions in order,
/// so completion of an epoch implies completion of every earlier one.
#[derive(Debug, Default)]
pub(super) struct Submissions {
    next: u64,
    pending: VecDeque<(u64, Slot)>,
    free: Vec<Slot>,
}

impl Submissions {
    pub fn new() -> Self {
        Submissions::default()
    }

    /// Returns recycled slot, if any.
    pub fn take_free(&mut self) -> Option<Slot> {
        self.free.pop()
    }

    /// Records submitted slot and returns its epoch.
    pub fn push(&mut self, slot: Slot) -> u64 {
        let epoch = self.next;
        self.next += 1;
        self.pending.push_back((epoch, slot));

        if self.pending.len() > 32 {
            tracing::warn!(
                "Too many pending submissions ({}) accumulated",
                self.pending.len()
            );
        }

        epoch
    }

    /// Returns fence to wait on for `epoch`.
    /// `None` if epoch is already retired.
    pub fn fence(&self, epoch: u64) -> Option<vk::Fence> {
        self.pending
            .iter()
            .find(|(e, _)| *e == epoch)
            .map(|(_, slot)| slot.fence)
    }

    /// Removes slots of `epoch` and every earlier epoch.
    /// Caller must reset them before [`Submissions::recycle`].
    pub fn retire(&mut self, epoch: u64) -> Vec<Slot> {
        let count = self
            .pending
            .iter()
            .take_while(|(e, _)| *e <= epoch)
            .count();

        self.pending.drain(..count).map(|(_, slot)| slot).collect()
    }

    /// Removes all pending slots.
    pub fn retire_all(&mut self) -> Vec<Slot> {
        self.pending.drain(..).map(|(_, slot)| slot).collect()
    }

    pub fn recycle(&mut self, slots: impl IntoIterator<Item = Slot>) {
        self.free.extend(slots);

        if self.free.len() > 64 {
            tracing::warn!("Too large submission cache accumulated");
        }
    }

    /// Drains every slot, pending or free. Used on device destruction.
    pub fn drain(&mut self) -> Vec<Slot> {
        let mut slots = self.retire_all();
        slots.append(&mut self.free);
        slots
    }
}
