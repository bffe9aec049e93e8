use tracing::trace;

use crate::error::GlueError;

use super::context::GpuContext;
use super::textures::GlueTexture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotIndex {
    Zero,
    One,
}

impl SlotIndex {
    pub(crate) fn other(self) -> Self {
        match self {
            SlotIndex::Zero => SlotIndex::One,
            SlotIndex::One => SlotIndex::Zero,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotIndex::Zero => 0,
            SlotIndex::One => 1,
        }
    }
}

/// Two offscreen targets that alternate between being read and written.
///
/// `active` is the slot holding the latest pass output. The next pass reads
/// `active` and writes the other slot, so one slot is never both the input
/// and the output of a draw.
pub(crate) struct PingPong {
    slots: [GlueTexture; 2],
    active: Option<SlotIndex>,
}

impl PingPong {
    pub(crate) fn new(ctx: &GpuContext, width: u32, height: u32) -> Result<Self, GlueError> {
        Ok(Self {
            slots: [
                GlueTexture::render_target(ctx, "ping-pong 0", width, height)?,
                GlueTexture::render_target(ctx, "ping-pong 1", width, height)?,
            ],
            active: None,
        })
    }

    /// Reallocates both slots' storage; contents are undefined afterwards.
    pub(crate) fn resize(
        &mut self,
        ctx: &GpuContext,
        width: u32,
        height: u32,
    ) -> Result<(), GlueError> {
        let resized = [
            GlueTexture::render_target(ctx, "ping-pong 0", width, height)?,
            GlueTexture::render_target(ctx, "ping-pong 1", width, height)?,
        ];
        for slot in std::mem::replace(&mut self.slots, resized).iter() {
            slot.destroy();
        }
        self.active = None;
        Ok(())
    }

    pub(crate) fn active(&self) -> Option<SlotIndex> {
        self.active
    }

    /// Slot the next non-final pass writes into.
    pub(crate) fn write_slot(&self) -> SlotIndex {
        next_write(self.active)
    }

    pub(crate) fn read_view(&self) -> Option<&wgpu::TextureView> {
        self.active.map(|slot| self.view(slot))
    }

    pub(crate) fn view(&self, slot: SlotIndex) -> &wgpu::TextureView {
        self.slots[slot.index()].view()
    }

    /// Records that `written` now holds the latest output.
    pub(crate) fn advance(&mut self, written: SlotIndex) {
        trace!(from = ?self.active, to = ?written, "ping-pong switch");
        self.active = Some(written);
    }

    pub(crate) fn destroy(&self) {
        for slot in &self.slots {
            slot.destroy();
        }
    }
}

fn next_write(active: Option<SlotIndex>) -> SlotIndex {
    active.map_or(SlotIndex::Zero, SlotIndex::other)
}
