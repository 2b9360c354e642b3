//! Barrier batching.
//!
//! Each command buffer owns one [`BarrierList`] that collects the
//! transitions requested during its recording session and submits them as a
//! single `vkCmdPipelineBarrier2` call. A request is resolved the moment it
//! is added: the resource's tracked state supplies the source half of the
//! barrier, the resource is transited to the destination, and the concrete
//! Vulkan barrier is queued. Resolved barriers hold plain handles, so
//! nothing in the list can dangle, and requests against the same resource
//! chain naturally: the second request's source is the first one's
//! destination.

use crate::access::{AccessState, BufferState};
use crate::buffer::Buffer;
use crate::error::{contract, Result};
use crate::swapchain::SwapchainTexture;
use crate::texture::{Texture, TextureRange};
use ash::vk;

/// Resolved barriers drained from a [`BarrierList`], ready for one
/// `vkCmdPipelineBarrier2` submission.
pub(crate) struct BarrierBatch {
    pub buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
    pub image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }
}

/// Accumulator of pending transitions for one command-buffer recording.
///
/// Lifecycle: inactive → [`begin`](Self::begin) → active → `add_*` calls →
/// drained by `CommandBuffer::push_barrier_list` → inactive. Using it out
/// of order is a contract violation: silently dropping or reordering
/// pending transitions would corrupt every referenced resource's tracked
/// state.
pub struct BarrierList {
    active: bool,
    buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
}

impl BarrierList {
    pub(crate) fn new() -> Self {
        Self {
            active: false,
            buffer_barriers: Vec::new(),
            image_barriers: Vec::new(),
        }
    }

    /// Whether a recording session has begun and not yet been pushed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of pending resolved barriers.
    pub fn pending(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    /// Open the list for a batch of barrier requests.
    pub fn begin(&mut self) -> Result<()> {
        contract!(!self.active, "barrier list is already active");
        self.active = true;
        Ok(())
    }

    /// Request a whole-buffer transition to `dst`.
    ///
    /// Reads the buffer's tracked state as the barrier source and transits
    /// the buffer to `dst`.
    pub fn add_buffer_barrier(&mut self, buffer: &mut Buffer, dst: BufferState) -> Result<()> {
        contract!(self.active, "adding to an inactive barrier list");

        let src = buffer.state()?;
        buffer.transit(dst)?;

        self.buffer_barriers.push(
            vk::BufferMemoryBarrier2::default()
                .src_stage_mask(src.stage)
                .src_access_mask(src.access)
                .dst_stage_mask(dst.stage)
                .dst_access_mask(dst.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer.handle())
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
        Ok(())
    }

    /// Request a transition of `range` to `dst`.
    ///
    /// All subresources in `range` must currently share one access state
    /// (a single barrier describes a single source); divergence is a
    /// contract violation. The range is transited to `dst`.
    pub fn add_texture_barrier(
        &mut self,
        texture: &mut Texture,
        range: TextureRange,
        dst: AccessState,
    ) -> Result<()> {
        contract!(self.active, "adding to an inactive barrier list");

        let src = texture.range_state(range)?;
        let subresource_range = texture.subresource_range(range)?;
        texture.transit(range, dst)?;

        self.image_barriers
            .push(Self::image_barrier(texture.handle(), src, dst, subresource_range));
        Ok(())
    }

    /// Request a whole-resource transition of a swapchain image to `dst`.
    pub fn add_swapchain_barrier(
        &mut self,
        texture: &mut SwapchainTexture,
        dst: AccessState,
    ) -> Result<()> {
        contract!(self.active, "adding to an inactive barrier list");

        let src = texture.access_state()?;
        let subresource_range = texture.subresource_range();
        texture.transit(dst)?;

        self.image_barriers
            .push(Self::image_barrier(texture.handle(), src, dst, subresource_range));
        Ok(())
    }

    /// Drain the pending barriers for submission, leaving the list
    /// inactive.
    pub(crate) fn drain(&mut self) -> Result<BarrierBatch> {
        contract!(self.active, "draining an inactive barrier list");
        self.active = false;
        Ok(BarrierBatch {
            buffer_barriers: std::mem::take(&mut self.buffer_barriers),
            image_barriers: std::mem::take(&mut self.image_barriers),
        })
    }

    /// Discard pending requests and deactivate. Used when the owning
    /// command buffer is reset or freed.
    pub(crate) fn clear(&mut self) {
        self.active = false;
        self.buffer_barriers.clear();
        self.image_barriers.clear();
    }

    fn image_barrier(
        image: vk::Image,
        src: AccessState,
        dst: AccessState,
        subresource_range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .old_layout(src.layout)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .new_layout(dst.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;

    #[test]
    fn begin_twice_is_a_violation() {
        let mut list = BarrierList::new();
        list.begin().unwrap();
        assert!(matches!(
            list.begin(),
            Err(GpuError::ContractViolation(_))
        ));
    }

    #[test]
    fn add_while_inactive_is_a_violation() {
        let mut list = BarrierList::new();
        let mut tex = Texture::for_tests(1, 1);
        assert!(matches!(
            list.add_texture_barrier(&mut tex, TextureRange::ALL, AccessState::SHADER_READ),
            Err(GpuError::ContractViolation(_))
        ));

        let mut buffer = Buffer::for_tests(64);
        assert!(matches!(
            list.add_buffer_barrier(&mut buffer, BufferState::TRANSFER_DST),
            Err(GpuError::ContractViolation(_))
        ));
    }

    #[test]
    fn drain_while_inactive_is_a_violation() {
        let mut list = BarrierList::new();
        assert!(list.drain().is_err());
    }

    #[test]
    fn texture_barrier_round_trip() {
        let mut list = BarrierList::new();
        let mut tex = Texture::for_tests(2, 1);

        list.begin().unwrap();
        list.add_texture_barrier(&mut tex, TextureRange::mips(0, 2), AccessState::SHADER_READ)
            .unwrap();

        // Every addressed subresource now reports exactly the destination.
        assert_eq!(tex.access_state(0, 0).unwrap(), AccessState::SHADER_READ);
        assert_eq!(tex.access_state(0, 1).unwrap(), AccessState::SHADER_READ);

        let batch = list.drain().unwrap();
        assert!(!list.is_active());
        assert_eq!(batch.image_barriers.len(), 1);

        let barrier = &batch.image_barriers[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.subresource_range.level_count, 2);
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
    }

    #[test]
    fn buffer_barrier_uses_tracked_source() {
        let mut list = BarrierList::new();
        let mut buffer = Buffer::for_tests(64);

        list.begin().unwrap();
        list.add_buffer_barrier(&mut buffer, BufferState::TRANSFER_DST)
            .unwrap();
        list.add_buffer_barrier(&mut buffer, BufferState::VERTEX)
            .unwrap();

        let batch = list.drain().unwrap();
        assert_eq!(batch.buffer_barriers.len(), 2);

        // The second request chains off the first one's destination.
        let second = &batch.buffer_barriers[1];
        assert_eq!(second.src_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(second.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(second.dst_stage_mask, vk::PipelineStageFlags2::VERTEX_INPUT);
        assert_eq!(buffer.state().unwrap(), BufferState::VERTEX);
    }

    #[test]
    fn swapchain_barrier_is_whole_resource() {
        use ash::vk::Handle;
        let mut list = BarrierList::new();
        let mut tex = SwapchainTexture::wrap(
            vk::Image::from_raw(0x1),
            vk::ImageView::from_raw(0x2),
            vk::Format::B8G8R8A8_SRGB,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        );

        list.begin().unwrap();
        list.add_swapchain_barrier(&mut tex, AccessState::COLOR_ATTACHMENT)
            .unwrap();
        list.add_swapchain_barrier(&mut tex, AccessState::PRESENT)
            .unwrap();

        assert_eq!(tex.access_state().unwrap(), AccessState::PRESENT);

        let batch = list.drain().unwrap();
        assert_eq!(batch.image_barriers.len(), 2);
        assert_eq!(batch.image_barriers[0].subresource_range.layer_count, 1);
        assert_eq!(
            batch.image_barriers[1].old_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            batch.image_barriers[1].new_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn divergent_texture_range_is_rejected_at_add() {
        let mut list = BarrierList::new();
        let mut tex = Texture::for_tests(2, 1);

        // Transition the two mips to different states in separate batches.
        list.begin().unwrap();
        list.add_texture_barrier(&mut tex, TextureRange::single(0, 0), AccessState::TRANSFER_DST)
            .unwrap();
        list.drain().unwrap();

        list.begin().unwrap();
        list.add_texture_barrier(&mut tex, TextureRange::single(1, 0), AccessState::SHADER_READ)
            .unwrap();
        list.drain().unwrap();

        // One barrier spanning both mips has no single source state.
        list.begin().unwrap();
        assert!(matches!(
            list.add_texture_barrier(&mut tex, TextureRange::mips(0, 2), AccessState::GENERAL),
            Err(GpuError::ContractViolation(_))
        ));
    }

    #[test]
    fn clear_discards_and_deactivates() {
        let mut list = BarrierList::new();
        let mut buffer = Buffer::for_tests(64);
        list.begin().unwrap();
        list.add_buffer_barrier(&mut buffer, BufferState::TRANSFER_DST)
            .unwrap();

        list.clear();
        assert!(!list.is_active());
        assert_eq!(list.pending(), 0);
    }
}
