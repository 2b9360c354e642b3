//! Command buffer recording and pooling.
//!
//! A [`CommandPool`] owns a fixed-capacity arena of [`CommandBuffer`]s and
//! hands out stable [`CommandBufferId`]s instead of references. Every
//! recording operation is gated by an explicit [`RecordState`] check, and
//! each buffer owns one [`BarrierList`] scoped to its recording session.

use crate::access::{AccessState, BufferState};
use crate::barrier::BarrierList;
use crate::buffer::Buffer;
use crate::error::{contract, GpuError, Result};
use crate::swapchain::SwapchainTexture;
use crate::texture::{Texture, TextureRange};
use aurora_core::{SlotId, SlotPool};
use ash::vk;

/// Recording lifecycle of one command buffer.
///
/// ```text
/// Initial --begin--> Recording --begin_rendering--> Rendering
///                    Recording <--end_rendering---- Rendering
///                    Recording --end--> Executable --begin--> Recording
/// ```
///
/// Draw calls require `Rendering`; dispatch, transfer, and barrier calls
/// require `Recording` (a rendering scope must not be open for those).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Freshly allocated or reset, nothing recorded.
    Initial,
    /// Between `begin` and `end`, outside any rendering scope.
    Recording,
    /// Inside a `begin_rendering`/`end_rendering` scope.
    Rendering,
    /// Recording finished, ready for submission.
    Executable,
}

impl RecordState {
    fn begin(self) -> Result<Self> {
        contract!(
            matches!(self, Self::Initial | Self::Executable),
            "begin from {self:?}, expected Initial or Executable"
        );
        Ok(Self::Recording)
    }

    fn end(self) -> Result<Self> {
        contract!(
            self == Self::Recording,
            "end from {self:?}, expected Recording (close the rendering scope first)"
        );
        Ok(Self::Executable)
    }

    fn begin_rendering(self) -> Result<Self> {
        contract!(
            self == Self::Recording,
            "begin_rendering from {self:?}, expected Recording"
        );
        Ok(Self::Rendering)
    }

    fn end_rendering(self) -> Result<Self> {
        contract!(
            self == Self::Rendering,
            "end_rendering from {self:?}, expected Rendering"
        );
        Ok(Self::Recording)
    }

    fn require_recording(self) -> Result<()> {
        contract!(
            self == Self::Recording,
            "operation requires Recording state outside a rendering scope, found {self:?}"
        );
        Ok(())
    }

    fn require_rendering(self) -> Result<()> {
        contract!(
            self == Self::Rendering,
            "draw call outside a rendering scope, state is {self:?}"
        );
        Ok(())
    }
}

/// Stable identity of a command buffer within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferId(SlotId);

impl CommandBufferId {
    pub fn as_raw(self) -> u32 {
        self.0.as_raw()
    }
}

impl std::fmt::Display for CommandBufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd{}", self.0)
    }
}

/// One recordable unit of GPU work.
///
/// Constructed only by [`CommandPool::alloc`]; destroyed only by
/// [`CommandPool::free`], [`CommandPool::reset`], or pool destruction.
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    id: CommandBufferId,
    state: RecordState,
    barriers: BarrierList,
}

impl CommandBuffer {
    fn new(handle: vk::CommandBuffer, id: CommandBufferId) -> Self {
        Self {
            handle,
            id,
            state: RecordState::Initial,
            barriers: BarrierList::new(),
        }
    }

    /// Get the raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Get the pool-stable identity of this buffer.
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    /// Current recording state.
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Whether the buffer still refers to a live native allocation.
    pub fn is_created(&self) -> bool {
        self.handle != vk::CommandBuffer::null()
    }

    /// Begin recording.
    ///
    /// Valid from `Initial` or `Executable` (the pool is created with the
    /// reset-command-buffer flag, so re-beginning implicitly resets).
    ///
    /// # Safety
    /// The device must be valid and the buffer must not be pending on the GPU.
    pub unsafe fn begin(&mut self, device: &ash::Device) -> Result<()> {
        contract!(self.is_created(), "begin on a freed command buffer");
        self.state = self.state.begin()?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(self.handle, &begin_info)?;
        Ok(())
    }

    /// End recording, leaving the buffer executable.
    ///
    /// The owned barrier list must be inactive: an un-pushed list would
    /// silently drop pending transitions whose resources have already been
    /// transited.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn end(&mut self, device: &ash::Device) -> Result<()> {
        contract!(
            !self.barriers.is_active(),
            "{} ended with an active barrier list, push it first",
            self.id
        );
        self.state = self.state.end()?;

        device.end_command_buffer(self.handle)?;
        Ok(())
    }

    /// Open a dynamic rendering scope.
    ///
    /// The caller has already transitioned the attachments; their layouts in
    /// the attachment infos must match the resources' tracked state.
    ///
    /// # Safety
    /// The device and all attachment image views must be valid.
    pub unsafe fn begin_rendering(
        &mut self,
        device: &ash::Device,
        render_area: vk::Rect2D,
        color_attachments: &[vk::RenderingAttachmentInfo],
        depth_attachment: Option<&vk::RenderingAttachmentInfo>,
    ) -> Result<()> {
        self.state = self.state.begin_rendering()?;

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(color_attachments);
        if let Some(depth) = depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        device.cmd_begin_rendering(self.handle, &rendering_info);
        Ok(())
    }

    /// Close the current rendering scope.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn end_rendering(&mut self, device: &ash::Device) -> Result<()> {
        self.state = self.state.end_rendering()?;
        device.cmd_end_rendering(self.handle);
        Ok(())
    }

    /// Record a non-indexed draw. Requires an open rendering scope.
    ///
    /// # Safety
    /// The device must be valid and a compatible pipeline must be bound.
    pub unsafe fn draw(
        &mut self,
        device: &ash::Device,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.state.require_rendering()?;
        device.cmd_draw(
            self.handle,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
        Ok(())
    }

    /// Record an indexed draw. Requires an open rendering scope.
    ///
    /// # Safety
    /// The device must be valid and a compatible pipeline and index buffer
    /// must be bound.
    pub unsafe fn draw_indexed(
        &mut self,
        device: &ash::Device,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.state.require_rendering()?;
        device.cmd_draw_indexed(
            self.handle,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Ok(())
    }

    /// Bind a pipeline. Valid while recording, inside or outside a
    /// rendering scope.
    ///
    /// # Safety
    /// The device and pipeline must be valid.
    pub unsafe fn bind_pipeline(
        &mut self,
        device: &ash::Device,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> Result<()> {
        contract!(
            matches!(self.state, RecordState::Recording | RecordState::Rendering),
            "bind_pipeline outside recording, state is {:?}",
            self.state
        );
        device.cmd_bind_pipeline(self.handle, bind_point, pipeline);
        Ok(())
    }

    /// Record a compute dispatch. Must not be inside a rendering scope.
    ///
    /// # Safety
    /// The device must be valid and a compute pipeline must be bound.
    pub unsafe fn dispatch(
        &mut self,
        device: &ash::Device,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<()> {
        self.state.require_recording()?;
        device.cmd_dispatch(self.handle, group_count_x, group_count_y, group_count_z);
        Ok(())
    }

    /// Record a buffer-to-buffer copy.
    ///
    /// # Safety
    /// The device must be valid; both buffers must be live and transitioned
    /// for transfer.
    pub unsafe fn copy_buffer(
        &mut self,
        device: &ash::Device,
        src: &Buffer,
        dst: &Buffer,
        regions: &[vk::BufferCopy2],
    ) -> Result<()> {
        self.state.require_recording()?;
        contract!(src.is_created() && dst.is_created(), "copy with a destroyed buffer");

        let copy_info = vk::CopyBufferInfo2::default()
            .src_buffer(src.handle())
            .dst_buffer(dst.handle())
            .regions(regions);
        device.cmd_copy_buffer2(self.handle, &copy_info);
        Ok(())
    }

    /// Record a blit between one source and one destination subresource.
    ///
    /// The required image layouts are read from both textures' tracked
    /// access state. A blit does not transition layouts itself; the caller
    /// transitions via the barrier list first, and a source or destination
    /// still in an unusable layout surfaces here as a contract violation.
    ///
    /// # Safety
    /// The device must be valid and both images must be live.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn blit_texture(
        &mut self,
        device: &ash::Device,
        src: &Texture,
        src_mip: u32,
        src_layer: u32,
        dst: &Texture,
        dst_mip: u32,
        dst_layer: u32,
        filter: vk::Filter,
    ) -> Result<()> {
        self.state.require_recording()?;

        let src_state = src.access_state(src_layer, src_mip)?;
        let dst_state = dst.access_state(dst_layer, dst_mip)?;
        contract!(
            src_state.layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL
                || src_state.layout == vk::ImageLayout::GENERAL,
            "blit source is in layout {:?}, transition it first",
            src_state.layout
        );
        contract!(
            dst_state.layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
                || dst_state.layout == vk::ImageLayout::GENERAL,
            "blit destination is in layout {:?}, transition it first",
            dst_state.layout
        );

        let region = vk::ImageBlit2::default()
            .src_subresource(src.subresource_layers(src_mip, src_layer))
            .src_offsets(src.mip_extent_offsets(src_mip))
            .dst_subresource(dst.subresource_layers(dst_mip, dst_layer))
            .dst_offsets(dst.mip_extent_offsets(dst_mip));
        let regions = [region];

        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src.handle())
            .src_image_layout(src_state.layout)
            .dst_image(dst.handle())
            .dst_image_layout(dst_state.layout)
            .regions(&regions)
            .filter(filter);
        device.cmd_blit_image2(self.handle, &blit_info);
        Ok(())
    }

    /// Open this buffer's barrier list for a batch of requests.
    ///
    /// Must be recording and outside any rendering scope.
    pub fn begin_barrier_list(&mut self) -> Result<()> {
        self.state.require_recording()?;
        self.barriers.begin()
    }

    /// Queue a whole-buffer transition on the owned barrier list.
    pub fn add_buffer_barrier(&mut self, buffer: &mut Buffer, dst: BufferState) -> Result<()> {
        self.state.require_recording()?;
        self.barriers.add_buffer_barrier(buffer, dst)
    }

    /// Queue a texture subresource-range transition on the owned barrier list.
    pub fn add_texture_barrier(
        &mut self,
        texture: &mut Texture,
        range: TextureRange,
        dst: AccessState,
    ) -> Result<()> {
        self.state.require_recording()?;
        self.barriers.add_texture_barrier(texture, range, dst)
    }

    /// Queue a swapchain image transition on the owned barrier list.
    pub fn add_swapchain_barrier(
        &mut self,
        texture: &mut SwapchainTexture,
        dst: AccessState,
    ) -> Result<()> {
        self.state.require_recording()?;
        self.barriers.add_swapchain_barrier(texture, dst)
    }

    /// Submit all queued barriers as one `vkCmdPipelineBarrier2` call and
    /// deactivate the list.
    ///
    /// This is the only path from barrier requests to an actual GPU
    /// barrier. Requires an active list.
    ///
    /// # Safety
    /// The device must be valid, as must every resource the queued barriers
    /// reference.
    pub unsafe fn push_barrier_list(&mut self, device: &ash::Device) -> Result<()> {
        self.state.require_recording()?;
        let batch = self.barriers.drain()?;
        if batch.is_empty() {
            return Ok(());
        }

        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(&batch.buffer_barriers)
            .image_memory_barriers(&batch.image_barriers);
        device.cmd_pipeline_barrier2(self.handle, &dependency_info);
        Ok(())
    }

    /// Reset to `Initial`, discarding recorded commands and any pending
    /// barrier requests.
    ///
    /// # Safety
    /// The device must be valid and the buffer must not be pending on the GPU.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        contract!(self.is_created(), "reset on a freed command buffer");
        device.reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())?;
        self.reset_bookkeeping();
        Ok(())
    }

    /// Clear local state without touching the native buffer. Used when the
    /// owning pool is reset as a whole.
    fn reset_bookkeeping(&mut self) {
        self.state = RecordState::Initial;
        self.barriers.clear();
    }

    fn invalidate(&mut self) {
        self.handle = vk::CommandBuffer::null();
        self.reset_bookkeeping();
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use ash::vk::Handle;
        Self::new(
            vk::CommandBuffer::from_raw(0x1),
            CommandBufferId(SlotId::from_raw(0)),
        )
    }
}

/// Fixed-capacity pool of command buffers with stable ID handout.
///
/// IDs are reused LIFO so recently-freed slots are handed out first.
/// Capacity is fixed at creation; exhausting it is a contract violation,
/// not a growth trigger.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
    buffers: SlotPool<CommandBuffer>,
}

impl CommandPool {
    /// Create a new command pool for `queue_family` holding at most
    /// `capacity` buffers.
    ///
    /// The native pool is created with the reset-command-buffer flag so
    /// individual buffers can be re-begun after execution.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32, capacity: usize) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;
        tracing::debug!(queue_family, capacity, "created command pool");

        Ok(Self {
            pool,
            queue_family,
            buffers: SlotPool::with_capacity(capacity),
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Maximum number of live buffers.
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }

    /// Number of currently live buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Allocate a primary command buffer, returning its stable ID.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn alloc(&mut self, device: &ash::Device) -> Result<CommandBufferId> {
        contract!(
            self.buffers.len() < self.buffers.capacity(),
            "command pool capacity {} exhausted",
            self.buffers.capacity()
        );

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = device.allocate_command_buffers(&alloc_info)?[0];

        let slot = self
            .buffers
            .insert_with(|slot| CommandBuffer::new(handle, CommandBufferId(slot)))
            .map_err(|e| GpuError::ContractViolation(e.to_string()))?;
        Ok(CommandBufferId(slot))
    }

    /// Free the buffer behind `id`, returning its slot for reuse.
    ///
    /// # Safety
    /// The device must be valid and the buffer must not be pending on the GPU.
    pub unsafe fn free(&mut self, device: &ash::Device, id: CommandBufferId) -> Result<()> {
        let mut buffer = self
            .buffers
            .remove(id.0)
            .map_err(|e| GpuError::ContractViolation(e.to_string()))?;
        contract!(
            buffer.id == id,
            "freeing {id} but slot holds {}",
            buffer.id
        );

        device.free_command_buffers(self.pool, &[buffer.handle]);
        buffer.invalidate();
        Ok(())
    }

    /// Get a live buffer by ID.
    pub fn get(&self, id: CommandBufferId) -> Result<&CommandBuffer> {
        self.buffers
            .get(id.0)
            .ok_or_else(|| GpuError::ContractViolation(format!("{id} is not live in this pool")))
    }

    /// Get a live buffer by ID, mutably.
    pub fn get_mut(&mut self, id: CommandBufferId) -> Result<&mut CommandBuffer> {
        self.buffers
            .get_mut(id.0)
            .ok_or_else(|| GpuError::ContractViolation(format!("{id} is not live in this pool")))
    }

    /// Reset the whole pool.
    ///
    /// All outstanding buffers return to `Initial` with their barrier lists
    /// cleared; their IDs stay valid and they may be re-begun.
    ///
    /// # Safety
    /// The device must be valid and no buffer from this pool may be pending
    /// on the GPU.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        for (_, buffer) in self.buffers.iter_mut() {
            buffer.reset_bookkeeping();
        }
        Ok(())
    }

    /// Destroy the pool and every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and no buffer from this pool may be pending
    /// on the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.buffers.drain();
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_state_begin_paths() {
        assert_eq!(RecordState::Initial.begin().unwrap(), RecordState::Recording);
        assert_eq!(
            RecordState::Executable.begin().unwrap(),
            RecordState::Recording
        );
        assert!(RecordState::Recording.begin().is_err());
        assert!(RecordState::Rendering.begin().is_err());
    }

    #[test]
    fn record_state_end_requires_closed_scope() {
        assert_eq!(RecordState::Recording.end().unwrap(), RecordState::Executable);
        assert!(RecordState::Rendering.end().is_err());
        assert!(RecordState::Initial.end().is_err());
        assert!(RecordState::Executable.end().is_err());
    }

    #[test]
    fn record_state_rendering_scope() {
        assert_eq!(
            RecordState::Recording.begin_rendering().unwrap(),
            RecordState::Rendering
        );
        assert_eq!(
            RecordState::Rendering.end_rendering().unwrap(),
            RecordState::Recording
        );
        assert!(RecordState::Initial.begin_rendering().is_err());
        assert!(RecordState::Rendering.begin_rendering().is_err());
        assert!(RecordState::Recording.end_rendering().is_err());
    }

    #[test]
    fn draw_gating_by_state() {
        assert!(RecordState::Rendering.require_rendering().is_ok());
        assert!(RecordState::Recording.require_rendering().is_err());
        assert!(RecordState::Recording.require_recording().is_ok());
        assert!(RecordState::Rendering.require_recording().is_err());
    }

    #[test]
    fn barrier_requests_require_recording_state() {
        let mut cmd = CommandBuffer::for_tests();
        let mut tex = Texture::for_tests(1, 1);

        // Initial: not recording yet.
        assert!(cmd.begin_barrier_list().is_err());

        cmd.state = RecordState::Recording;
        cmd.begin_barrier_list().unwrap();
        cmd.add_texture_barrier(&mut tex, TextureRange::ALL, AccessState::SHADER_READ)
            .unwrap();

        // Barriers are not allowed inside a rendering scope.
        cmd.state = RecordState::Rendering;
        assert!(cmd
            .add_texture_barrier(&mut tex, TextureRange::ALL, AccessState::GENERAL)
            .is_err());
    }

    #[test]
    fn freed_buffer_reports_not_created() {
        let mut cmd = CommandBuffer::for_tests();
        assert!(cmd.is_created());
        cmd.invalidate();
        assert!(!cmd.is_created());
        assert_eq!(cmd.state(), RecordState::Initial);
    }

    #[test]
    fn mip_transition_end_to_end_bookkeeping() {
        let mut cmd = CommandBuffer::for_tests();
        let mut tex = Texture::for_tests(2, 1);
        cmd.state = RecordState::Recording;

        cmd.begin_barrier_list().unwrap();
        cmd.add_texture_barrier(&mut tex, TextureRange::mips(0, 2), AccessState::SHADER_READ)
            .unwrap();

        let batch = cmd.barriers.drain().unwrap();
        assert_eq!(batch.image_barriers.len(), 1);
        assert_eq!(tex.access_state(0, 0).unwrap(), AccessState::SHADER_READ);
        assert_eq!(tex.access_state(0, 1).unwrap(), AccessState::SHADER_READ);

        // With the list drained, ending the buffer is legal again.
        assert!(!cmd.barriers.is_active());
        cmd.state = cmd.state.end().unwrap();
        assert_eq!(cmd.state(), RecordState::Executable);
    }

    #[test]
    fn pool_reset_clears_buffer_bookkeeping() {
        let mut cmd = CommandBuffer::for_tests();
        cmd.state = RecordState::Recording;
        cmd.barriers.begin().unwrap();

        cmd.reset_bookkeeping();
        assert_eq!(cmd.state(), RecordState::Initial);
        assert!(!cmd.barriers.is_active());
    }
}
