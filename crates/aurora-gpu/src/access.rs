//! Resource access states.
//!
//! An access state records how a resource was last used on the GPU: the
//! pipeline stages that used it, the memory accesses they performed, and
//! (for images) the layout it was left in. Barrier construction reads the
//! tracked state as the source half of each transition, so the tracker is a
//! prediction of completed GPU work, not a synchronization primitive.

use ash::vk;

/// How an image subresource was last used: pipeline stage, memory access,
/// and image layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessState {
    /// Pipeline stages that last touched the resource
    pub stage: vk::PipelineStageFlags2,
    /// Memory accesses those stages performed
    pub access: vk::AccessFlags2,
    /// Layout the image was left in
    pub layout: vk::ImageLayout,
}

impl Default for AccessState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl AccessState {
    /// Create a custom access state.
    #[inline]
    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            stage,
            access,
            layout,
        }
    }

    /// Freshly created or discardable contents.
    pub const UNDEFINED: Self = Self::new(
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );

    /// General layout, any access. Rarely the fastest choice.
    pub const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// Color attachment being written by the graphics pipeline.
    pub const COLOR_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// Depth/stencil attachment being read and written by the fragment tests.
    pub const DEPTH_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// Sampled in the fragment shader.
    pub const SHADER_READ: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// Sampled in the compute shader.
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// Storage image written by the compute shader.
    pub const STORAGE_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// Storage image read and written by the compute shader.
    pub const STORAGE_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// Source of a transfer (copy/blit).
    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// Destination of a transfer (copy/blit).
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// Handed to the presentation engine.
    pub const PRESENT: Self = Self::new(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );

    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    /// Whether this state writes the resource.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }
}

/// How a buffer was last used: pipeline stage and memory access.
///
/// Buffers have no layout, so their state is tracked for the whole resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferState {
    /// Pipeline stages that last touched the buffer
    pub stage: vk::PipelineStageFlags2,
    /// Memory accesses those stages performed
    pub access: vk::AccessFlags2,
}

impl Default for BufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl BufferState {
    /// Create a custom buffer state.
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    /// Never used on the GPU.
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    /// Read as a vertex buffer.
    pub const VERTEX: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_INPUT,
        vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
    );

    /// Read as an index buffer.
    pub const INDEX: Self = Self::new(
        vk::PipelineStageFlags2::INDEX_INPUT,
        vk::AccessFlags2::INDEX_READ,
    );

    /// Read as a uniform buffer in any shader stage.
    pub const UNIFORM: Self = Self::new(
        vk::PipelineStageFlags2::ALL_GRAPHICS,
        vk::AccessFlags2::UNIFORM_READ,
    );

    /// Read and written as a storage buffer in the compute shader.
    pub const STORAGE_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
    );

    /// Read as an indirect draw/dispatch argument buffer.
    pub const INDIRECT: Self = Self::new(
        vk::PipelineStageFlags2::DRAW_INDIRECT,
        vk::AccessFlags2::INDIRECT_COMMAND_READ,
    );

    /// Source of a transfer.
    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
    );

    /// Destination of a transfer.
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
    );

    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    /// Whether this state writes the buffer.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_undefined() {
        assert_eq!(AccessState::default(), AccessState::UNDEFINED);
        assert_eq!(BufferState::default(), BufferState::UNDEFINED);
        assert_eq!(AccessState::UNDEFINED.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn write_detection() {
        assert!(AccessState::COLOR_ATTACHMENT.is_write());
        assert!(AccessState::TRANSFER_DST.is_write());
        assert!(AccessState::STORAGE_READ_WRITE.is_write());
        assert!(!AccessState::SHADER_READ.is_write());
        assert!(!AccessState::PRESENT.is_write());

        assert!(BufferState::TRANSFER_DST.is_write());
        assert!(BufferState::STORAGE_READ_WRITE.is_write());
        assert!(!BufferState::VERTEX.is_write());
        assert!(!BufferState::UNIFORM.is_write());
    }

    #[test]
    fn depth_state_covers_both_fragment_test_stages() {
        let state = AccessState::DEPTH_ATTACHMENT;
        assert!(state
            .stage
            .contains(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS));
        assert!(state
            .stage
            .contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
    }
}
