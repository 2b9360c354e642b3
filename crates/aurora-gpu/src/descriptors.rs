//! Descriptor management via descriptor buffers.
//!
//! Descriptors are written as raw bytes into a host-visible buffer instead
//! of opaque descriptor-set objects. Layouts are created with the
//! descriptor-buffer flag and queried for their size and per-binding byte
//! offsets; writes place descriptor payloads at `set_offset + binding_offset`.

use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::error::{contract, GpuError, Result};
use crate::sampler::Sampler;
use crate::texture::Texture;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a sampled image binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Build the layout and query its descriptor-buffer placement data.
    pub fn build(self, ctx: &GpuContext) -> Result<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT);

        let device = ctx.device();
        let ext = ctx.descriptor_buffer();
        unsafe {
            let layout = device.create_descriptor_set_layout(&layout_info, None)?;

            let raw_size = ext.get_descriptor_set_layout_size(layout);
            let alignment = ctx.capabilities().descriptor_buffer_offset_alignment;
            let size = raw_size.div_ceil(alignment) * alignment;

            let binding_offsets = self
                .bindings
                .iter()
                .map(|b| {
                    (
                        b.binding,
                        ext.get_descriptor_set_layout_binding_offset(layout, b.binding),
                    )
                })
                .collect();

            Ok(DescriptorSetLayout {
                layout,
                size,
                binding_offsets,
            })
        }
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// A descriptor set layout plus its byte footprint in a descriptor buffer.
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    size: vk::DeviceSize,
    binding_offsets: Vec<(u32, vk::DeviceSize)>,
}

impl DescriptorSetLayout {
    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Aligned byte size of one set described by this layout.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Byte offset of `binding` within a set.
    pub fn binding_offset(&self, binding: u32) -> Result<vk::DeviceSize> {
        self.binding_offsets
            .iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, offset)| *offset)
            .ok_or_else(|| {
                GpuError::ContractViolation(format!("layout has no binding {binding}"))
            })
    }

    /// Destroy the layout.
    ///
    /// # Safety
    /// The layout must not be referenced by any live pipeline.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        ctx.device().destroy_descriptor_set_layout(self.layout, None);
        self.layout = vk::DescriptorSetLayout::null();
    }
}

/// Host-visible buffer holding descriptor payloads for one layout.
pub struct DescriptorBuffer {
    buffer: Buffer,
}

impl DescriptorBuffer {
    /// Create a descriptor buffer sized for one set of `layout`.
    pub fn new(ctx: &GpuContext, layout: &DescriptorSetLayout, name: &str) -> Result<Self> {
        let buffer = Buffer::new(
            ctx,
            layout.size(),
            vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT
                | vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        Ok(Self { buffer })
    }

    /// Device address for binding via `cmd_bind_descriptor_buffers`.
    ///
    /// # Safety
    /// The context's device must be valid.
    pub unsafe fn device_address(&self, ctx: &GpuContext) -> vk::DeviceAddress {
        self.buffer.device_address(ctx.device())
    }

    /// Write a uniform buffer descriptor at `binding`.
    ///
    /// # Safety
    /// `src` must stay live while the descriptor is in use.
    pub unsafe fn write_uniform_buffer(
        &mut self,
        ctx: &GpuContext,
        layout: &DescriptorSetLayout,
        binding: u32,
        src: &Buffer,
        offset: u64,
        range: u64,
    ) -> Result<()> {
        let address_info = vk::DescriptorAddressInfoEXT::default()
            .address(src.device_address(ctx.device()) + offset)
            .range(range);

        let get_info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .data(vk::DescriptorDataEXT {
                p_uniform_buffer: &address_info,
            });

        self.write_descriptor(
            ctx,
            layout,
            binding,
            &get_info,
            ctx.capabilities().uniform_buffer_descriptor_size,
        )
    }

    /// Write a storage buffer descriptor at `binding`.
    ///
    /// # Safety
    /// `src` must stay live while the descriptor is in use.
    pub unsafe fn write_storage_buffer(
        &mut self,
        ctx: &GpuContext,
        layout: &DescriptorSetLayout,
        binding: u32,
        src: &Buffer,
        offset: u64,
        range: u64,
    ) -> Result<()> {
        let address_info = vk::DescriptorAddressInfoEXT::default()
            .address(src.device_address(ctx.device()) + offset)
            .range(range);

        let get_info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .data(vk::DescriptorDataEXT {
                p_storage_buffer: &address_info,
            });

        self.write_descriptor(
            ctx,
            layout,
            binding,
            &get_info,
            ctx.capabilities().storage_buffer_descriptor_size,
        )
    }

    /// Write a storage image descriptor at `binding`.
    ///
    /// The image layout is taken from the texture's tracked access state;
    /// the caller transitions first.
    ///
    /// # Safety
    /// `view` must belong to `texture` and stay live while the descriptor
    /// is in use.
    pub unsafe fn write_storage_image(
        &mut self,
        ctx: &GpuContext,
        layout: &DescriptorSetLayout,
        binding: u32,
        texture: &Texture,
        view: vk::ImageView,
    ) -> Result<()> {
        let state = texture.access_state(0, 0)?;
        let image_info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(state.layout);

        let get_info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .data(vk::DescriptorDataEXT {
                p_storage_image: &image_info,
            });

        self.write_descriptor(
            ctx,
            layout,
            binding,
            &get_info,
            ctx.capabilities().storage_image_descriptor_size,
        )
    }

    /// Write a combined image sampler descriptor at `binding`.
    ///
    /// # Safety
    /// `view` must belong to `texture`; the view and sampler must stay
    /// live while the descriptor is in use.
    pub unsafe fn write_sampled_image(
        &mut self,
        ctx: &GpuContext,
        layout: &DescriptorSetLayout,
        binding: u32,
        texture: &Texture,
        view: vk::ImageView,
        sampler: &Sampler,
    ) -> Result<()> {
        let state = texture.access_state(0, 0)?;
        let image_info = vk::DescriptorImageInfo::default()
            .sampler(sampler.handle())
            .image_view(view)
            .image_layout(state.layout);

        let get_info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .data(vk::DescriptorDataEXT {
                p_combined_image_sampler: &image_info,
            });

        self.write_descriptor(
            ctx,
            layout,
            binding,
            &get_info,
            ctx.capabilities().combined_image_sampler_descriptor_size,
        )
    }

    unsafe fn write_descriptor(
        &mut self,
        ctx: &GpuContext,
        layout: &DescriptorSetLayout,
        binding: u32,
        get_info: &vk::DescriptorGetInfoEXT,
        descriptor_size: usize,
    ) -> Result<()> {
        let offset = layout.binding_offset(binding)? as usize;
        contract!(
            offset + descriptor_size <= self.buffer.size() as usize,
            "descriptor at binding {binding} overflows the descriptor buffer"
        );

        let base = self
            .buffer
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("descriptor buffer is not mapped".to_string()))?;
        let dst = std::slice::from_raw_parts_mut(base.add(offset), descriptor_size);
        ctx.descriptor_buffer().get_descriptor(get_info, dst);
        Ok(())
    }

    /// Destroy the underlying buffer.
    pub fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        self.buffer.destroy(ctx)
    }
}
