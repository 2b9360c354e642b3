//! Texture samplers.

use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;

/// Describes sampler filtering and addressing.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
        }
    }
}

/// A texture sampler.
pub struct Sampler {
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a sampler.
    pub fn new(ctx: &GpuContext, desc: &SamplerDesc) -> Result<Self> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);
        if let Some(anisotropy) = desc.max_anisotropy {
            create_info = create_info
                .anisotropy_enable(true)
                .max_anisotropy(anisotropy);
        }

        let sampler = unsafe { ctx.device().create_sampler(&create_info, None)? };
        Ok(Self { sampler })
    }

    /// Get the raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Whether the sampler is live.
    pub fn is_created(&self) -> bool {
        self.sampler != vk::Sampler::null()
    }

    /// Destroy the sampler.
    ///
    /// # Safety
    /// The sampler must not be referenced by any pending work.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        ctx.device().destroy_sampler(self.sampler, None);
        self.sampler = vk::Sampler::null();
    }
}
