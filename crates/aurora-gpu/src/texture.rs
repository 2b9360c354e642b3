//! GPU image resources with per-subresource access-state tracking.
//!
//! Every texture records, per (mip, layer) subresource, the pipeline stage,
//! access mask, and layout it was last transitioned to. That record is the
//! single source of truth for the source half of every barrier built
//! against the texture; it is mutated only through [`Texture::transit`],
//! which the barrier list invokes while resolving requests.

use crate::access::AccessState;
use crate::context::GpuContext;
use crate::error::{contract, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

/// A (mip, layer) rectangle of texture subresources.
///
/// Counts may use [`vk::REMAINING_MIP_LEVELS`] /
/// [`vk::REMAINING_ARRAY_LAYERS`]; they resolve against the texture's
/// actual counts at the time of the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRange {
    /// First mip level
    pub base_mip: u32,
    /// Number of mip levels, or `vk::REMAINING_MIP_LEVELS`
    pub mip_count: u32,
    /// First array layer
    pub base_layer: u32,
    /// Number of array layers, or `vk::REMAINING_ARRAY_LAYERS`
    pub layer_count: u32,
}

impl TextureRange {
    /// Every subresource of the texture.
    pub const ALL: Self = Self {
        base_mip: 0,
        mip_count: vk::REMAINING_MIP_LEVELS,
        base_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    };

    /// A mip range of layer 0.
    pub const fn mips(base_mip: u32, mip_count: u32) -> Self {
        Self {
            base_mip,
            mip_count,
            base_layer: 0,
            layer_count: 1,
        }
    }

    /// A single subresource.
    pub const fn single(mip: u32, layer: u32) -> Self {
        Self {
            base_mip: mip,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
        }
    }
}

/// Creation parameters for a [`Texture`].
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc {
    /// Pixel format
    pub format: vk::Format,
    /// Texture extent
    pub extent: vk::Extent3D,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Number of array layers
    pub array_layers: u32,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Image aspect (color or depth)
    pub aspect: vk::ImageAspectFlags,
    /// Where to place the backing memory
    pub location: MemoryLocation,
}

impl TextureDesc {
    /// A single-mip 2D color texture.
    pub fn color_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Set the array layer count.
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// Set the usage flags.
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }
}

/// A GPU image, its memory allocation, and its tracked access states.
///
/// Fully valid between [`Texture::new`] and [`Texture::destroy`]; `destroy`
/// nulls the handle and moving leaves the source inaccessible. Not `Clone`.
pub struct Texture {
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    aspect: vk::ImageAspectFlags,
    // One state per subresource, indexed layer-major: layer * mip_levels + mip.
    states: Vec<AccessState>,
}

impl Texture {
    /// Create a texture in `UNDEFINED` layout.
    pub fn new(ctx: &GpuContext, desc: &TextureDesc, name: &str) -> Result<Self> {
        contract!(
            desc.mip_levels > 0 && desc.array_layers > 0,
            "texture needs at least one mip and one layer"
        );

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) =
            ctx.allocator()
                .lock()
                .allocate_image(&create_info, desc.location, name)?;

        let mut texture = Self {
            image,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            aspect: desc.aspect,
            states: vec![
                AccessState::UNDEFINED;
                (desc.mip_levels * desc.array_layers) as usize
            ],
        };
        texture.set_debug_name(ctx, name);
        Ok(texture)
    }

    /// Whether the texture currently owns a live native handle.
    pub fn is_created(&self) -> bool {
        self.image != vk::Image::null()
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Pixel format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Texture extent.
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Number of mip levels.
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Number of array layers.
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Image aspect used for barriers and views.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// The access state subresource (`layer`, `mip`) was last transitioned
    /// to.
    pub fn access_state(&self, layer: u32, mip: u32) -> Result<AccessState> {
        contract!(self.is_created(), "access state of a destroyed texture");
        contract!(
            layer < self.array_layers && mip < self.mip_levels,
            "subresource (layer {layer}, mip {mip}) out of range ({} layers, {} mips)",
            self.array_layers,
            self.mip_levels
        );
        Ok(self.states[(layer * self.mip_levels + mip) as usize])
    }

    /// Overwrite the tracked access state of every subresource in `range`.
    ///
    /// Bookkeeping only: no GPU commands are issued. The caller must issue
    /// (or be about to issue) the matching barrier; barrier batching needs
    /// to update many resources before one combined submission executes.
    pub(crate) fn transit(&mut self, range: TextureRange, state: AccessState) -> Result<()> {
        contract!(self.is_created(), "transit on a destroyed texture");
        let (mips, layers) = self.resolve_range(range)?;
        for layer in layers {
            for mip in mips.clone() {
                self.states[(layer * self.mip_levels + mip) as usize] = state;
            }
        }
        Ok(())
    }

    /// The common access state of every subresource in `range`.
    ///
    /// A single barrier describes one transition for its whole range, so
    /// all addressed subresources must agree; divergence means the caller
    /// transitioned parts of the range separately and is now asking for one
    /// barrier across inconsistent sources. That is flagged, not split.
    pub(crate) fn range_state(&self, range: TextureRange) -> Result<AccessState> {
        contract!(self.is_created(), "access state of a destroyed texture");
        let (mips, layers) = self.resolve_range(range)?;

        let first = self.states[(layers.start * self.mip_levels + mips.start) as usize];
        for layer in layers {
            for mip in mips.clone() {
                let state = self.states[(layer * self.mip_levels + mip) as usize];
                contract!(
                    state == first,
                    "subresource (layer {layer}, mip {mip}) diverged from the rest of the \
                     barrier range: {state:?} != {first:?}"
                );
            }
        }
        Ok(first)
    }

    /// Resolve a range's wildcard counts against the texture's actual
    /// counts and bounds-check it.
    fn resolve_range(
        &self,
        range: TextureRange,
    ) -> Result<(std::ops::Range<u32>, std::ops::Range<u32>)> {
        let mip_count = if range.mip_count == vk::REMAINING_MIP_LEVELS {
            self.mip_levels.saturating_sub(range.base_mip)
        } else {
            range.mip_count
        };
        let layer_count = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
            self.array_layers.saturating_sub(range.base_layer)
        } else {
            range.layer_count
        };

        contract!(
            mip_count > 0 && layer_count > 0,
            "empty texture range {range:?}"
        );
        contract!(
            u64::from(range.base_mip) + u64::from(mip_count) <= u64::from(self.mip_levels)
                && u64::from(range.base_layer) + u64::from(layer_count)
                    <= u64::from(self.array_layers),
            "texture range {range:?} out of bounds ({} mips, {} layers)",
            self.mip_levels,
            self.array_layers
        );

        Ok((
            range.base_mip..range.base_mip + mip_count,
            range.base_layer..range.base_layer + layer_count,
        ))
    }

    /// Resolve `range` into a concrete Vulkan subresource range.
    pub(crate) fn subresource_range(&self, range: TextureRange) -> Result<vk::ImageSubresourceRange> {
        let (mips, layers) = self.resolve_range(range)?;
        Ok(vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: mips.start,
            level_count: mips.len() as u32,
            base_array_layer: layers.start,
            layer_count: layers.len() as u32,
        })
    }

    /// Subresource layers for one (mip, layer) unit, as used by copy and
    /// blit regions.
    pub(crate) fn subresource_layers(&self, mip: u32, layer: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: mip,
            base_array_layer: layer,
            layer_count: 1,
        }
    }

    /// Blit region offsets spanning the full extent of `mip`.
    pub(crate) fn mip_extent_offsets(&self, mip: u32) -> [vk::Offset3D; 2] {
        [
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: (self.extent.width >> mip).max(1) as i32,
                y: (self.extent.height >> mip).max(1) as i32,
                z: (self.extent.depth >> mip).max(1) as i32,
            },
        ]
    }

    /// Attach a human-readable label for the validation/debugging layer.
    ///
    /// Active in debug builds only; compiled out otherwise.
    pub fn set_debug_name(&mut self, ctx: &GpuContext, name: &str) {
        ctx.set_debug_name(self.image, name);
    }

    /// Destroy the texture, freeing its memory.
    pub fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        contract!(self.is_created(), "destroy on a destroyed texture");

        if let Some(allocation) = self.allocation.take() {
            ctx.allocator().lock().free_image(self.image, allocation)?;
        }
        self.image = vk::Image::null();
        self.states.clear();
        Ok(())
    }

    /// Build a texture around a raw handle, for logic tests that never
    /// touch a device.
    #[cfg(test)]
    pub(crate) fn for_tests(mip_levels: u32, array_layers: u32) -> Self {
        use ash::vk::Handle;
        Self {
            image: vk::Image::from_raw(0x1),
            allocation: None,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: 16,
                height: 16,
                depth: 1,
            },
            mip_levels,
            array_layers,
            aspect: vk::ImageAspectFlags::COLOR,
            states: vec![AccessState::UNDEFINED; (mip_levels * array_layers) as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;

    #[test]
    fn starts_undefined_everywhere() {
        let tex = Texture::for_tests(3, 2);
        for layer in 0..2 {
            for mip in 0..3 {
                assert_eq!(
                    tex.access_state(layer, mip).unwrap(),
                    AccessState::UNDEFINED
                );
            }
        }
    }

    #[test]
    fn transit_overwrites_addressed_range_only() {
        let mut tex = Texture::for_tests(3, 1);
        tex.transit(TextureRange::mips(0, 2), AccessState::TRANSFER_DST)
            .unwrap();

        assert_eq!(tex.access_state(0, 0).unwrap(), AccessState::TRANSFER_DST);
        assert_eq!(tex.access_state(0, 1).unwrap(), AccessState::TRANSFER_DST);
        assert_eq!(tex.access_state(0, 2).unwrap(), AccessState::UNDEFINED);
    }

    #[test]
    fn requery_is_idempotent() {
        let mut tex = Texture::for_tests(1, 1);
        tex.transit(TextureRange::ALL, AccessState::SHADER_READ)
            .unwrap();
        let a = tex.access_state(0, 0).unwrap();
        let b = tex.access_state(0, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wildcard_counts_resolve_to_actual_counts() {
        let mut tex = Texture::for_tests(4, 2);
        // "Remaining mips from 1" resolves to mips 1..4 across both layers.
        tex.transit(
            TextureRange {
                base_mip: 1,
                mip_count: vk::REMAINING_MIP_LEVELS,
                base_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
            AccessState::SHADER_READ,
        )
        .unwrap();

        assert_eq!(tex.access_state(1, 0).unwrap(), AccessState::UNDEFINED);
        for layer in 0..2 {
            for mip in 1..4 {
                assert_eq!(
                    tex.access_state(layer, mip).unwrap(),
                    AccessState::SHADER_READ
                );
            }
        }

        let sub = tex.subresource_range(TextureRange::ALL).unwrap();
        assert_eq!(sub.level_count, 4);
        assert_eq!(sub.layer_count, 2);
    }

    #[test]
    fn divergent_range_is_flagged() {
        let mut tex = Texture::for_tests(2, 1);
        tex.transit(TextureRange::single(0, 0), AccessState::TRANSFER_DST)
            .unwrap();
        tex.transit(TextureRange::single(1, 0), AccessState::SHADER_READ)
            .unwrap();

        // One barrier across both mips cannot describe two different sources.
        assert!(matches!(
            tex.range_state(TextureRange::mips(0, 2)),
            Err(GpuError::ContractViolation(_))
        ));
        // Each mip on its own is still fine.
        assert!(tex.range_state(TextureRange::single(0, 0)).is_ok());
        assert!(tex.range_state(TextureRange::single(1, 0)).is_ok());
    }

    #[test]
    fn out_of_range_subresource_is_rejected() {
        let tex = Texture::for_tests(2, 1);
        assert!(matches!(
            tex.access_state(1, 0),
            Err(GpuError::ContractViolation(_))
        ));
        assert!(matches!(
            tex.access_state(0, 2),
            Err(GpuError::ContractViolation(_))
        ));
    }

    #[test]
    fn destroyed_texture_rejects_queries() {
        let mut tex = Texture::for_tests(1, 1);
        tex.image = vk::Image::null();
        tex.states.clear();
        assert!(!tex.is_created());
        assert!(matches!(
            tex.access_state(0, 0),
            Err(GpuError::ContractViolation(_))
        ));
        assert!(matches!(
            tex.transit(TextureRange::ALL, AccessState::GENERAL),
            Err(GpuError::ContractViolation(_))
        ));
    }
}
