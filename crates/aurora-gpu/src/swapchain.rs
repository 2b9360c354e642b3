//! Swapchain management and presentable image tracking.
//!
//! Swapchain images are owned by the presentation engine, not by us, and
//! they are transitioned as whole resources (single mip, single layer from
//! the barrier system's point of view). [`SwapchainTexture`] therefore
//! carries one combined access state instead of the per-subresource
//! tracking a [`Texture`](crate::texture::Texture) has.

use crate::access::AccessState;
use crate::error::{contract, GpuError, Result};
use ash::vk;

/// A presentable image wrapped for access-state tracking.
///
/// Holds a non-owning image handle; the swapchain that produced it destroys
/// the view and the presentation engine owns the image itself.
pub struct SwapchainTexture {
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    state: AccessState,
}

impl SwapchainTexture {
    /// Wrap an externally owned swapchain image.
    ///
    /// Its access state starts `UNDEFINED`; the contents after acquisition
    /// are unspecified until the first transition.
    pub fn wrap(
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            image,
            view,
            format,
            extent,
            state: AccessState::UNDEFINED,
        }
    }

    /// Whether the wrapper refers to a live image.
    pub fn is_created(&self) -> bool {
        self.image != vk::Image::null()
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the image view.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// The access state the image was last transitioned to.
    ///
    /// Swapchain images are tracked as a whole, so there is no subresource
    /// argument.
    pub fn access_state(&self) -> Result<AccessState> {
        contract!(
            self.is_created(),
            "access state of a destroyed swapchain texture"
        );
        Ok(self.state)
    }

    /// Overwrite the tracked access state.
    ///
    /// Bookkeeping only; invoked from barrier-list resolution and from the
    /// acquire path (which resets contents to `UNDEFINED`).
    pub(crate) fn transit(&mut self, state: AccessState) -> Result<()> {
        contract!(self.is_created(), "transit on a destroyed swapchain texture");
        self.state = state;
        Ok(())
    }

    /// The full-resource subresource range.
    pub(crate) fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn invalidate(&mut self) {
        self.image = vk::Image::null();
        self.view = vk::ImageView::null();
        self.state = AccessState::UNDEFINED;
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    textures: Vec<SwapchainTexture>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain and wrap its images for state tracking.
    ///
    /// # Safety
    /// All handles must be valid.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
        queue_family: u32,
    ) -> Result<Self> {
        // Determine image count
        let mut image_count = surface_capabilities.min_image_count + 1;
        if surface_capabilities.max_image_count > 0
            && image_count > surface_capabilities.max_image_count
        {
            image_count = surface_capabilities.max_image_count;
        }

        let queue_families = [queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;
        tracing::debug!(
            "Created swapchain: {} images, {}x{}",
            images.len(),
            extent.width,
            extent.height
        );

        let textures = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                let view = device.create_image_view(&view_info, None)?;
                Ok(SwapchainTexture::wrap(
                    image,
                    view,
                    surface_format.format,
                    extent,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            textures,
            format: surface_format.format,
            extent,
        })
    }

    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.textures.len()
    }

    /// Pixel format of the presentable images.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Extent of the presentable images.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Borrow the tracked texture for image `index`.
    pub fn texture(&self, index: u32) -> Result<&SwapchainTexture> {
        self.textures
            .get(index as usize)
            .ok_or_else(|| GpuError::ContractViolation(format!("no swapchain image {index}")))
    }

    /// Mutably borrow the tracked texture for image `index`.
    pub fn texture_mut(&mut self, index: u32) -> Result<&mut SwapchainTexture> {
        self.textures
            .get_mut(index as usize)
            .ok_or_else(|| GpuError::ContractViolation(format!("no swapchain image {index}")))
    }

    /// Acquire the next image, resetting its tracked state to `UNDEFINED`.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &mut self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => {
                // Presentation left the contents unspecified.
                self.texture_mut(index)?.transit(AccessState::UNDEFINED)?;
                Ok((index, suboptimal))
            }
            // OUT_OF_DATE means no image was acquired; caller must recreate the swapchain.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
            }
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image. The caller must have transitioned it to
    /// [`AccessState::PRESENT`] via the barrier list.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        contract!(
            self.texture(image_index)?.access_state()?.layout == vk::ImageLayout::PRESENT_SRC_KHR,
            "presenting swapchain image {image_index} that was not transitioned to PRESENT"
        );

        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = swapchain_loader.queue_present(queue, &present_info);

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain and its image views.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for texture in &mut self.textures {
            device.destroy_image_view(texture.view(), None);
            texture.invalidate();
        }
        self.textures.clear();
        swapchain_loader.destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    // Fall back to first available
    available[0]
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    } else {
        // Prefer mailbox (triple buffering without vsync)
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn test_texture() -> SwapchainTexture {
        SwapchainTexture::wrap(
            vk::Image::from_raw(0x1),
            vk::ImageView::from_raw(0x2),
            vk::Format::B8G8R8A8_SRGB,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        )
    }

    #[test]
    fn wrapped_image_starts_undefined() {
        let tex = test_texture();
        assert!(tex.is_created());
        assert_eq!(tex.access_state().unwrap(), AccessState::UNDEFINED);
    }

    #[test]
    fn transit_tracks_whole_resource() {
        let mut tex = test_texture();
        tex.transit(AccessState::COLOR_ATTACHMENT).unwrap();
        assert_eq!(tex.access_state().unwrap(), AccessState::COLOR_ATTACHMENT);
        tex.transit(AccessState::PRESENT).unwrap();
        assert_eq!(tex.access_state().unwrap(), AccessState::PRESENT);
    }

    #[test]
    fn invalidated_texture_rejects_queries() {
        let mut tex = test_texture();
        tex.invalidate();
        assert!(!tex.is_created());
        assert!(tex.access_state().is_err());
        assert!(tex.transit(AccessState::PRESENT).is_err());
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            select_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn extent_is_clamped_when_unconstrained() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 4096, 32);
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 64);
    }
}
