//! Vulkan abstraction layer for the Aurora renderer.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Access-state tracking for buffers, textures, and swapchain images
//! - Batched pipeline barriers
//! - Command buffer recording with explicit state gating
//! - Descriptor buffers, swapchain handling, and frame pacing

pub mod access;
pub mod barrier;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod query;
pub mod sampler;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use access::{AccessState, BufferState};
pub use barrier::BarrierList;
pub use buffer::Buffer;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandBuffer, CommandBufferId, CommandPool, RecordState};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{DescriptorBuffer, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use error::{GpuError, Result};
pub use memory::GpuAllocator;
pub use query::TimestampQueries;
pub use sampler::{Sampler, SamplerDesc};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{Swapchain, SwapchainTexture};
pub use sync::{create_fence, create_semaphore, FrameSync, FrameSyncManager};
pub use texture::{Texture, TextureDesc, TextureRange};
