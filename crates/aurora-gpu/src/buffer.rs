//! GPU buffer resources.

use crate::access::BufferState;
use crate::context::GpuContext;
use crate::error::{contract, GpuError, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

/// A GPU buffer, its memory allocation, and its tracked access state.
///
/// A buffer is fully valid between [`Buffer::new`] and [`Buffer::destroy`];
/// `destroy` nulls the handle, and moving a buffer leaves the source
/// inaccessible, so no partially-initialized handle is ever observable.
/// Not `Clone`: a duplicated native handle would be a use-after-free
/// waiting to happen.
pub struct Buffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    state: BufferState,
}

impl Buffer {
    /// Create a buffer of `size` bytes.
    pub fn new(
        ctx: &GpuContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let (buffer, allocation) = ctx
            .allocator()
            .lock()
            .allocate_buffer(size, usage, location, name)?;

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            state: BufferState::UNDEFINED,
        })
    }

    /// Whether the buffer currently owns a live native handle.
    pub fn is_created(&self) -> bool {
        self.buffer != vk::Buffer::null()
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The access state the buffer was last transitioned to.
    pub fn state(&self) -> Result<BufferState> {
        contract!(self.is_created(), "access state of a destroyed buffer");
        Ok(self.state)
    }

    /// Overwrite the tracked access state.
    ///
    /// Bookkeeping only: the caller must issue (or be about to issue) the
    /// matching barrier. Invoked from barrier-list resolution.
    pub(crate) fn transit(&mut self, state: BufferState) -> Result<()> {
        contract!(self.is_created(), "transit on a destroyed buffer");
        self.state = state;
        Ok(())
    }

    /// Get the device address of this buffer.
    ///
    /// # Safety
    /// The device must be valid and the buffer must have been created with
    /// `SHADER_DEVICE_ADDRESS` usage.
    pub unsafe fn device_address(&self, device: &ash::Device) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        device.get_buffer_device_address(&info)
    }

    /// Map the buffer memory for CPU access.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Write data at the start of the buffer (must be host-visible).
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "Data range too large for buffer".to_string(),
            ));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }

    /// Destroy the buffer, freeing its memory.
    pub fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        contract!(self.is_created(), "destroy on a destroyed buffer");

        if let Some(allocation) = self.allocation.take() {
            ctx.allocator().lock().free_buffer(self.buffer, allocation)?;
        }
        self.buffer = vk::Buffer::null();
        self.state = BufferState::UNDEFINED;
        Ok(())
    }

    /// Build a buffer around an existing raw handle, for logic tests that
    /// never touch a device.
    #[cfg(test)]
    pub(crate) fn for_tests(size: u64) -> Self {
        use ash::vk::Handle;
        Self {
            buffer: vk::Buffer::from_raw(0x1),
            allocation: None,
            size,
            state: BufferState::UNDEFINED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_starts_undefined() {
        let buffer = Buffer::for_tests(64);
        assert!(buffer.is_created());
        assert_eq!(buffer.state().unwrap(), BufferState::UNDEFINED);
    }

    #[test]
    fn transit_overwrites_state() {
        let mut buffer = Buffer::for_tests(64);
        buffer.transit(BufferState::TRANSFER_DST).unwrap();
        assert_eq!(buffer.state().unwrap(), BufferState::TRANSFER_DST);
        // Re-querying without an intervening transit is stable.
        assert_eq!(buffer.state().unwrap(), BufferState::TRANSFER_DST);
    }

    #[test]
    fn destroyed_buffer_rejects_state_queries() {
        let mut buffer = Buffer::for_tests(64);
        buffer.buffer = vk::Buffer::null();
        assert!(matches!(
            buffer.state(),
            Err(GpuError::ContractViolation(_))
        ));
        assert!(matches!(
            buffer.transit(BufferState::VERTEX),
            Err(GpuError::ContractViolation(_))
        ));
    }

    #[test]
    fn unmapped_write_is_invalid_state() {
        let buffer = Buffer::for_tests(16);
        assert!(matches!(
            buffer.write(&[0u32; 4]),
            Err(GpuError::InvalidState(_))
        ));
    }
}
