//! GPU timestamp queries.

use crate::error::{contract, Result};
use ash::vk;

/// Pool of timestamp queries for frame timing.
///
/// Results are polled: a frame writes timestamps during recording and reads
/// them back some frames later, once the GPU has retired the work.
pub struct TimestampQueries {
    pool: vk::QueryPool,
    count: u32,
}

impl TimestampQueries {
    /// Create a pool of `count` timestamp queries.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, count: u32) -> Result<Self> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);

        let pool = device.create_query_pool(&create_info, None)?;
        Ok(Self { pool, count })
    }

    /// Get the raw query pool handle.
    pub fn handle(&self) -> vk::QueryPool {
        self.pool
    }

    /// Number of queries in the pool.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record a reset of all queries. Must precede the frame's first
    /// `write_timestamp` on the same command buffer.
    ///
    /// # Safety
    /// The device and command buffer must be valid.
    pub unsafe fn reset(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_reset_query_pool(cmd, self.pool, 0, self.count);
    }

    /// Record a timestamp write into query `index` once `stage` completes.
    ///
    /// # Safety
    /// The device and command buffer must be valid.
    pub unsafe fn write_timestamp(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        index: u32,
    ) -> Result<()> {
        contract!(
            index < self.count,
            "timestamp index {index} out of range ({} queries)",
            self.count
        );
        device.cmd_write_timestamp2(cmd, stage, self.pool, index);
        Ok(())
    }

    /// Poll for all query results.
    ///
    /// Returns `Ok(None)` while the GPU has not yet retired every query.
    /// This is the one recoverable condition in this layer; any other
    /// non-success result is a real error.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn try_results(&self, device: &ash::Device) -> Result<Option<Vec<u64>>> {
        let mut data = vec![0u64; self.count as usize];
        match device.get_query_pool_results(self.pool, 0, &mut data, vk::QueryResultFlags::TYPE_64)
        {
            Ok(()) => Ok(Some(data)),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Destroy the query pool.
    ///
    /// # Safety
    /// The device must be valid and no recorded use of the pool may be
    /// pending.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
        self.pool = vk::QueryPool::null();
    }
}
