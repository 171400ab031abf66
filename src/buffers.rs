// ============================================================================
// buffers.rs — Heatmask
// Storage buffer holding the per-frame heat source records.
// ============================================================================

use crate::aggregate::BufferRecord;
use crate::backend::{ComputeBackend, DeviceResource};
use crate::error::{HeatmaskError, ResourceKind};

struct Resident<R> {
    buffer: R,
    capacity: usize,
}

/// Buffer produced by a sync; the only way to get something dispatchable,
/// so the bound count always matches the buffer it was uploaded into.
pub struct SyncedRecords<'a, R> {
    pub buffer: &'a R,
    /// Elements allocated: `max(1, count)`.
    pub capacity: usize,
    /// Records uploaded this frame.
    pub count: u32,
    pub reallocated: bool,
}

/// Owns the single resident record buffer.
pub struct BufferLifecycleManager<R: DeviceResource> {
    resident: Option<Resident<R>>,
    reallocations: u64,
}

impl<R: DeviceResource> BufferLifecycleManager<R> {
    pub fn new() -> Self {
        Self {
            resident: None,
            reallocations: 0,
        }
    }

    /// Capacity in records of the resident buffer, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.resident.as_ref().map(|r| r.capacity)
    }

    /// How many times a buffer has been (re)allocated.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Size the buffer for `records` and upload them.
    ///
    /// Capacity is `max(1, count)`, so moving between zero and one source
    /// keeps the same buffer.
    ///
    /// A count change releases the old buffer before the new one is
    /// allocated; on allocation failure nothing stays resident.
    pub fn sync<'a, B>(
        &'a mut self,
        backend: &mut B,
        records: &[BufferRecord],
    ) -> Result<SyncedRecords<'a, R>, HeatmaskError>
    where
        B: ComputeBackend<RecordBuffer = R>,
    {
        let count = u32::try_from(records.len()).map_err(|_| {
            HeatmaskError::exhausted(
                ResourceKind::SourceBuffer,
                format!("{} sources exceed the kernel's u32 count", records.len()),
            )
        })?;
        let needed = records.len().max(1);

        let (resident, reallocated) = match self.resident.take() {
            Some(r) if r.capacity == needed => (r, false),
            stale => {
                let previous = stale.map(|old| {
                    let capacity = old.capacity;
                    old.buffer.release();
                    capacity
                });
                let buffer = backend.allocate_records(needed)?;
                self.reallocations += 1;
                log::debug!(
                    "Source buffer reallocated: {:?} -> {} records",
                    previous,
                    needed
                );
                (
                    Resident {
                        buffer,
                        capacity: needed,
                    },
                    true,
                )
            }
        };

        backend.upload_records(&resident.buffer, records);
        let resident = self.resident.insert(resident);

        Ok(SyncedRecords {
            buffer: &resident.buffer,
            capacity: resident.capacity,
            count,
            reallocated,
        })
    }

    /// Release the resident buffer, if any. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(old) = self.resident.take() {
            old.buffer.release();
        }
    }
}

impl<R: DeviceResource> Default for BufferLifecycleManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: DeviceResource> Drop for BufferLifecycleManager<R> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeBuffer, RecordingBackend};

    fn records(n: usize) -> Vec<BufferRecord> {
        (0..n)
            .map(|i| BufferRecord {
                position_x: i as f32,
                position_y: -(i as f32),
                range: 1.0,
                heat: 10.0 * i as f32,
            })
            .collect()
    }

    #[test]
    fn test_capacity_is_max_one_and_count() {
        let (mut backend, _ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::<FakeBuffer>::new();

        for n in [0usize, 1, 3, 17, 2, 0] {
            let synced = manager.sync(&mut backend, &records(n)).unwrap();
            assert_eq!(synced.capacity, n.max(1));
            assert_eq!(synced.buffer.capacity, n.max(1));
            assert_eq!(synced.count as usize, n);
        }
    }

    #[test]
    fn test_same_count_resync_only_uploads() {
        let (mut backend, ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::new();

        assert!(manager.sync(&mut backend, &records(4)).unwrap().reallocated);
        assert!(!manager.sync(&mut backend, &records(4)).unwrap().reallocated);

        let ledger = ledger.borrow();
        assert_eq!(ledger.buffers_allocated.len(), 1);
        assert_eq!(ledger.uploads.len(), 2);
        assert_eq!(manager.reallocations(), 1);
    }

    #[test]
    fn test_zero_and_one_share_a_capacity() {
        let (mut backend, ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::new();

        manager.sync(&mut backend, &records(0)).unwrap();
        let synced = manager.sync(&mut backend, &records(1)).unwrap();
        assert!(!synced.reallocated);
        assert_eq!(ledger.borrow().buffers_allocated.len(), 1);
    }

    #[test]
    fn test_count_change_releases_previous_buffer() {
        let (mut backend, ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::new();

        let first = manager.sync(&mut backend, &records(5)).unwrap().buffer.id;
        let second = manager.sync(&mut backend, &records(2)).unwrap().buffer.id;
        assert_ne!(first, second);

        let ledger = ledger.borrow();
        assert_eq!(ledger.buffers_released, vec![first]);
        assert_eq!(ledger.live_buffers(), 1);
    }

    #[test]
    fn test_upload_carries_exact_records() {
        let (mut backend, ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::new();
        let data = records(3);

        let id = manager.sync(&mut backend, &data).unwrap().buffer.id;
        assert_eq!(ledger.borrow().uploads.last(), Some(&(id, data)));
    }

    #[test]
    fn test_allocation_failure_leaves_nothing_resident() {
        let (mut backend, ledger) = RecordingBackend::new();
        let mut manager = BufferLifecycleManager::new();
        manager.sync(&mut backend, &records(2)).unwrap();

        ledger.borrow_mut().fail_buffer_alloc = true;
        let err = manager.sync(&mut backend, &records(6)).err().unwrap();
        assert!(matches!(
            err,
            HeatmaskError::ResourceExhausted {
                resource: ResourceKind::SourceBuffer,
                ..
            }
        ));
        assert_eq!(manager.capacity(), None);
        assert_eq!(ledger.borrow().live_buffers(), 0);
    }

    #[test]
    fn test_drop_and_release_free_buffer_once() {
        let (mut backend, ledger) = RecordingBackend::new();
        {
            let mut manager = BufferLifecycleManager::new();
            manager.sync(&mut backend, &records(3)).unwrap();
            manager.release();
            manager.release();
            manager.sync(&mut backend, &records(3)).unwrap();
        }
        let ledger = ledger.borrow();
        assert_eq!(ledger.buffers_allocated.len(), 2);
        assert_eq!(ledger.buffers_released.len(), 2);
    }
}
