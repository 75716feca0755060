//! # Processor Directory
//!
//! One [`ProcessorRecord`] per local APIC listed in the MADT, indexed by
//! [`LogicalId`]. The record array is allocated once, during discovery, and
//! never grows, shrinks or moves. Only the `running` flag changes afterward,
//! and only the core a record describes ever sets it.

extern crate alloc;

use crate::fatal::MpFault;
use crate::ids::{HardwareId, LogicalId};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_acpi::madt::Madt;
use log::{debug, info};

pub struct ProcessorRecord {
    id: LogicalId,
    hardware_id: HardwareId,
    /// Single writer (the core itself, or the primary for its own record),
    /// many readers; only ever flips `false -> true`.
    running: AtomicBool,
}

impl ProcessorRecord {
    const fn new(id: LogicalId, hardware_id: HardwareId) -> Self {
        Self {
            id,
            hardware_id,
            running: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> LogicalId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn hardware_id(&self) -> HardwareId {
        self.hardware_id
    }

    /// Whether the core has reported itself live. A stale `false` is harmless;
    /// pollers simply look again.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reports the core live. `Release` publishes everything the core set up
    /// before the call to whoever observes the flag.
    #[inline]
    pub fn mark_running(&self) {
        self.running.store(true, Ordering::Release);
    }
}

impl core::fmt::Debug for ProcessorRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessorRecord")
            .field("id", &self.id)
            .field("hardware_id", &self.hardware_id)
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug)]
pub struct ProcessorDirectory {
    records: Box<[ProcessorRecord]>,
}

impl ProcessorDirectory {
    /// Builds the directory from the MADT's local APIC entries.
    ///
    /// The first pass counts the entries to size the allocation, the second
    /// fills it. Logical ids follow table order.
    ///
    /// # Errors
    /// [`MpFault::NoProcessors`] for a MADT without local APICs,
    /// [`MpFault::DuplicateHardwareId`] if an APIC id repeats.
    pub fn discover(madt: &Madt<'_>) -> Result<Self, MpFault> {
        for entry in madt.entries() {
            debug!("MADT entry type {} at offset {}", entry.kind, entry.offset);
        }

        let count = madt.local_apics().count();
        info!("MADT lists {count} local APIC(s)");

        let mut ids = Vec::with_capacity(count);
        for lapic in madt.local_apics() {
            debug!(
                "cpu{}: ACPI uid {}, LAPIC id {:#x}",
                ids.len(),
                lapic.processor_uid,
                lapic.apic_id
            );
            ids.push(HardwareId::from(lapic.apic_id));
        }

        if ids.len() != count {
            return Err(MpFault::InconsistentMadt {
                counted: count,
                saved: ids.len(),
            });
        }

        Self::from_hardware_ids(ids)
    }

    /// Builds the directory from hardware ids in discovery order.
    ///
    /// # Errors
    /// [`MpFault::NoProcessors`] if `ids` is empty,
    /// [`MpFault::DuplicateHardwareId`] if an id repeats.
    pub fn from_hardware_ids(
        ids: impl IntoIterator<Item = HardwareId>,
    ) -> Result<Self, MpFault> {
        let mut records: Vec<ProcessorRecord> = Vec::new();
        for hardware in ids {
            let id = LogicalId::new(
                u32::try_from(records.len()).map_err(|_| MpFault::NoProcessors)?,
            );
            if let Some(first) = records.iter().find(|r| r.hardware_id == hardware) {
                return Err(MpFault::DuplicateHardwareId {
                    hardware,
                    first: first.id,
                    second: id,
                });
            }
            records.push(ProcessorRecord::new(id, hardware));
        }

        if records.is_empty() {
            return Err(MpFault::NoProcessors);
        }

        Ok(Self {
            records: records.into_boxed_slice(),
        })
    }

    /// Number of discovered processors; at least one.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; an empty directory is rejected at construction.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: LogicalId) -> Option<&ProcessorRecord> {
        self.records.get(id.as_usize())
    }

    /// Like [`get`](Self::get), but reports a missing id as a fault.
    ///
    /// # Errors
    /// [`MpFault::NoSuchProcessor`] if `id` is out of range.
    pub fn record(&self, id: LogicalId) -> Result<&ProcessorRecord, MpFault> {
        self.get(id).ok_or(MpFault::NoSuchProcessor {
            id,
            count: self.len(),
        })
    }

    /// Records in ascending logical id order.
    pub fn iter(&self) -> core::slice::Iter<'_, ProcessorRecord> {
        self.records.iter()
    }

    /// Linear scan for the core with `hardware` id.
    #[must_use]
    pub fn logical_id_of(&self, hardware: HardwareId) -> Option<LogicalId> {
        self.records
            .iter()
            .find(|r| r.hardware_id == hardware)
            .map(ProcessorRecord::id)
    }

    /// Number of cores that have reported running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_running()).count()
    }
}

impl<'a> IntoIterator for &'a ProcessorDirectory {
    type Item = &'a ProcessorRecord;
    type IntoIter = core::slice::Iter<'a, ProcessorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn hw(ids: &[u32]) -> Vec<HardwareId> {
        ids.iter().copied().map(HardwareId::new).collect()
    }

    pub fn madt_bytes(apic_ids: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        // An I/O APIC entry that discovery must skip.
        body.extend_from_slice(&[1, 12, 0, 0, 0, 0, 0xC0, 0xFE, 0, 0, 0, 0]);
        for (uid, &id) in apic_ids.iter().enumerate() {
            body.extend_from_slice(&[0, 8, u8::try_from(uid).unwrap(), id, 1, 0, 0, 0]);
        }

        let len = u32::try_from(36 + body.len()).unwrap();
        let mut t = Vec::new();
        t.extend_from_slice(b"APIC");
        t.extend_from_slice(&len.to_le_bytes());
        t.extend_from_slice(&[1, 0]);
        t.extend_from_slice(&[0; 26]);
        t.extend_from_slice(&body);
        let s = t.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        t[9] = 0u8.wrapping_sub(s);
        t
    }

    #[test]
    fn discovery_assigns_logical_ids_in_table_order() {
        let bytes = madt_bytes(&[5, 2, 9, 1]);
        let madt = Madt::parse(&bytes).unwrap();
        let dir = ProcessorDirectory::discover(&madt).unwrap();

        assert_eq!(dir.len(), 4);
        let pairs: Vec<(u32, u32)> = dir
            .iter()
            .map(|r| (r.id().as_u32(), r.hardware_id().as_u32()))
            .collect();
        assert_eq!(pairs, [(0, 5), (1, 2), (2, 9), (3, 1)]);
    }

    #[test]
    fn discovery_marks_nothing_running() {
        let bytes = madt_bytes(&[0, 1, 2]);
        let dir = ProcessorDirectory::discover(&Madt::parse(&bytes).unwrap()).unwrap();
        assert!(dir.iter().all(|r| !r.is_running()));
        assert_eq!(dir.running_count(), 0);
    }

    #[test]
    fn directory_size_matches_entry_count() {
        for k in 1..=16u8 {
            let ids: Vec<u8> = (0..k).map(|i| i * 3).collect();
            let bytes = madt_bytes(&ids);
            let dir = ProcessorDirectory::discover(&Madt::parse(&bytes).unwrap()).unwrap();
            assert_eq!(dir.len(), usize::from(k));
            for (i, r) in dir.iter().enumerate() {
                assert_eq!(r.id().as_usize(), i);
            }
        }
    }

    #[test]
    fn madt_without_local_apics_is_rejected() {
        let bytes = madt_bytes(&[]);
        let madt = Madt::parse(&bytes).unwrap();
        assert_eq!(
            ProcessorDirectory::discover(&madt).err(),
            Some(MpFault::NoProcessors)
        );
    }

    #[test]
    fn duplicate_hardware_ids_are_rejected() {
        let err = ProcessorDirectory::from_hardware_ids(hw(&[3, 7, 3])).unwrap_err();
        assert_eq!(
            err,
            MpFault::DuplicateHardwareId {
                hardware: HardwareId::new(3),
                first: LogicalId::new(0),
                second: LogicalId::new(2),
            }
        );
    }

    #[test]
    fn lookup_by_hardware_id() {
        let dir = ProcessorDirectory::from_hardware_ids(hw(&[5, 2, 9, 1])).unwrap();
        assert_eq!(dir.logical_id_of(HardwareId::new(9)), Some(LogicalId::new(2)));
        assert_eq!(dir.logical_id_of(HardwareId::new(4)), None);
        assert!(dir.get(LogicalId::new(4)).is_none());
        assert_eq!(
            dir.record(LogicalId::new(4)).unwrap_err(),
            MpFault::NoSuchProcessor {
                id: LogicalId::new(4),
                count: 4
            }
        );
    }

    #[test]
    fn running_flag_is_monotonic() {
        let dir = ProcessorDirectory::from_hardware_ids(hw(&[0, 1])).unwrap();
        let r = dir.get(LogicalId::new(1)).unwrap();
        r.mark_running();
        r.mark_running();
        assert!(r.is_running());
        assert_eq!(dir.running_count(), 1);
    }
}
