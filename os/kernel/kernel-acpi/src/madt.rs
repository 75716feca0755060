//! # MADT (Multiple APIC Description Table)
//!
//! The MADT starts with the common SDT header, the physical address of the
//! local APIC and a flags word. What follows is a packed list of
//! variable-length interrupt controller structures, each starting with a
//! one-byte type and a one-byte length:
//!
//! ```text
//! +-------------------+----------------+-------+------+--------+------+-----
//! | SDT header (36 B) | LAPIC addr (4) | flags | type | length | body | ...
//! +-------------------+----------------+-------+------+--------+------+-----
//! ```
//!
//! [`Madt::parse`] checks the whole entry chain once, so iterating with
//! [`Madt::entries`] afterwards cannot run past the table or stall on a
//! zero-length entry.

use crate::sdt::{SDT_HEADER_LEN, SdtError, SdtHeader};
use log::trace;

/// Signature of the MADT in the XSDT/RSDT.
pub const MADT_SIGNATURE: [u8; 4] = *b"APIC";

/// Size of the fixed MADT header: SDT header, local APIC address and flags.
pub const MADT_HEADER_LEN: usize = SDT_HEADER_LEN + 8;

/// Sub-entry type of a processor local APIC.
pub const ENTRY_LOCAL_APIC: u8 = 0;
/// Sub-entry type of an I/O APIC.
pub const ENTRY_IO_APIC: u8 = 1;
/// Sub-entry type of an interrupt source override.
pub const ENTRY_INTERRUPT_OVERRIDE: u8 = 2;
/// Sub-entry type of a local APIC NMI configuration.
pub const ENTRY_LOCAL_APIC_NMI: u8 = 4;

const ENTRY_HEADER_LEN: usize = 2;
const LOCAL_APIC_LEN: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MadtError {
    #[error(transparent)]
    Header(#[from] SdtError),
    #[error("table signature {0:?} is not \"APIC\"")]
    Signature([u8; 4]),
    #[error("MADT length {0} does not exceed the fixed MADT header")]
    TooShort(usize),
    #[error("MADT length {length} exceeds the {available} bytes provided")]
    Truncated { length: usize, available: usize },
    #[error("sub-entry at offset {offset} has invalid length {length}")]
    Entry { offset: usize, length: usize },
}

/// A parsed, bounds-checked MADT.
#[derive(Debug, Copy, Clone)]
pub struct Madt<'a> {
    table: &'a [u8],
}

impl<'a> Madt<'a> {
    /// Validates the MADT in `bytes` and its chain of sub-entries.
    ///
    /// # Errors
    /// A [`MadtError`] if the buffer is too small for the header, the
    /// signature is wrong, the declared length is not larger than the header
    /// or exceeds the buffer, or any sub-entry is malformed.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, MadtError> {
        let header = SdtHeader::read(bytes)?;
        if header.signature != MADT_SIGNATURE {
            return Err(MadtError::Signature(header.signature));
        }

        let length = header.len();
        if length <= MADT_HEADER_LEN {
            return Err(MadtError::TooShort(length));
        }
        if length > bytes.len() {
            return Err(MadtError::Truncated {
                length,
                available: bytes.len(),
            });
        }

        let table = &bytes[..length];
        let mut offset = MADT_HEADER_LEN;
        while offset < length {
            let remaining = length - offset;
            let entry_len = if remaining < ENTRY_HEADER_LEN {
                remaining
            } else {
                usize::from(table[offset + 1])
            };
            if entry_len < ENTRY_HEADER_LEN || entry_len > remaining {
                return Err(MadtError::Entry {
                    offset,
                    length: entry_len,
                });
            }
            offset += entry_len;
        }

        Ok(Self { table })
    }

    /// Physical address of the local APIC register block.
    #[must_use]
    pub fn local_apic_address(&self) -> u32 {
        let b = &self.table[SDT_HEADER_LEN..SDT_HEADER_LEN + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// MADT flags word; bit 0 means dual 8259 PICs are installed.
    #[must_use]
    pub fn flags(&self) -> u32 {
        let b = &self.table[SDT_HEADER_LEN + 4..MADT_HEADER_LEN];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Iterates all sub-entries in table order.
    #[must_use]
    pub fn entries(&self) -> MadtEntries<'a> {
        MadtEntries {
            table: self.table,
            offset: MADT_HEADER_LEN,
        }
    }

    /// Iterates the processor local APIC entries in table order.
    pub fn local_apics(&self) -> impl Iterator<Item = LocalApic> + 'a {
        self.entries().filter_map(LocalApic::from_entry)
    }
}

/// One interrupt controller structure inside the MADT.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MadtEntry<'a> {
    /// Byte offset of the entry within the table.
    pub offset: usize,
    pub kind: u8,
    /// The whole entry, including the type and length bytes.
    pub bytes: &'a [u8],
}

pub struct MadtEntries<'a> {
    table: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for MadtEntries<'a> {
    type Item = MadtEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.table.len() {
            return None;
        }

        // Lengths were validated by `Madt::parse`.
        let offset = self.offset;
        let kind = self.table[offset];
        let len = usize::from(self.table[offset + 1]);
        self.offset += len;

        trace!("MADT entry type {kind} at offset {offset}, {len} bytes");
        Some(MadtEntry {
            offset,
            kind,
            bytes: &self.table[offset..offset + len],
        })
    }
}

/// Processor local APIC structure (type 0).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalApic {
    /// ACPI processor UID.
    pub processor_uid: u8,
    /// The local APIC id; this is what INIT/STARTUP IPIs are addressed to.
    pub apic_id: u8,
    pub flags: u32,
}

impl LocalApic {
    /// Decodes a local APIC entry; `None` for any other entry type.
    #[must_use]
    pub fn from_entry(entry: MadtEntry<'_>) -> Option<Self> {
        if entry.kind != ENTRY_LOCAL_APIC || entry.bytes.len() < LOCAL_APIC_LEN {
            return None;
        }

        let b = entry.bytes;
        Some(Self {
            processor_uid: b[2],
            apic_id: b[3],
            flags: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        })
    }

    /// Bit 0: the processor is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.flags & 1 != 0
    }

    /// Bit 1: the processor can be brought online later.
    #[must_use]
    pub const fn is_online_capable(&self) -> bool {
        self.flags & 2 != 0
    }
}
