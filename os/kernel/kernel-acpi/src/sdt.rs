//! # System Description Table headers
//!
//! Every ACPI table other than the RSDP starts with the same 36-byte header.
//! This module reads that header out of a mapped byte slice and validates the
//! table it describes.

use crate::sum;
use core::mem::size_of;

/// Common header of all system description tables.
#[derive(Clone, Copy)]
#[repr(C, packed)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

/// Size of [`SdtHeader`] in bytes.
pub const SDT_HEADER_LEN: usize = size_of::<SdtHeader>();

const _: () = assert!(SDT_HEADER_LEN == 36, "SDT header must be 36 bytes");

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdtError {
    #[error("table buffer of {0} bytes cannot hold an SDT header")]
    TooShort(usize),
    #[error("table length {length} exceeds the {available} mapped bytes")]
    Truncated { length: usize, available: usize },
    #[error("unexpected table signature {found:?}")]
    Signature { found: [u8; 4] },
    #[error("table checksum mismatch")]
    Checksum,
    #[error("table {0:?} not found")]
    NotFound([u8; 4]),
}

impl SdtHeader {
    /// Reads the header at the start of `bytes`.
    ///
    /// # Errors
    /// [`SdtError::TooShort`] if `bytes` is shorter than the header.
    pub fn read(bytes: &[u8]) -> Result<Self, SdtError> {
        if bytes.len() < SDT_HEADER_LEN {
            return Err(SdtError::TooShort(bytes.len()));
        }

        // SAFETY: length checked above; the struct is packed, so unaligned reads are required.
        Ok(unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<Self>()) })
    }

    /// Total table length in bytes, header included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() <= SDT_HEADER_LEN
    }
}

/// Validates a complete table: signature, declared length against the buffer,
/// and checksum. Returns the table trimmed to its declared length.
///
/// # Errors
/// Any [`SdtError`] except [`SdtError::NotFound`].
pub fn validate_table<'a>(bytes: &'a [u8], signature: &[u8; 4]) -> Result<&'a [u8], SdtError> {
    let header = SdtHeader::read(bytes)?;
    if &header.signature != signature {
        return Err(SdtError::Signature {
            found: header.signature,
        });
    }

    let length = header.len();
    if length < SDT_HEADER_LEN || length > bytes.len() {
        return Err(SdtError::Truncated {
            length,
            available: bytes.len(),
        });
    }

    let table = &bytes[..length];
    if sum(table) != 0 {
        return Err(SdtError::Checksum);
    }

    Ok(table)
}
