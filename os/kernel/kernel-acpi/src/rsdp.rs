//! # RSDP/XSDP (Root/Extended System Description Pointer)
//!
//! The root pointer is the only ACPI structure UEFI hands over directly. It
//! names the RSDT (32-bit entries, ACPI 1.0) and, from revision 2 on, the XSDT
//! (64-bit entries). [`AcpiRoots::find_table`] walks whichever root table is
//! available and returns the first validated table with the requested signature.

use crate::sdt::{SDT_HEADER_LEN, SdtError, SdtHeader, validate_table};
use crate::{PhysMapRo, sum};
use core::mem::size_of;
use log::{debug, trace};

const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";

/// Validated root pointers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AcpiRoots {
    pub rsdp_addr: u64,
    pub xsdt_addr: Option<u64>,
    pub rsdt_addr: Option<u64>,
}

/// ACPI 1.0 Root System Description Pointer (RSDP)
#[derive(Clone, Copy)]
#[allow(dead_code)]
#[repr(C, packed)]
struct Rsdp {
    signature: [u8; 8], // "RSD PTR "
    checksum: u8,       // sum of first 20 bytes == 0
    oem_id: [u8; 6],
    revision: u8, // 0 for ACPI 1.0
    rsdt_addr: u32,
}

/// ACPI 2.0 Extended System Description Pointer (XSDP)
#[derive(Clone, Copy)]
#[allow(dead_code)]
#[repr(C, packed)]
struct Xsdp {
    v1: Rsdp,
    length: u32,
    xsdt_addr: u64,
    ext_checksum: u8, // checksum of entire structure
    reserved: [u8; 3],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RsdpError {
    #[error("RSDP address is null")]
    Null,
    #[error("missing \"RSD PTR \" signature")]
    Signature,
    #[error("RSDP checksum mismatch")]
    Checksum,
    #[error("XSDP length {0} is smaller than the structure")]
    Length(usize),
    #[error("XSDP extended checksum mismatch")]
    ExtendedChecksum,
}

/// Which root table entries to walk and how wide they are.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RootTable {
    Xsdt(u64),
    Rsdt(u64),
}

impl RootTable {
    const fn signature(self) -> &'static [u8; 4] {
        match self {
            Self::Xsdt(_) => b"XSDT",
            Self::Rsdt(_) => b"RSDT",
        }
    }

    const fn addr(self) -> u64 {
        match self {
            Self::Xsdt(a) | Self::Rsdt(a) => a,
        }
    }

    const fn entry_size(self) -> usize {
        match self {
            Self::Xsdt(_) => 8,
            Self::Rsdt(_) => 4,
        }
    }
}

impl AcpiRoots {
    /// Validate the RSDP/XSDP at the physical address.
    ///
    /// Checks the signature and the 20-byte checksum; for revision 2 and later
    /// also the declared length and the extended checksum.
    ///
    /// # Errors
    /// An [`RsdpError`] describing the first failed check.
    ///
    /// # Safety
    /// `rsdp_addr` must be the firmware-provided RSDP address and `map` must
    /// be able to map it.
    pub unsafe fn parse(map: &impl PhysMapRo, rsdp_addr: u64) -> Result<Self, RsdpError> {
        if rsdp_addr == 0 {
            return Err(RsdpError::Null);
        }

        let v1 = unsafe { map.map_ro(rsdp_addr, size_of::<Rsdp>()) };
        if v1.len() < size_of::<Rsdp>() || &v1[0..8] != RSDP_SIGNATURE {
            return Err(RsdpError::Signature);
        }
        if sum(&v1[..size_of::<Rsdp>()]) != 0 {
            return Err(RsdpError::Checksum);
        }

        // SAFETY: length checked; packed struct requires an unaligned read.
        let rsdp = unsafe { core::ptr::read_unaligned(v1.as_ptr().cast::<Rsdp>()) };
        let rsdt = rsdp.rsdt_addr;
        let rsdt_addr = (rsdt != 0).then_some(u64::from(rsdt));

        if rsdp.revision < 2 {
            debug!("ACPI 1.0 RSDP at {rsdp_addr:#x}");
            return Ok(Self {
                rsdp_addr,
                xsdt_addr: None,
                rsdt_addr,
            });
        }

        let v2 = unsafe { map.map_ro(rsdp_addr, size_of::<Xsdp>()) };
        if v2.len() < size_of::<Xsdp>() {
            return Err(RsdpError::Length(v2.len()));
        }
        // SAFETY: length checked above.
        let xsdp = unsafe { core::ptr::read_unaligned(v2.as_ptr().cast::<Xsdp>()) };
        let len = xsdp.length as usize;
        if len < size_of::<Xsdp>() {
            return Err(RsdpError::Length(len));
        }

        let full = unsafe { map.map_ro(rsdp_addr, len) };
        if sum(full) != 0 {
            return Err(RsdpError::ExtendedChecksum);
        }

        debug!("ACPI 2.0+ XSDP at {rsdp_addr:#x}");
        let xsdt = xsdp.xsdt_addr;
        Ok(Self {
            rsdp_addr,
            xsdt_addr: (xsdt != 0).then_some(xsdt),
            rsdt_addr,
        })
    }

    /// Finds the first table with `signature` listed in the XSDT (preferred)
    /// or the RSDT and returns it validated and trimmed to its length.
    ///
    /// # Errors
    /// [`SdtError::NotFound`] if no listed table matches, or the validation
    /// error of the root table or the matching table.
    ///
    /// # Safety
    /// The root addresses must come from a successful [`AcpiRoots::parse`]
    /// with the same mapper.
    pub unsafe fn find_table<'a>(
        &self,
        map: &impl PhysMapRo,
        signature: &[u8; 4],
    ) -> Result<&'a [u8], SdtError> {
        let root = match (self.xsdt_addr, self.rsdt_addr) {
            (Some(x), _) => RootTable::Xsdt(x),
            (None, Some(r)) => RootTable::Rsdt(r),
            (None, None) => return Err(SdtError::NotFound(*signature)),
        };

        let root_table = unsafe { map_table(map, root.addr(), root.signature())? };
        let entries = &root_table[SDT_HEADER_LEN..];

        for chunk in entries.chunks_exact(root.entry_size()) {
            let addr = match root {
                RootTable::Xsdt(_) => u64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])),
                RootTable::Rsdt(_) => u64::from(u32::from_le_bytes(
                    chunk.try_into().unwrap_or([0; 4]),
                )),
            };
            if addr == 0 {
                continue;
            }

            let head = unsafe { map.map_ro(addr, SDT_HEADER_LEN) };
            let header = SdtHeader::read(head)?;
            trace!(
                "ACPI table {:?} at {addr:#x}",
                core::str::from_utf8(&header.signature).unwrap_or("????")
            );
            if &header.signature == signature {
                return unsafe { map_table(map, addr, signature) };
            }
        }

        Err(SdtError::NotFound(*signature))
    }
}

unsafe fn map_table<'a>(
    map: &impl PhysMapRo,
    addr: u64,
    signature: &[u8; 4],
) -> Result<&'a [u8], SdtError> {
    let head = unsafe { map.map_ro(addr, SDT_HEADER_LEN) };
    let header = SdtHeader::read(head)?;
    let full = unsafe { map.map_ro(addr, header.len()) };
    validate_table(full, signature)
}
