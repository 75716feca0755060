//! # Relocatable Boot Stub Loader
//!
//! A woken application processor starts in real mode at `vector << 12`, so
//! the stub that takes it to long mode has to sit in a page below 1 MiB. The
//! kernel links the stub anywhere and copies it into that page before the
//! first STARTUP IPI goes out. Position-dependent fix-ups inside the stub are
//! the stub's own business.

use crate::fatal::MpFault;
use log::{debug, info};

/// Physical address the stub is copied to; startup vector 1.
pub const AP_BOOT_STUB_ADDR: u64 = 0x1000;

/// Bytes available at [`AP_BOOT_STUB_ADDR`].
pub const AP_BOOT_STUB_REGION: usize = 0x1000;

const PAGE_SIZE: u64 = 0x1000;
const REAL_MODE_LIMIT: u64 = 0x10_0000;

/// Map a physical region and return a writable byte slice for its contents.
pub trait PhysMapRw {
    /// # Safety
    /// The implementor must ensure the returned slice is valid and exclusively
    /// borrowed for `len` bytes.
    unsafe fn map_rw<'a>(&self, paddr: u64, len: usize) -> &'a mut [u8];
}

/// Page number encoded in a STARTUP IPI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StartupVector(u8);

impl StartupVector {
    /// Vector for a page-aligned address below 1 MiB.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_address(addr: u64) -> Option<Self> {
        if addr % PAGE_SIZE != 0 || addr >= REAL_MODE_LIMIT {
            return None;
        }
        Some(Self((addr / PAGE_SIZE) as u8))
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Physical address the woken core starts executing at.
    #[must_use]
    pub fn entry_address(self) -> u64 {
        u64::from(self.0) * PAGE_SIZE
    }
}

/// The stub's code, as linked into the kernel image.
#[derive(Debug, Copy, Clone)]
pub struct BootStub<'a> {
    code: &'a [u8],
}

impl<'a> BootStub<'a> {
    #[must_use]
    pub const fn new(code: &'a [u8]) -> Self {
        Self { code }
    }

    /// Builds the stub from the link-time symbols that bracket it.
    ///
    /// # Safety
    /// `start..end` must be one readable allocation with `start <= end`,
    /// as produced by start/end markers around the stub's section.
    #[must_use]
    pub unsafe fn from_markers(start: *const u8, end: *const u8) -> Self {
        let len = unsafe { end.offset_from(start) };
        let len = usize::try_from(len).unwrap_or(0);
        Self {
            code: unsafe { core::slice::from_raw_parts(start, len) },
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[must_use]
    pub const fn code(&self) -> &'a [u8] {
        self.code
    }
}

/// Copies `stub` into `region`, which is mapped from physical `region_addr`,
/// and returns the startup vector that addresses it.
///
/// # Errors
/// [`MpFault::InvalidStubAddress`] if `region_addr` is not a page below 1 MiB,
/// [`MpFault::BootStubTooLarge`] if the stub does not fit `region`.
pub fn install_boot_stub(
    stub: &BootStub<'_>,
    region: &mut [u8],
    region_addr: u64,
) -> Result<StartupVector, MpFault> {
    let vector =
        StartupVector::from_address(region_addr).ok_or(MpFault::InvalidStubAddress(region_addr))?;

    if stub.len() > region.len() {
        return Err(MpFault::BootStubTooLarge {
            len: stub.len(),
            capacity: region.len(),
        });
    }

    debug!(
        "copying {} byte AP boot stub to {region_addr:#x}",
        stub.len()
    );
    region[..stub.len()].copy_from_slice(stub.code());

    info!(
        "AP boot stub installed at {:#x} (startup vector {})",
        vector.entry_address(),
        vector.as_u8()
    );
    Ok(vector)
}

/// Maps [`AP_BOOT_STUB_ADDR`] through `map` and installs `stub` there.
///
/// # Errors
/// As [`install_boot_stub`].
///
/// # Safety
/// Nothing else may use the page at [`AP_BOOT_STUB_ADDR`].
pub unsafe fn install_boot_stub_low(
    map: &impl PhysMapRw,
    stub: &BootStub<'_>,
) -> Result<StartupVector, MpFault> {
    if stub.len() > AP_BOOT_STUB_REGION {
        return Err(MpFault::BootStubTooLarge {
            len: stub.len(),
            capacity: AP_BOOT_STUB_REGION,
        });
    }

    let region = unsafe { map.map_rw(AP_BOOT_STUB_ADDR, AP_BOOT_STUB_REGION) };
    install_boot_stub(stub, region, AP_BOOT_STUB_ADDR)
}
