//! ACPI-backed [`FirmwareTables`].

use crate::platform::FirmwareTables;
use kernel_acpi::PhysMapRo;
use kernel_acpi::madt::MADT_SIGNATURE;
use kernel_acpi::rsdp::{AcpiRoots, RsdpError};
use kernel_acpi::sdt::SdtError;
use log::{error, info};

/// Tables located through the firmware's RSDP.
///
/// The lookup happens once, in [`AcpiFirmware::locate`]. A MADT that is
/// absent or fails validation is reported as missing, which discovery turns
/// into [`MpFault::MissingMadt`](crate::MpFault::MissingMadt).
#[derive(Debug, Clone, Copy)]
pub struct AcpiFirmware<'a> {
    roots: AcpiRoots,
    madt: Option<&'a [u8]>,
}

impl<'a> AcpiFirmware<'a> {
    /// Parses the RSDP at `rsdp_addr` and looks up the MADT.
    ///
    /// # Errors
    /// The [`RsdpError`] if the root pointer is invalid.
    ///
    /// # Safety
    /// `rsdp_addr` must be the firmware-provided RSDP address, and the
    /// mappings returned by `map` must stay valid for `'a`.
    pub unsafe fn locate(map: &impl PhysMapRo, rsdp_addr: u64) -> Result<Self, RsdpError> {
        let roots = unsafe { AcpiRoots::parse(map, rsdp_addr) }?;

        let madt = match unsafe { roots.find_table(map, &MADT_SIGNATURE) } {
            Ok(bytes) => {
                info!("MADT: {} bytes", bytes.len());
                Some(bytes)
            }
            Err(SdtError::NotFound(_)) => None,
            Err(e) => {
                error!("MADT rejected: {e}");
                None
            }
        };

        Ok(Self { roots, madt })
    }

    #[must_use]
    pub const fn roots(&self) -> &AcpiRoots {
        &self.roots
    }
}

impl FirmwareTables for AcpiFirmware<'_> {
    fn madt(&self) -> Option<&[u8]> {
        self.madt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::madt_bytes;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Phys {
        regions: RefCell<Vec<(u64, &'static [u8])>>,
    }

    impl Phys {
        fn place(&self, base: u64, bytes: Vec<u8>) {
            self.regions
                .borrow_mut()
                .push((base, Box::leak(bytes.into_boxed_slice())));
        }
    }

    impl PhysMapRo for Phys {
        unsafe fn map_ro<'a>(&self, paddr: u64, len: usize) -> &'a [u8] {
            let regions = self.regions.borrow();
            let &(base, bytes) = regions
                .iter()
                .find(|(base, bytes)| (*base..*base + bytes.len() as u64).contains(&paddr))
                .unwrap();
            let start = usize::try_from(paddr - base).unwrap();
            &bytes[start..bytes.len().min(start + len)]
        }
    }

    fn checksummed(mut bytes: Vec<u8>, index: usize) -> Vec<u8> {
        bytes[index] = 0;
        let sum = bytes.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        bytes[index] = 0u8.wrapping_sub(sum);
        bytes
    }

    fn rsdp(rsdt: u32) -> Vec<u8> {
        let mut r = Vec::new();
        r.extend_from_slice(b"RSD PTR ");
        r.push(0);
        r.extend_from_slice(b"OEMID ");
        r.push(0);
        r.extend_from_slice(&rsdt.to_le_bytes());
        checksummed(r, 8)
    }

    fn rsdt(entries: &[u32]) -> Vec<u8> {
        let len = u32::try_from(36 + 4 * entries.len()).unwrap();
        let mut t = Vec::new();
        t.extend_from_slice(b"RSDT");
        t.extend_from_slice(&len.to_le_bytes());
        t.extend_from_slice(&[1, 0]);
        t.extend_from_slice(&[0; 26]);
        for e in entries {
            t.extend_from_slice(&e.to_le_bytes());
        }
        checksummed(t, 9)
    }

    #[test]
    fn madt_is_found_through_the_rsdt() {
        let phys = Phys::default();
        phys.place(0xE_0000, rsdp(0x10_0000));
        phys.place(0x10_0000, rsdt(&[0x20_0000]));
        phys.place(0x20_0000, madt_bytes(&[0, 1, 2]));

        let fw = unsafe { AcpiFirmware::locate(&phys, 0xE_0000) }.unwrap();

        assert_eq!(fw.roots().rsdt_addr, Some(0x10_0000));
        let madt = fw.madt().unwrap();
        assert_eq!(&madt[..4], b"APIC");
        assert_eq!(madt, madt_bytes(&[0, 1, 2]).as_slice());
    }

    #[test]
    fn corrupt_madt_reads_as_missing() {
        let phys = Phys::default();
        let mut madt = madt_bytes(&[0, 1]);
        madt[9] = madt[9].wrapping_add(1);
        phys.place(0xE_0000, rsdp(0x10_0000));
        phys.place(0x10_0000, rsdt(&[0x20_0000]));
        phys.place(0x20_0000, madt);

        let fw = unsafe { AcpiFirmware::locate(&phys, 0xE_0000) }.unwrap();
        assert!(fw.madt().is_none());
    }

    #[test]
    fn invalid_root_pointer_is_an_error() {
        let phys = Phys::default();
        assert!(matches!(
            unsafe { AcpiFirmware::locate(&phys, 0) },
            Err(RsdpError::Null)
        ));
    }
}
