//! # ACPI Table Discovery for Multi-Processor Bring-up
//!
//! This crate locates and parses the firmware tables the kernel needs before
//! it can start the other cores: the root pointer handed over by UEFI, the
//! root table that lists every other table, and the MADT (Multiple APIC
//! Description Table) that enumerates the local interrupt controllers, one per
//! physical core.
//!
//! ## Architecture
//!
//! ```text
//! UEFI/BIOS Firmware
//!     ↓
//! RSDP/XSDP (Root System Description Pointer)     rsdp::AcpiRoots
//!     ↓
//! RSDT/XSDT (Root/Extended System Description)    AcpiRoots::find_table
//!     ↓
//! MADT ("APIC")                                   madt::Madt
//!     ↓
//! Interrupt controller sub-entries                madt::MadtEntries / madt::LocalApic
//! ```
//!
//! ## Physical Memory Access
//!
//! Firmware tables live in physical memory. The [`PhysMapRo`] trait lets the
//! caller decide how a physical range becomes readable (identity map, HHDM
//! offset, temporary mapping), so the parsers here never assume a memory
//! layout. Once a table has been mapped, the parsers operate on plain byte
//! slices, which is also what the host tests feed them.
//!
//! ## Validation Strategy
//!
//! * **Signatures**: `"RSD PTR "`, `"XSDT"`/`"RSDT"` and the requested table signature.
//! * **Checksums**: the RSDP (first 20 bytes), the XSDP (whole structure) and every
//!   table header sum to zero.
//! * **Bounds**: header lengths are checked against the mapped buffer, and every
//!   MADT sub-entry must stay inside its table.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_acpi::{PhysMapRo, madt::{Madt, MADT_SIGNATURE}, rsdp::AcpiRoots};
//!
//! struct Hhdm;
//! impl PhysMapRo for Hhdm {
//!     unsafe fn map_ro<'a>(&self, paddr: u64, len: usize) -> &'a [u8] {
//!         # unimplemented!()
//!     }
//! }
//!
//! let roots = unsafe { AcpiRoots::parse(&Hhdm, 0x7FF7_E014) }.expect("valid RSDP");
//! let bytes = unsafe { roots.find_table(&Hhdm, &MADT_SIGNATURE) }.expect("MADT present");
//! let madt = Madt::parse(bytes).expect("well-formed MADT");
//! for lapic in madt.local_apics() {
//!     println!("LAPIC id {}", lapic.apic_id);
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod madt;
pub mod rsdp;
pub mod sdt;

/// Map a physical region and return a *read-only* byte slice for its contents.
/// You provide the implementation (identity map, kmap, etc.).
pub trait PhysMapRo {
    /// # Safety
    /// The implementor must ensure the returned slice is valid for `len` bytes.
    unsafe fn map_ro<'a>(&self, paddr: u64, len: usize) -> &'a [u8];
}

/// Byte-wise wrapping sum; a valid ACPI structure sums to zero.
fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |a, &b| a.wrapping_add(b))
}
