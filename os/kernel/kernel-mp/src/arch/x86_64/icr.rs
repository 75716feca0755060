use bitfield_struct::bitfield;

/// x2APIC Interrupt Command Register (MSR `0x830`).
///
/// A single 64-bit write sends the interrupt. Unlike the xAPIC ICR there is
/// no delivery status bit.
#[bitfield(u64, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct InterruptCommand {
    /// Bits 0..=7: vector. For STARTUP the page number of the entry point;
    /// ignored for INIT and NMI.
    pub vector: u8,

    /// Bits 8..=10: delivery mode.
    #[bits(3)]
    pub delivery_mode: DeliveryMode,

    /// Bit 11: logical (`true`) or physical destination.
    pub logical_destination: bool,

    #[bits(2)]
    __: u8,

    /// Bit 14: level asserted. Clear only for an INIT de-assert.
    pub assert: bool,

    /// Bit 15: level (`true`) or edge triggered.
    pub level_triggered: bool,

    #[bits(2)]
    __: u8,

    /// Bits 18..=19: destination shorthand.
    #[bits(2)]
    pub shorthand: DestinationShorthand,

    #[bits(12)]
    __: u16,

    /// Bits 32..=63: x2APIC id of the target.
    pub destination: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    Fixed = 0b000,
    LowestPriority = 0b001,
    Smi = 0b010,
    Nmi = 0b100,
    Init = 0b101,
    Startup = 0b110,
}

impl DeliveryMode {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0b001 => Self::LowestPriority,
            0b010 => Self::Smi,
            0b100 => Self::Nmi,
            0b101 => Self::Init,
            0b110 => Self::Startup,
            _ => Self::Fixed,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DestinationShorthand {
    None = 0b00,
    SelfOnly = 0b01,
    AllIncludingSelf = 0b10,
    AllExcludingSelf = 0b11,
}

impl DestinationShorthand {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0b01 => Self::SelfOnly,
            0b10 => Self::AllIncludingSelf,
            0b11 => Self::AllExcludingSelf,
            _ => Self::None,
        }
    }
}

impl InterruptCommand {
    /// Physical-destination, edge-triggered, asserted command to `destination`.
    #[must_use]
    pub const fn to(destination: u32, mode: DeliveryMode, vector: u8) -> Self {
        Self::new()
            .with_destination(destination)
            .with_delivery_mode(mode)
            .with_vector(vector)
            .with_assert(true)
    }
}
