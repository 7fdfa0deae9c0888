//! Per-chip constant tables.
//!
//! The scaler protocol is undocumented and was reverse engineered, so every
//! magic value the driver puts on the bus lives here rather than in the
//! protocol logic. A new chip revision should only need a new [`Variant`].

/// One of the I2C slaves the scaler answers on
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Target {
    /// ISP slave, always acknowledges
    Isp,
    /// Debug slave, only acknowledges in debug mode
    Debug,
    /// DDC/CI slave, used to unlock debug mode
    Ddc,
}

/// 7-bit slave addresses
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusAddresses {
    pub isp: u8,
    pub debug: u8,
    pub ddc: u8,
}

impl BusAddresses {
    pub fn of(&self, target: Target) -> u8 {
        match target {
            Target::Isp => self.isp,
            Target::Debug => self.debug,
            Target::Ddc => self.ddc,
        }
    }
}

/// A single raw write; the first byte is the register address
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ControlWrite {
    pub target: Target,
    pub bytes: &'static [u8],
}

/// Write sequences that trigger the mode transitions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModeSequences {
    /// Normal -> ISP. Resets the chip.
    pub isp_unlock: &'static [ControlWrite],
    /// ISP -> Normal. Resets the chip.
    pub isp_disable: &'static [ControlWrite],
    /// Normal -> Debug
    pub debug_unlock: &'static [ControlWrite],
    /// Debug -> Normal
    pub debug_lock: &'static [ControlWrite],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IspRegisters {
    /// Holds the ISP enable bit, see [`crate::memory::registers::IspControlRegister`]
    pub control: u8,
    /// Resets both the MCU and the scaler core
    pub reset: ControlWrite,
    /// Largest number of transfer registers moved per transaction
    pub burst: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DebugRegisters {
    pub halt: u8,
    pub halt_value: u8,
    pub resume_value: u8,
    /// Selects which 256 byte bank of XDATA the offset byte refers to
    pub bank_select: u8,
    pub xdata_read: u8,
    pub xdata_write: u8,
    /// Largest number of XDATA bytes moved per transaction
    pub burst: usize,
}

/// Registers used to relay transfers to the EEPROM behind the scaler
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EepromPassthrough {
    /// Slave the passthrough registers live on
    pub target: Target,
    pub address_high: u8,
    pub address_low: u8,
    /// Holds the EEPROM's own 8-bit I2C address
    pub device: u8,
    pub device_address: u8,
    pub control: u8,
    pub status: u8,
    pub data: u8,
    /// Bytes per transfer. Also the EEPROM write page size, so it should be
    /// a power of two no larger than [`EepromPassthrough::MAX_BURST`]. See
    /// [`EepromPassthrough::transfer_size`] for what is actually used.
    pub burst: usize,
    /// Status reads before giving up on a transfer
    pub poll_attempts: u16,
}

impl EepromPassthrough {
    /// Longest transfer the control register's length field can encode
    pub const MAX_BURST: usize = 16;

    /// Bytes moved per transfer: `burst` limited to what the control register
    /// encodes and rounded down to a power of two, so page writes never
    /// straddle an EEPROM page
    pub fn transfer_size(&self) -> usize {
        let burst = self.burst.clamp(1, Self::MAX_BURST);

        1 << burst.ilog2()
    }
}

/// Delays, all in microseconds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Before and after the debug mode switch
    pub mode_settle_us: u32,
    /// Before and after halting or resuming the MCU
    pub halt_settle_us: u32,
    /// After each chunk touched while the MCU is running
    pub live_settle_us: u32,
    /// Between two reads of the passthrough status register
    pub poll_interval_us: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: &'static str,
    pub addresses: BusAddresses,
    pub sequences: ModeSequences,
    pub isp: IspRegisters,
    pub debug: DebugRegisters,
    pub eeprom: EepromPassthrough,
    pub timing: Timing,
}

impl Variant {
    /// RTD2719 and the scalers sharing its debug interface.
    ///
    /// The slave addresses, mode sequences, halt register and XDATA pointer
    /// registers are observed values. The XDATA bank select register (0x3C)
    /// and the whole passthrough block (0xF1..=0xF6 on the ISP slave) are
    /// placeholders, not values observed on an RTD2719. The chip itself takes
    /// a three byte XDATA pointer (`[0x3A, low, high]`) and relays EEPROM
    /// transfers through debug slave commands 0x44/0x04, neither of which
    /// fits this register model. Override them before talking to hardware.
    pub const RTD2719: Self = Self {
        name: "RTD2719",
        addresses: BusAddresses {
            isp: 0x94 >> 1,
            debug: 0x6A >> 1,
            ddc: 0x6E >> 1,
        },
        sequences: ModeSequences {
            isp_unlock: &[ControlWrite {
                target: Target::Isp,
                bytes: &[0x6F, 0x80],
            }],
            isp_disable: &[ControlWrite {
                target: Target::Isp,
                bytes: &[0x6F, 0x00],
            }],
            // 0x71 0x82 0x77 0xAA 0xFF is accepted as well
            debug_unlock: &[ControlWrite {
                target: Target::Ddc,
                bytes: &[0x71, 0x81, 0xAA, 0xFF],
            }],
            debug_lock: &[ControlWrite {
                target: Target::Debug,
                bytes: &[0x71, 0x00],
            }],
        },
        isp: IspRegisters {
            control: 0x6F,
            reset: ControlWrite {
                target: Target::Isp,
                bytes: &[0xEE, 0x03],
            },
            burst: 1,
        },
        debug: DebugRegisters {
            halt: 0x80,
            halt_value: 0x01,
            resume_value: 0x00,
            bank_select: 0x3C,
            xdata_read: 0x3A,
            xdata_write: 0x3B,
            burst: 1,
        },
        eeprom: EepromPassthrough {
            target: Target::Isp,
            address_high: 0xF1,
            address_low: 0xF2,
            device: 0xF3,
            device_address: 0xA0,
            control: 0xF4,
            status: 0xF5,
            data: 0xF6,
            burst: 8,
            poll_attempts: 10,
        },
        timing: Timing {
            mode_settle_us: 50_000,
            halt_settle_us: 100_000,
            live_settle_us: 10_000,
            poll_interval_us: 2_000,
        },
    };

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_xdata_burst(mut self, burst: usize) -> Self {
        self.debug.burst = burst.max(1);
        self
    }

    pub fn with_isp_burst(mut self, burst: usize) -> Self {
        self.isp.burst = burst.max(1);
        self
    }

    /// Sets the passthrough transfer and page size. Rounded down to a power
    /// of two no larger than [`EepromPassthrough::MAX_BURST`].
    pub fn with_eeprom_burst(mut self, burst: usize) -> Self {
        self.eeprom.burst = burst;
        self.eeprom.burst = self.eeprom.transfer_size();
        self
    }

    pub fn with_poll_attempts(mut self, poll_attempts: u16) -> Self {
        self.eeprom.poll_attempts = poll_attempts.max(1);
        self
    }

    /// Address of the EEPROM behind the scaler, in 8-bit form (0xA0 for the
    /// usual 24Cxx wiring)
    pub fn with_eeprom_device_address(mut self, device_address: u8) -> Self {
        self.eeprom.device_address = device_address;
        self
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::RTD2719
    }
}

impl Timing {
    /// No delays at all, for buses where the other side never needs time to
    /// settle (simulators, tests)
    pub const NONE: Self = Self {
        mode_settle_us: 0,
        halt_settle_us: 0,
        live_settle_us: 0,
        poll_interval_us: 0,
    };
}
