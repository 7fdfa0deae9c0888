pub mod registers;

use num_enum::IntoPrimitive;

use crate::mode::Mode;

/// Number of bytes addressable by the one-byte offset of a single data
/// transaction. Larger spaces are reached through bank selection.
pub const WINDOW_SIZE: usize = 256;

/// The address spaces reachable through the scaler
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AddressDomain {
    /// ISP transfer registers, 0x00..=0xFF, ISP mode only
    IspTransfer = 0,
    /// Internal MCU data memory, 0x0000..=0xFFFF, Debug mode only
    Xdata = 1,
    /// Configuration EEPROM behind the scaler, 0x0000..=0xFFFF, any mode
    Eeprom = 2,
}

impl AddressDomain {
    /// Highest valid address in the domain
    pub const fn end_address(self) -> u16 {
        match self {
            AddressDomain::IspTransfer => 0xFF,
            AddressDomain::Xdata | AddressDomain::Eeprom => 0xFFFF,
        }
    }

    /// The mode the chip has to be in for the domain to be accessible, or
    /// `None` if it is reachable from every mode
    pub const fn required_mode(self) -> Option<Mode> {
        match self {
            AddressDomain::IspTransfer => Some(Mode::Isp),
            AddressDomain::Xdata => Some(Mode::Debug),
            AddressDomain::Eeprom => None,
        }
    }

    /// Whether accesses to this domain go through bank selection
    pub const fn is_windowed(self) -> bool {
        matches!(self, AddressDomain::Xdata)
    }

    /// Number of hex digits used for row addresses when dumping the domain
    pub const fn address_digits(self) -> usize {
        match self {
            AddressDomain::IspTransfer => 2,
            AddressDomain::Xdata | AddressDomain::Eeprom => 4,
        }
    }
}

/// Calculates whether `[address, address + length)` lies inside the domain
/// without making any IO calls. An empty range is valid at any address of the
/// domain.
pub fn is_valid_range(domain: AddressDomain, address: u16, length: usize) -> bool {
    let end = domain.end_address() as usize;

    address as usize <= end
        && (address as usize)
            .checked_add(length)
            .is_some_and(|limit| limit <= end + 1)
}

/// One piece of a larger access that fits inside a single window and a
/// single bus transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Bank (address >> 8) the chunk lives in
    pub bank: u8,
    /// Offset of the first byte inside the bank
    pub offset: u8,
    /// Position of the first byte in the caller's buffer
    pub index: usize,
    /// Number of bytes in the chunk
    pub len: usize,
}

impl Chunk {
    pub fn address(&self) -> u16 {
        u16::from_be_bytes([self.bank, self.offset])
    }

    /// The slice of the caller's buffer covered by this chunk
    pub fn range(&self) -> core::ops::Range<usize> {
        self.index..self.index + self.len
    }
}

/// Splits an access into chunks, in ascending address order, such that no
/// chunk crosses a bank boundary or exceeds `burst` bytes.
///
/// The caller is expected to have validated the range with
/// [`is_valid_range`] first.
#[derive(Debug, Clone)]
pub struct Chunks {
    address: usize,
    index: usize,
    remaining: usize,
    burst: usize,
    boundary: usize,
}

impl Chunks {
    pub fn new(address: u16, length: usize, burst: usize) -> Self {
        Self {
            address: address as usize,
            index: 0,
            remaining: length,
            burst: burst.clamp(1, WINDOW_SIZE),
            boundary: WINDOW_SIZE,
        }
    }

    /// Like [`Chunks::new`], but chunks additionally never cross a
    /// `burst`-aligned boundary. Used for EEPROM page writes, so `burst`
    /// should be a power of two.
    pub fn aligned(address: u16, length: usize, burst: usize) -> Self {
        let chunks = Self::new(address, length, burst);

        Self {
            boundary: chunks.burst,
            ..chunks
        }
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining == 0 {
            return None;
        }

        let len = self
            .remaining
            .min(self.boundary - self.address % self.boundary)
            .min(WINDOW_SIZE - self.address % WINDOW_SIZE)
            .min(self.burst);

        let chunk = Chunk {
            bank: (self.address / WINDOW_SIZE) as u8,
            offset: (self.address % WINDOW_SIZE) as u8,
            index: self.index,
            len,
        };

        self.address += len;
        self.index += len;
        self.remaining -= len;

        Some(chunk)
    }
}

/// The bank last written to the device for each windowed domain. `None`
/// means unknown, which forces the next access to select its bank.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WindowState {
    banks: [Option<u8>; 3],
}

impl WindowState {
    pub fn bank(&self, domain: AddressDomain) -> Option<u8> {
        self.banks[u8::from(domain) as usize]
    }

    /// Whether a bank select has to be issued before accessing `bank`
    pub fn needs_select(&self, domain: AddressDomain, bank: u8) -> bool {
        domain.is_windowed() && self.bank(domain) != Some(bank)
    }

    pub fn record(&mut self, domain: AddressDomain, bank: u8) {
        self.banks[u8::from(domain) as usize] = Some(bank);
    }

    pub fn invalidate(&mut self, domain: AddressDomain) {
        self.banks[u8::from(domain) as usize] = None;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
