use core::fmt;

use crate::memory::AddressDomain;

const COLUMNS: usize = 16;

/// Renders bytes read from the scaler as a hex grid, 16 bytes per row, each
/// row labelled with the address of its first byte
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HexDump<'a> {
    start: u32,
    digits: usize,
    data: &'a [u8],
}

impl<'a> HexDump<'a> {
    pub fn new(domain: AddressDomain, start: u16, data: &'a [u8]) -> Self {
        Self {
            start: start as u32,
            digits: domain.address_digits(),
            data,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, bytes) in self.data.chunks(COLUMNS).enumerate() {
            let address = self.start + (row * COLUMNS) as u32;
            write!(f, "{:0width$x}:", address, width = self.digits)?;

            for column in 0..COLUMNS {
                match bytes.get(column) {
                    Some(byte) => write!(f, " {:02x}", byte)?,
                    None => f.write_str("   ")?,
                }
            }

            f.write_str("  |")?;
            for &byte in bytes {
                let c = if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    '.'
                };
                write!(f, "{}", c)?;
            }
            f.write_str("|\n")?;
        }

        Ok(())
    }
}
