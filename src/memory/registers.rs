use arbitrary_int::u4;
use bitfield::bitfield;

use crate::impl_to_from_u8;

bitfield! {
    /// ISP control register on the ISP slave. Writing `isp_en` moves the chip
    /// in or out of ISP mode, which resets it.
    pub struct IspControlRegister(u8);
    impl Debug;
    u8;
    pub isp_en, set_isp_en: 7;
}

impl_to_from_u8!(IspControlRegister);

bitfield! {
    /// Starts an EEPROM passthrough transfer
    #[derive(Clone, Copy)]
    pub struct PassthroughControlRegister(u8);
    impl Debug;
    u8;
    pub start, set_start: 0;
    pub write, set_write: 1;
    _length, _set_length: 7, 4;
}

impl PassthroughControlRegister {
    /// Encodes a transfer of `len` bytes (1..=16) in the given direction with
    /// the start bit set
    pub fn transfer(write: bool, len: usize) -> Self {
        let mut control = Self(0);

        control.set_start(true);
        control.set_write(write);
        control.set_length(u4::new((len.clamp(1, 16) - 1) as u8));

        control
    }

    /// Transfer length minus one
    pub fn length(&self) -> u4 {
        u4::new(self._length())
    }

    pub fn set_length(&mut self, length: u4) {
        self._set_length(length.value())
    }

    /// Number of bytes moved by the transfer
    pub fn transfer_len(&self) -> usize {
        self.length().value() as usize + 1
    }
}

impl_to_from_u8!(PassthroughControlRegister);

bitfield! {
    pub struct PassthroughStatusRegister(u8);
    impl Debug;
    u8;
    /// Transfer still in flight
    pub busy, _: 0;
    /// The EEPROM did not acknowledge the last transfer
    pub nack, _: 1;
}

impl_to_from_u8!(PassthroughStatusRegister);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isp_enable_bit() {
        assert!(IspControlRegister(0x80).isp_en());
        assert!(!IspControlRegister(0x7F).isp_en());

        let mut control = IspControlRegister(0);
        control.set_isp_en(true);
        assert_eq!(u8::from(control), 0x80);
    }

    #[test]
    fn passthrough_control_encoding() {
        let read = PassthroughControlRegister::transfer(false, 8);
        assert_eq!(u8::from(read), 0x71);
        assert_eq!(read.transfer_len(), 8);

        let write = PassthroughControlRegister::transfer(true, 1);
        assert_eq!(u8::from(write), 0x03);
        assert_eq!(write.length(), u4::new(0));
    }

    #[test]
    fn passthrough_status_bits() {
        let status = PassthroughStatusRegister::from(0x03);
        assert!(status.busy());
        assert!(status.nack());
        assert!(!PassthroughStatusRegister::from(0x00).busy());
    }
}
