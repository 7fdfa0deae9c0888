#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use rtd_scaler::variant::Timing;
use rtd_scaler::{RtdScaler, Variant};

pub const ISP: u8 = 0x4A;
pub const DEBUG: u8 = 0x35;
pub const DDC: u8 = 0x37;

pub const EEPROM_SIZE: usize = 0x10000;
pub const XDATA_SIZE: usize = 0x10000;

/// One transfer as seen on the wire. Writes that belong to one transaction
/// are merged, like the bus would put them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Write(u8, Vec<u8>),
    Read(u8, usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FakeError(pub ErrorKind);

impl i2c::Error for FakeError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct Passthrough {
    pub address_high: u8,
    pub address_low: u8,
    pub device: u8,
    pub data_in: Vec<u8>,
    pub data_out: Vec<u8>,
    pub busy_remaining: usize,
    pub nack: bool,
}

/// Behavioural model of an RTD2719 on the bus
pub struct Chip {
    pub log: Vec<Transfer>,
    pub present: bool,
    pub isp_enabled: bool,
    pub debug_enabled: bool,
    pub halted: bool,
    pub resets: usize,
    pub xfr: [u8; 256],
    pub xdata: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub passthrough: Passthrough,
    /// Number of busy status reads before a passthrough transfer completes
    pub busy_polls: usize,
    /// Passthrough never completes
    pub stuck_busy: bool,
    /// Fail the n-th (0-based) read from the debug slave
    pub fail_debug_read_at: Option<usize>,
    /// Fail the n-th (0-based) write to the debug slave
    pub fail_debug_write_at: Option<usize>,
    pub debug_reads: usize,
    pub debug_writes: usize,
    pub status_reads: usize,
    page: u8,
    isp_pointer: u8,
    debug_pointer: u16,
}

impl Default for Chip {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            present: true,
            isp_enabled: false,
            debug_enabled: false,
            halted: false,
            resets: 0,
            xfr: [0; 256],
            xdata: (0..XDATA_SIZE).map(|i| (i ^ (i >> 8)) as u8).collect(),
            eeprom: (0..EEPROM_SIZE).map(|i| (i * 7 + 3) as u8).collect(),
            passthrough: Passthrough::default(),
            busy_polls: 0,
            stuck_busy: false,
            fail_debug_read_at: None,
            fail_debug_write_at: None,
            debug_reads: 0,
            debug_writes: 0,
            status_reads: 0,
            page: 0,
            isp_pointer: 0,
            debug_pointer: 0,
        }
    }
}

impl Chip {
    pub fn writes_to(&self, address: u8) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter_map(|transfer| match transfer {
                Transfer::Write(a, bytes) if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Bank select writes in order, as the selected bank
    pub fn bank_selects(&self) -> Vec<u8> {
        self.writes_to(DEBUG)
            .into_iter()
            .filter(|bytes| bytes.len() == 2 && bytes[0] == 0x3C)
            .map(|bytes| bytes[1])
            .collect()
    }

    fn acknowledges(&self, address: u8) -> bool {
        self.present
            && match address {
                ISP | DDC => true,
                DEBUG => self.debug_enabled,
                _ => false,
            }
    }

    fn handle_write(&mut self, address: u8, bytes: &[u8]) -> Result<(), FakeError> {
        self.log.push(Transfer::Write(address, bytes.to_vec()));

        if !self.acknowledges(address) {
            return Err(FakeError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            )));
        }

        match address {
            ISP => self.isp_write(bytes),
            DDC => {
                if bytes == [0x71, 0x81, 0xAA, 0xFF] {
                    self.debug_enabled = true;
                }
            }
            DEBUG => {
                let n = self.debug_writes;
                self.debug_writes += 1;

                if self.fail_debug_write_at == Some(n) {
                    return Err(FakeError(ErrorKind::Bus));
                }

                self.debug_write(bytes)
            }
            _ => unreachable!(),
        }

        Ok(())
    }

    fn isp_write(&mut self, bytes: &[u8]) {
        match bytes {
            [0x6F, value] => {
                self.isp_enabled = value & 0x80 != 0;
                self.resets += 1;
            }
            [0xEE, 0x03] => {
                self.resets += 1;
                self.isp_enabled = false;
                self.debug_enabled = false;
                self.halted = false;
            }
            [0xF1, value] => self.passthrough.address_high = *value,
            [0xF2, value] => self.passthrough.address_low = *value,
            [0xF3, value] => self.passthrough.device = *value,
            [0xF4, control] => self.start_passthrough(*control),
            [0xF6, data @ ..] if !data.is_empty() => {
                self.passthrough.data_in = data.to_vec()
            }
            [register] => self.isp_pointer = *register,
            [register, data @ ..] => {
                for (i, value) in data.iter().enumerate() {
                    self.xfr[(*register as usize + i) & 0xFF] = *value;
                }
            }
            [] => {}
        }
    }

    fn debug_write(&mut self, bytes: &[u8]) {
        match bytes {
            [0x71, 0x00] => {
                self.debug_enabled = false;
            }
            [0x80, value] => self.halted = *value == 0x01,
            [0x3C, bank] => self.page = *bank,
            [0x3A, offset] => {
                self.debug_pointer = u16::from_be_bytes([self.page, *offset]);
            }
            [0x3B, offset, data @ ..] => {
                let start = u16::from_be_bytes([self.page, *offset]) as usize;
                for (i, value) in data.iter().enumerate() {
                    self.xdata[(start + i) % XDATA_SIZE] = *value;
                }
            }
            other => panic!("unexpected debug write {:02x?}", other),
        }
    }

    fn start_passthrough(&mut self, control: u8) {
        if control & 0x01 == 0 {
            return;
        }

        let write = control & 0x02 != 0;
        let len = (control >> 4) as usize + 1;
        let address =
            u16::from_be_bytes([self.passthrough.address_high, self.passthrough.address_low])
                as usize;

        self.passthrough.nack = self.passthrough.device != 0xA0;
        self.passthrough.busy_remaining = self.busy_polls;

        if self.passthrough.nack {
            return;
        }

        if write {
            for i in 0..len {
                self.eeprom[(address + i) % EEPROM_SIZE] = self.passthrough.data_in[i];
            }
        } else {
            self.passthrough.data_out = (0..len)
                .map(|i| self.eeprom[(address + i) % EEPROM_SIZE])
                .collect();
        }
    }

    fn handle_read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), FakeError> {
        self.log.push(Transfer::Read(address, buf.len()));

        if !self.acknowledges(address) {
            return Err(FakeError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            )));
        }

        match address {
            ISP => self.isp_read(buf),
            DEBUG => {
                let n = self.debug_reads;
                self.debug_reads += 1;

                if self.fail_debug_read_at == Some(n) {
                    return Err(FakeError(ErrorKind::Bus));
                }

                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.xdata[(self.debug_pointer as usize + i) % XDATA_SIZE];
                }
            }
            _ => buf.fill(0),
        }

        Ok(())
    }

    fn isp_read(&mut self, buf: &mut [u8]) {
        match self.isp_pointer {
            0x6F => buf[0] = if self.isp_enabled { 0x80 } else { 0x00 },
            0xF5 => {
                self.status_reads += 1;

                buf[0] = if self.stuck_busy {
                    0x01
                } else if self.passthrough.busy_remaining > 0 {
                    self.passthrough.busy_remaining -= 1;
                    0x01
                } else if self.passthrough.nack {
                    0x02
                } else {
                    0x00
                };
            }
            0xF6 => {
                let n = buf.len().min(self.passthrough.data_out.len());
                buf[..n].copy_from_slice(&self.passthrough.data_out[..n]);
            }
            pointer => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.xfr[(pointer as usize + i) & 0xFF];
                }
            }
        }
    }
}

/// Bus handle given to the driver. Clones share the same chip so a test can
/// keep one to inspect and poke the model.
#[derive(Clone, Default)]
pub struct FakeScaler(Rc<RefCell<Chip>>);

impl FakeScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chip(&self) -> RefMut<'_, Chip> {
        self.0.borrow_mut()
    }

    pub fn log(&self) -> Vec<Transfer> {
        self.0.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.0.borrow_mut().log.clear();
    }
}

impl ErrorType for FakeScaler {
    type Error = FakeError;
}

impl I2c for FakeScaler {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut chip = self.0.borrow_mut();
        let mut pending: Vec<u8> = Vec::new();

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => pending.extend_from_slice(bytes),
                Operation::Read(buf) => {
                    if !pending.is_empty() {
                        let bytes = std::mem::take(&mut pending);
                        chip.handle_write(address, &bytes)?;
                    }
                    chip.handle_read(address, buf)?;
                }
            }
        }

        if !pending.is_empty() {
            chip.handle_write(address, &pending)?;
        }

        Ok(())
    }
}

/// Records how long the driver asked to wait
#[derive(Debug, Default)]
pub struct FakeDelay {
    pub total_ns: u64,
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

pub fn variant() -> Variant {
    Variant::RTD2719.with_timing(Timing::NONE)
}

/// A driver on a fresh fake chip, plus a handle to that chip
pub fn scaler() -> (RtdScaler<FakeScaler>, FakeScaler) {
    let fake = FakeScaler::new();
    (RtdScaler::new(fake.clone(), variant()), fake)
}
