#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(not(feature = "async"))]
use embedded_hal::i2c::I2c;

#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::i2c::I2c;

use embedded_hal::i2c::{Error as _, ErrorKind, Operation};

use crate::dump::HexDump;
use crate::memory::registers::{
    IspControlRegister, PassthroughControlRegister, PassthroughStatusRegister,
};
use crate::memory::{is_valid_range, AddressDomain, Chunk, Chunks};
use crate::mode::{Mode, ProtocolState, Step, Transition};
use crate::variant::{ControlWrite, Target, Variant};
use crate::{debug, trace};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The operation needs the chip in `required` but it is in `actual`.
    /// Nothing was sent on the bus.
    WrongMode {
        domain: Option<AddressDomain>,
        required: Mode,
        actual: Mode,
    },
    /// There is no direct path between the two modes; go through `Normal`
    IllegalTransition { from: Mode, to: Mode },
    /// The EEPROM passthrough stayed busy for the whole poll budget. The
    /// transfer is left as is.
    Timeout { address: u16, attempts: u16 },
    /// The access does not fit inside the domain
    OutOfRange {
        domain: AddressDomain,
        address: u16,
        length: usize,
    },
    /// The EEPROM did not acknowledge a passthrough transfer
    EepromNack { address: u16 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An I2C transfer to one of the scaler's slaves failed. `domain` and
    /// `address` locate the chunk being moved when the failure happened
    /// during a memory access.
    Transport {
        target: Target,
        kind: ErrorKind,
        domain: Option<AddressDomain>,
        address: Option<u16>,
    },
    /// The ISP slave did not answer when opening the device
    NotReachable,
    Protocol(ProtocolError),
}

impl Error {
    /// Attaches the access a transport failure happened in
    fn at(self, domain: AddressDomain, address: u16) -> Self {
        match self {
            Error::Transport { target, kind, .. } => Error::Transport {
                target,
                kind,
                domain: Some(domain),
                address: Some(address),
            },
            other => other,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        Error::Protocol(error)
    }
}

fn transport<E: embedded_hal::i2c::Error>(target: Target) -> impl Fn(E) -> Error {
    move |error| Error::Transport {
        target,
        kind: error.kind(),
        domain: None,
        address: None,
    }
}

/// Handle to one scaler. Owns the bus and all protocol state (mode, halt
/// flag, selected banks); every operation takes `&mut self`, so sharing a
/// handle between callers needs an external lock held for the whole
/// multi-step operation.
pub struct RtdScaler<I2C> {
    i2c: I2C,
    variant: Variant,
    state: ProtocolState,
}

#[cfg_attr(not(feature = "async"), maybe_async::maybe_async)]
impl<I2C> RtdScaler<I2C>
where
    I2C: I2c,
{
    /// Wraps an I2C bus without touching it. The chip is assumed to be in
    /// normal mode; use [`RtdScaler::probe_mode`] if that may not hold.
    pub fn new(i2c: I2C, variant: Variant) -> RtdScaler<I2C> {
        Self {
            i2c,
            variant,
            state: ProtocolState::default(),
        }
    }

    /// Like [`RtdScaler::new`] but makes sure the scaler answers first. The
    /// ISP slave acknowledges in every mode.
    pub async fn open(i2c: I2C, variant: Variant) -> Result<RtdScaler<I2C>, Error> {
        let mut scaler = Self::new(i2c, variant);
        let mut probe = [0u8];

        scaler
            .i2c
            .read(variant.addresses.isp, &mut probe)
            .await
            .map_err(|_| Error::NotReachable)?;

        Ok(scaler)
    }

    /// Releases ownership of the I2C bus. All protocol state is dropped.
    pub fn free(self) -> I2C {
        self.i2c
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted()
    }

    /* Mode control */

    /// Moves the chip into `mode`. Only transitions to or from `Normal` are
    /// defined; anything else fails with
    /// [`ProtocolError::IllegalTransition`] before touching the bus.
    ///
    /// Entering or leaving ISP mode resets the chip, which is reported
    /// through [`Transition::chip_reset`]. A halted MCU is resumed before any
    /// transition, including re-entering debug mode.
    pub async fn enter(
        &mut self,
        mode: Mode,
        delay: &mut impl DelayNs,
    ) -> Result<Transition, Error> {
        let step = Step::plan(self.state.mode(), mode)?;

        if self.state.halted() {
            self.debug_halt_mcu(false, delay).await?;
        }

        if step != Step::Stay {
            debug!("mode {} -> {}", self.state.mode(), mode);
        }

        let sequences = self.variant.sequences;
        let settle = self.variant.timing.mode_settle_us;

        let sent = match step {
            Step::Stay => Ok(()),
            Step::UnlockIsp => self.send(sequences.isp_unlock).await,
            Step::DisableIsp => self.send(sequences.isp_disable).await,
            Step::UnlockDebug | Step::LockDebug => {
                let writes = if step == Step::UnlockDebug {
                    sequences.debug_unlock
                } else {
                    sequences.debug_lock
                };

                delay.delay_us(settle).await;
                let sent = self.send(writes).await;
                delay.delay_us(settle).await;

                sent
            }
        };

        if let Err(error) = sent {
            // The chip may or may not have switched, the banks are unknown
            // either way
            self.state.windows_mut().clear();
            return Err(error);
        }

        Ok(self.state.apply(step, mode))
    }

    /// Leaves `mode` for `Normal`. Fails with [`ProtocolError::WrongMode`]
    /// if the chip is not in `mode`.
    pub async fn leave(
        &mut self,
        mode: Mode,
        delay: &mut impl DelayNs,
    ) -> Result<Transition, Error> {
        self.state.require_mode(mode)?;
        self.enter(Mode::Normal, delay).await
    }

    /// Switches ISP mode on or off. Either way the chip resets, see
    /// [`Transition::chip_reset`]. Switching off while not in ISP mode does
    /// nothing.
    pub async fn isp_enable(
        &mut self,
        on: bool,
        delay: &mut impl DelayNs,
    ) -> Result<Transition, Error> {
        match (on, self.state.mode()) {
            (true, _) => self.enter(Mode::Isp, delay).await,
            (false, Mode::Isp) => self.enter(Mode::Normal, delay).await,
            (false, mode) => Ok(self.state.apply(Step::Stay, mode)),
        }
    }

    /// Switches debug mode on or off. Switching off while halted resumes the
    /// MCU first.
    pub async fn debug_enable(
        &mut self,
        on: bool,
        delay: &mut impl DelayNs,
    ) -> Result<Transition, Error> {
        match (on, self.state.mode()) {
            (true, _) => self.enter(Mode::Debug, delay).await,
            (false, Mode::Debug) => self.enter(Mode::Normal, delay).await,
            (false, mode) => Ok(self.state.apply(Step::Stay, mode)),
        }
    }

    /// Asks the chip which mode it is in and adopts the answer, forgetting
    /// the halt flag and all selected banks.
    pub async fn probe_mode(&mut self) -> Result<Mode, Error> {
        let mut control = [0u8];
        self.read_register(Target::Isp, self.variant.isp.control, &mut control)
            .await?;

        let mode = if IspControlRegister::from(control[0]).isp_en() {
            Mode::Isp
        } else if self.debug_acknowledges().await {
            Mode::Debug
        } else {
            Mode::Normal
        };

        debug!("probed mode {}", mode);
        self.state.reset(mode);

        Ok(mode)
    }

    /// Resets the MCU and scaler core through ISP mode. ISP is re-enabled
    /// even if it already was. Afterwards the chip is back in normal mode.
    pub async fn isp_reset(&mut self, delay: &mut impl DelayNs) -> Result<Transition, Error> {
        let from = self.state.mode();
        Step::plan(from, Mode::Isp)?;

        let unlock = self.variant.sequences.isp_unlock;
        let reset = self.variant.isp.reset;

        self.send(unlock).await?;
        self.send(&[reset]).await?;
        delay.delay_us(self.variant.timing.mode_settle_us).await;

        debug!("chip reset from {}", from);
        self.state.reset(Mode::Normal);

        Ok(Transition {
            from,
            to: Mode::Normal,
            chip_reset: true,
        })
    }

    /// Halts or resumes the MCU. Debug mode only.
    pub async fn debug_halt_mcu(
        &mut self,
        halt: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.state.require_mode(Mode::Debug)?;

        let registers = self.variant.debug;
        let settle = self.variant.timing.halt_settle_us;
        let value = if halt {
            registers.halt_value
        } else {
            registers.resume_value
        };

        delay.delay_us(settle).await;
        self.write_register(Target::Debug, registers.halt, &[value])
            .await?;
        self.state.set_halted(halt);
        delay.delay_us(settle).await;

        Ok(())
    }

    /* ISP transfer registers */

    pub async fn isp_read_xfr(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Error> {
        let address = address as u16;
        self.check_access(AddressDomain::IspTransfer, address, buf.len())?;

        for chunk in Chunks::new(address, buf.len(), self.variant.isp.burst) {
            self.read_register(Target::Isp, chunk.offset, &mut buf[chunk.range()])
                .await
                .map_err(|error| error.at(AddressDomain::IspTransfer, chunk.address()))?;
        }

        Ok(())
    }

    pub async fn isp_write_xfr(&mut self, address: u8, data: &[u8]) -> Result<(), Error> {
        let address = address as u16;
        self.check_access(AddressDomain::IspTransfer, address, data.len())?;

        for chunk in Chunks::new(address, data.len(), self.variant.isp.burst) {
            self.write_register(Target::Isp, chunk.offset, &data[chunk.range()])
                .await
                .map_err(|error| error.at(AddressDomain::IspTransfer, chunk.address()))?;
        }

        Ok(())
    }

    pub async fn isp_dump_xfr<'b>(
        &mut self,
        address: u8,
        buf: &'b mut [u8],
    ) -> Result<HexDump<'b>, Error> {
        self.isp_read_xfr(address, buf).await?;

        Ok(HexDump::new(AddressDomain::IspTransfer, address as u16, buf))
    }

    /* XDATA */

    /// Reads XDATA into `buf`. With `atomic` set, the MCU is halted for the
    /// duration of the read and resumed on every exit path, so the bytes form
    /// a consistent snapshot. Without it, bytes may be torn by the running
    /// firmware.
    ///
    /// If the MCU was already halted by the caller it is left halted.
    pub async fn snapshot_read(
        &mut self,
        address: u16,
        buf: &mut [u8],
        atomic: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.check_access(AddressDomain::Xdata, address, buf.len())?;

        if buf.is_empty() {
            return Ok(());
        }

        if !atomic {
            let live = !self.state.halted();
            return self.read_xdata(address, buf, live, delay).await;
        }

        let halted_here = self.begin_halt(delay).await?;
        let result = self.read_xdata(address, buf, false, delay).await;
        let resumed = self.end_halt(halted_here, delay).await;

        result.and(resumed)
    }

    pub async fn debug_read_xdata(
        &mut self,
        address: u16,
        buf: &mut [u8],
        atomic: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.snapshot_read(address, buf, atomic, delay).await
    }

    /// Writes `data` to XDATA. With `atomic` set the MCU is halted around
    /// the whole write, as for [`RtdScaler::snapshot_read`].
    pub async fn debug_write_xdata(
        &mut self,
        address: u16,
        data: &[u8],
        atomic: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.check_access(AddressDomain::Xdata, address, data.len())?;

        if data.is_empty() {
            return Ok(());
        }

        if !atomic {
            let live = !self.state.halted();
            return self.write_xdata(address, data, live, delay).await;
        }

        let halted_here = self.begin_halt(delay).await?;
        let result = self.write_xdata(address, data, false, delay).await;
        let resumed = self.end_halt(halted_here, delay).await;

        result.and(resumed)
    }

    /// Reads a block of XDATA for display
    pub async fn debug_dump_xdata<'b>(
        &mut self,
        address: u16,
        buf: &'b mut [u8],
        halt: bool,
        delay: &mut impl DelayNs,
    ) -> Result<HexDump<'b>, Error> {
        self.snapshot_read(address, buf, halt, delay).await?;

        Ok(HexDump::new(AddressDomain::Xdata, address, buf))
    }

    /* EEPROM passthrough */

    /// Reads the EEPROM behind the scaler. Works in every mode.
    pub async fn eeprom_read(
        &mut self,
        address: u16,
        buf: &mut [u8],
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.check_access(AddressDomain::Eeprom, address, buf.len())?;

        let eeprom = self.variant.eeprom;

        for chunk in Chunks::new(address, buf.len(), eeprom.transfer_size()) {
            let at = move |error: Error| error.at(AddressDomain::Eeprom, chunk.address());

            self.passthrough(chunk, None, delay).await.map_err(at)?;
            self.read_register(eeprom.target, eeprom.data, &mut buf[chunk.range()])
                .await
                .map_err(at)?;
        }

        Ok(())
    }

    /// Writes the EEPROM behind the scaler, one page at a time. Works in
    /// every mode.
    pub async fn eeprom_write(
        &mut self,
        address: u16,
        data: &[u8],
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        self.check_access(AddressDomain::Eeprom, address, data.len())?;

        let size = self.variant.eeprom.transfer_size();

        for chunk in Chunks::aligned(address, data.len(), size) {
            self.passthrough(chunk, Some(&data[chunk.range()]), delay)
                .await
                .map_err(|error| error.at(AddressDomain::Eeprom, chunk.address()))?;
        }

        Ok(())
    }

    /// Reads a block of EEPROM for display. With `halt` set the MCU is kept
    /// off the EEPROM bus for the whole dump, which needs debug mode.
    pub async fn debug_dump_eeprom<'b>(
        &mut self,
        address: u16,
        buf: &'b mut [u8],
        halt: bool,
        delay: &mut impl DelayNs,
    ) -> Result<HexDump<'b>, Error> {
        if halt {
            self.state.require_mode(Mode::Debug)?;
        }

        self.check_access(AddressDomain::Eeprom, address, buf.len())?;

        if buf.is_empty() {
            return Ok(HexDump::new(AddressDomain::Eeprom, address, buf));
        }

        if halt {
            let halted_here = self.begin_halt(delay).await?;
            let result = self.eeprom_read(address, buf, delay).await;
            let resumed = self.end_halt(halted_here, delay).await;

            result.and(resumed)?;
        } else {
            self.eeprom_read(address, buf, delay).await?;
        }

        Ok(HexDump::new(AddressDomain::Eeprom, address, buf))
    }

    /* Windowed access */

    fn check_access(
        &self,
        domain: AddressDomain,
        address: u16,
        length: usize,
    ) -> Result<(), ProtocolError> {
        self.state.require(domain)?;

        if !is_valid_range(domain, address, length) {
            return Err(ProtocolError::OutOfRange {
                domain,
                address,
                length,
            });
        }

        Ok(())
    }

    /// Issues a bank select unless the device already has `bank` selected
    async fn select_bank(&mut self, domain: AddressDomain, bank: u8) -> Result<(), Error> {
        if !self.state.windows().needs_select(domain, bank) {
            return Ok(());
        }

        trace!("select {} bank {:#x}", domain, bank);

        // Unknown until the write is known to have landed
        self.state.windows_mut().invalidate(domain);
        self.write_register(Target::Debug, self.variant.debug.bank_select, &[bank])
            .await?;
        self.state.windows_mut().record(domain, bank);

        Ok(())
    }

    async fn read_xdata(
        &mut self,
        address: u16,
        buf: &mut [u8],
        live: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        let registers = self.variant.debug;
        let settle = self.variant.timing.live_settle_us;

        for chunk in Chunks::new(address, buf.len(), registers.burst) {
            let at = move |error: Error| error.at(AddressDomain::Xdata, chunk.address());

            self.select_bank(AddressDomain::Xdata, chunk.bank)
                .await
                .map_err(at)?;
            self.write(Target::Debug, &[registers.xdata_read, chunk.offset])
                .await
                .map_err(at)?;

            if live {
                delay.delay_us(settle).await;
            }

            self.read(Target::Debug, &mut buf[chunk.range()])
                .await
                .map_err(at)?;
        }

        Ok(())
    }

    async fn write_xdata(
        &mut self,
        address: u16,
        data: &[u8],
        live: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        let registers = self.variant.debug;
        let settle = self.variant.timing.live_settle_us;

        for chunk in Chunks::new(address, data.len(), registers.burst) {
            let at = move |error: Error| error.at(AddressDomain::Xdata, chunk.address());

            self.select_bank(AddressDomain::Xdata, chunk.bank)
                .await
                .map_err(at)?;
            self.write_prefixed(
                Target::Debug,
                &[registers.xdata_write, chunk.offset],
                &data[chunk.range()],
            )
            .await
            .map_err(at)?;

            if live {
                delay.delay_us(settle).await;
            }
        }

        Ok(())
    }

    /* Halt scopes */

    /// Halts the MCU unless it already is. Returns whether it was halted
    /// here and so has to be resumed by [`RtdScaler::end_halt`].
    async fn begin_halt(&mut self, delay: &mut impl DelayNs) -> Result<bool, Error> {
        if self.state.halted() {
            return Ok(false);
        }

        self.debug_halt_mcu(true, delay).await?;

        Ok(true)
    }

    async fn end_halt(&mut self, halted_here: bool, delay: &mut impl DelayNs) -> Result<(), Error> {
        if !halted_here {
            return Ok(());
        }

        self.debug_halt_mcu(false, delay).await
    }

    /* Passthrough */

    /// Loads the pointer registers, starts one transfer and waits for it.
    /// `data` is the payload for writes, `None` for reads.
    async fn passthrough(
        &mut self,
        chunk: Chunk,
        data: Option<&[u8]>,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        let eeprom = self.variant.eeprom;
        let target = eeprom.target;

        self.write_register(target, eeprom.address_high, &[chunk.bank])
            .await?;
        self.write_register(target, eeprom.address_low, &[chunk.offset])
            .await?;
        self.write_register(target, eeprom.device, &[eeprom.device_address])
            .await?;

        if let Some(data) = data {
            self.write_register(target, eeprom.data, data).await?;
        }

        let control = PassthroughControlRegister::transfer(data.is_some(), chunk.len);
        self.write_register(target, eeprom.control, &[control.into()])
            .await?;

        self.wait_passthrough(chunk.address(), delay).await
    }

    /// Polls the passthrough status until the transfer is done. A failed
    /// status read counts as busy, the EEPROM side may stretch the bus while
    /// committing a page.
    async fn wait_passthrough(
        &mut self,
        address: u16,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        let eeprom = self.variant.eeprom;
        let interval = self.variant.timing.poll_interval_us;
        let attempts = eeprom.poll_attempts.max(1);

        for attempt in 1..=attempts {
            let mut status = [0u8];

            if self
                .read_register(eeprom.target, eeprom.status, &mut status)
                .await
                .is_ok()
            {
                let status = PassthroughStatusRegister::from(status[0]);

                if !status.busy() {
                    if status.nack() {
                        return Err(ProtocolError::EepromNack { address }.into());
                    }

                    return Ok(());
                }
            }

            trace!("passthrough {:#x} busy ({}/{})", address, attempt, attempts);

            if attempt < attempts {
                delay.delay_us(interval).await;
            }
        }

        Err(ProtocolError::Timeout { address, attempts }.into())
    }

    /* Raw bus ops */

    async fn send(&mut self, writes: &[ControlWrite]) -> Result<(), Error> {
        for write in writes {
            self.write(write.target, write.bytes).await?;
        }

        Ok(())
    }

    async fn debug_acknowledges(&mut self) -> bool {
        let mut probe = [0u8];

        self.i2c
            .read(self.variant.addresses.debug, &mut probe)
            .await
            .is_ok()
    }

    async fn write(&mut self, target: Target, bytes: &[u8]) -> Result<(), Error> {
        let address = self.variant.addresses.of(target);

        self.i2c
            .write(address, bytes)
            .await
            .map_err(transport(target))
    }

    async fn read(&mut self, target: Target, buf: &mut [u8]) -> Result<(), Error> {
        let address = self.variant.addresses.of(target);

        self.i2c
            .read(address, buf)
            .await
            .map_err(transport(target))
    }

    async fn write_register(
        &mut self,
        target: Target,
        register: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        self.write_prefixed(target, &[register], data).await
    }

    /// One write transfer made of `prefix` immediately followed by `data`
    async fn write_prefixed(
        &mut self,
        target: Target,
        prefix: &[u8],
        data: &[u8],
    ) -> Result<(), Error> {
        let address = self.variant.addresses.of(target);

        self.i2c
            .transaction(address, &mut [Operation::Write(prefix), Operation::Write(data)])
            .await
            .map_err(transport(target))
    }

    /// Points the slave at `register`, then reads from it in a separate
    /// transfer. The scaler does not handle a repeated start here.
    async fn read_register(
        &mut self,
        target: Target,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        self.write(target, &[register]).await?;
        self.read(target, buf).await
    }
}
