use crate::i2c::ProtocolError;
use crate::memory::{AddressDomain, WindowState};

/// Operating mode of the scaler
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    #[default]
    Normal,
    /// In-system programming. Entering or leaving it resets the chip.
    Isp,
    /// Exposes the MCU's XDATA space and allows halting it
    Debug,
}

/// Outcome of a mode change.
///
/// When `chip_reset` is set the scaler went through a full internal reset as
/// part of the transition and any register state observed before it must be
/// considered gone.
#[must_use = "a mode transition may have reset the chip"]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
    pub chip_reset: bool,
}

impl Transition {
    /// True when the requested mode was already active and nothing was sent
    /// to the mode control registers
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// The control sequence needed to get from one mode to another
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Stay,
    UnlockIsp,
    DisableIsp,
    UnlockDebug,
    LockDebug,
}

impl Step {
    /// Plans a direct transition. Only transitions through `Normal` are
    /// defined; no intermediate path is ever inferred.
    pub fn plan(from: Mode, to: Mode) -> Result<Step, ProtocolError> {
        match (from, to) {
            (from, to) if from == to => Ok(Step::Stay),
            (Mode::Normal, Mode::Isp) => Ok(Step::UnlockIsp),
            (Mode::Isp, Mode::Normal) => Ok(Step::DisableIsp),
            (Mode::Normal, Mode::Debug) => Ok(Step::UnlockDebug),
            (Mode::Debug, Mode::Normal) => Ok(Step::LockDebug),
            (from, to) => Err(ProtocolError::IllegalTransition { from, to }),
        }
    }

    pub fn resets_chip(self) -> bool {
        matches!(self, Step::UnlockIsp | Step::DisableIsp)
    }
}

/// All mutable protocol state of one device handle
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolState {
    mode: Mode,
    halted: bool,
    windows: WindowState,
}

impl ProtocolState {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the MCU clock is currently frozen. Only ever true in `Debug`.
    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn windows(&self) -> &WindowState {
        &self.windows
    }

    pub(crate) fn windows_mut(&mut self) -> &mut WindowState {
        &mut self.windows
    }

    pub fn is_consistent(&self) -> bool {
        !self.halted || self.mode == Mode::Debug
    }

    /// Checks that `domain` is accessible in the current mode
    pub fn require(&self, domain: AddressDomain) -> Result<(), ProtocolError> {
        match domain.required_mode() {
            Some(required) if required != self.mode => Err(ProtocolError::WrongMode {
                domain: Some(domain),
                required,
                actual: self.mode,
            }),
            _ => Ok(()),
        }
    }

    /// Checks that the chip is in `mode` for an operation that is not tied to
    /// an address domain
    pub fn require_mode(&self, mode: Mode) -> Result<(), ProtocolError> {
        if self.mode != mode {
            return Err(ProtocolError::WrongMode {
                domain: None,
                required: mode,
                actual: self.mode,
            });
        }

        Ok(())
    }

    /// Records a completed transition. Any real mode change drops the halt
    /// flag and every known bank.
    pub(crate) fn apply(&mut self, step: Step, to: Mode) -> Transition {
        let transition = Transition {
            from: self.mode,
            to,
            chip_reset: step.resets_chip(),
        };

        if step != Step::Stay {
            *self = ProtocolState {
                mode: to,
                ..ProtocolState::default()
            };
        }

        transition
    }

    pub(crate) fn set_halted(&mut self, halted: bool) {
        debug_assert!(!halted || self.mode == Mode::Debug);
        self.halted = halted;
    }

    /// Forgets everything, e.g. after a chip reset, and assumes `mode`
    pub(crate) fn reset(&mut self, mode: Mode) {
        *self = ProtocolState {
            mode,
            ..ProtocolState::default()
        };
    }
}
