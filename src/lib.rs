#![cfg_attr(not(test), no_std)]

pub(crate) mod macros;
pub(crate) use macros::*;

pub mod dump;
pub mod i2c;
pub mod memory;
pub mod mode;
pub mod variant;

pub use dump::HexDump;
pub use i2c::Error;
pub use i2c::ProtocolError;
pub use i2c::RtdScaler;
pub use memory::AddressDomain;
pub use mode::{Mode, Transition};
pub use variant::Variant;
