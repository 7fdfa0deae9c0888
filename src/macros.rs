macro_rules! impl_to_from_u8 {
    ($ident:ident) => {
        impl From<$ident> for u8 {
            fn from(reg: $ident) -> Self {
                reg.0
            }
        }

        impl From<u8> for $ident {
            fn from(int: u8) -> Self {
                Self(int)
            }
        }
    };
}

/// Forwards to `defmt::trace!` when the `defmt` feature is enabled
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    };
}

/// Forwards to `defmt::debug!` when the `defmt` feature is enabled
macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
    };
}

pub(crate) use debug;
pub(crate) use impl_to_from_u8;
pub(crate) use trace;
