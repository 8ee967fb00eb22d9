//! DMA driver errors

use core::fmt::{self, Display};

/// Errors detected by the driver before (or around) touching the engine
///
/// The engine itself has no error reporting. Misuse of the hardware, like
/// programming it while it's busy, shows up as wrong data or a stuck busy
/// flag, never as an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The element count doesn't fit the 11-bit transfer counter
    TransferCount(usize),
    /// A byte offset doesn't fit the 8-bit offset field
    Offset(usize),
    /// The double buffer length is zero or odd
    Layout(usize),
    /// The pipeline was configured with zero windows
    NoWindows,
    /// A fill issued ahead of a compute step finished before the compute step did
    Overrun {
        /// Zero-based window whose compute step ran long
        window: usize,
    },
    /// The trap cause already has a handler
    CauseTaken(u32),
    /// The trap dispatcher has no free slots
    DispatcherFull,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TransferCount(count) => write!(
                f,
                "DMA transfer of {count} elements exceeds {max}",
                max = crate::Control::MAX_TRANSFERS
            ),
            Error::Offset(bytes) => write!(f, "DMA offset {bytes:#X} exceeds 0xFF"),
            Error::Layout(len) => {
                write!(f, "double buffer length {len} is not a non-zero even number")
            }
            Error::NoWindows => write!(f, "pipeline has no windows"),
            Error::Overrun { window } => {
                write!(f, "window {window}: fill completed before compute")
            }
            Error::CauseTaken(cause) => write!(f, "trap cause {cause} already has a handler"),
            Error::DispatcherFull => write!(f, "trap dispatcher is full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::string::ToString;

    #[test]
    fn display() {
        assert_eq!(
            Error::TransferCount(2048).to_string(),
            "DMA transfer of 2048 elements exceeds 2047"
        );
        assert_eq!(Error::Offset(256).to_string(), "DMA offset 0x100 exceeds 0xFF");
        assert_eq!(
            Error::Overrun { window: 2 }.to_string(),
            "window 2: fill completed before compute"
        );
    }
}
