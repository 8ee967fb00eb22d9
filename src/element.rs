//! DMA element types

use crate::TransferSize;

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u32 {}
}

/// An element that the DMA engine can move
///
/// The engine moves bytes and 32-bit words.
pub trait Element: Copy + private::Sealed {
    /// The engine's transfer size for this element
    const SIZE: TransferSize;
}

impl Element for u8 {
    const SIZE: TransferSize = TransferSize::Byte;
}

impl Element for u32 {
    const SIZE: TransferSize = TransferSize::Word;
}
