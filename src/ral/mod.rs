//! A RAL-like module for the DMA engine and its UART collaborator
//!
//! Register blocks are `#[repr(C)]` structs of `ral-registers` cells. Each
//! register that has fields gets a module of the same name, holding one
//! module per field with `offset` and `mask` constants, so that the
//! `read_reg!` and `write_reg!` macros work on them.

#![allow(
    non_snake_case, // Compatibility with RAL
    non_upper_case_globals, // Compatibility with RAL
)]

pub mod dma;
pub mod uart;

pub use ral_registers::{read_reg, write_reg};
use ral_registers::{RORegister, RWRegister, WORegister};

/// Base address of the DMA engine register file
pub const DMA_BASE: u32 = 0x5000_0000;

/// Trap cause code of the DMA completion interrupt
///
/// Also the bit position of the engine's line in `mie`.
pub const DMA_IRQ_CAUSE: u32 = 19;

//
// Helper types for static memory
//
// Similar to the RAL's `Instance` type, but more copy.
//

pub(crate) struct Static<T>(pub(crate) *const T);
impl<T> core::ops::Deref for Static<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // Safety: pointer points to static memory (peripheral memory)
        unsafe { &*self.0 }
    }
}
impl<T> Clone for Static<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Static<T> {}

impl<T> Static<T> {
    /// Returns the bus address of the register block
    pub(crate) fn address(self) -> u32 {
        self.0 as usize as u32
    }
}
