//! Register access for the DMA engine
//!
//! The driver never touches memory-mapped I/O directly. It goes through
//! [`Registers`], so the same driver runs against the hardware ([`Mmio`])
//! or against a model of it.

use crate::ral::{self, Static};

/// Registers of the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// Source address
    Source,
    /// Destination address
    Destination,
    /// Control word
    Control,
    /// Condition word
    Condition,
    /// Interrupt acknowledge (read) / stop (write)
    Interrupt,
    /// Activate (write-only)
    Activate,
    /// Status (read-only)
    Status,
}

impl Register {
    /// Byte offset of the register from the engine's base address
    pub const fn offset(self) -> usize {
        match self {
            Register::Source => 0x00,
            Register::Destination => 0x04,
            Register::Control => 0x08,
            Register::Condition => 0x0C,
            Register::Interrupt => 0x10,
            Register::Activate => 0x14,
            Register::Status => 0x18,
        }
    }
}

/// Read and write access to the engine's register file
pub trait Registers {
    /// Read a register
    ///
    /// Reading [`Register::Interrupt`] has a side effect: it acknowledges
    /// a pending completion interrupt.
    fn read(&self, register: Register) -> u32;
    /// Write a register
    fn write(&self, register: Register, value: u32);
    /// Translate a CPU pointer to the address the engine uses for the same
    /// memory
    ///
    /// `len` is the size, in bytes, of the memory the engine may touch.
    /// On the target, both address spaces are the same.
    fn dma_address(&self, ptr: *const u8, len: usize) -> u32 {
        let _ = len;
        ptr as usize as u32
    }
}

impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, register: Register) -> u32 {
        (**self).read(register)
    }
    fn write(&self, register: Register, value: u32) {
        (**self).write(register, value)
    }
    fn dma_address(&self, ptr: *const u8, len: usize) -> u32 {
        (**self).dma_address(ptr, len)
    }
}

/// The engine's memory-mapped register file
pub struct Mmio {
    block: Static<ral::dma::RegisterBlock>,
}

// Safety: the register file is a fixed hardware resource. It's OK to
// share a handle to it, and every access is a single volatile load or
// store.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// Access the register file at `base`
    ///
    /// # Safety
    ///
    /// `base` must point at the engine's register file. Every `Mmio` aliases
    /// the same hardware; make sure only one driver programs it.
    pub const unsafe fn new(base: *const ()) -> Self {
        Mmio {
            block: Static(base.cast()),
        }
    }

    /// Access the register file at [`DMA_BASE`](crate::DMA_BASE)
    ///
    /// # Safety
    ///
    /// See [`new`](Mmio::new).
    pub const unsafe fn instance() -> Self {
        Self::new(ral::DMA_BASE as usize as *const ())
    }
}

impl Registers for Mmio {
    fn read(&self, register: Register) -> u32 {
        let block = self.block;
        match register {
            Register::Source => ral::read_reg!(crate::ral::dma, block, SRC),
            Register::Destination => ral::read_reg!(crate::ral::dma, block, DST),
            Register::Control => ral::read_reg!(crate::ral::dma, block, CTRL),
            Register::Condition => ral::read_reg!(crate::ral::dma, block, COND),
            Register::Interrupt => ral::read_reg!(crate::ral::dma, block, IRQ),
            // Write-only.
            Register::Activate => 0,
            Register::Status => ral::read_reg!(crate::ral::dma, block, STATUS),
        }
    }

    fn write(&self, register: Register, value: u32) {
        // Immutable writes OK. Each is a single 32-bit store, and there is
        // one logical owner of the engine.
        let block = self.block;
        match register {
            Register::Source => ral::write_reg!(crate::ral::dma, block, SRC, value),
            Register::Destination => ral::write_reg!(crate::ral::dma, block, DST, value),
            Register::Control => ral::write_reg!(crate::ral::dma, block, CTRL, value),
            Register::Condition => ral::write_reg!(crate::ral::dma, block, COND, value),
            Register::Interrupt => ral::write_reg!(crate::ral::dma, block, IRQ, value),
            Register::Activate => ral::write_reg!(crate::ral::dma, block, ACTIVATE, value),
            // Read-only.
            Register::Status => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_register_block() {
        use core::mem::offset_of;
        use ral::dma::RegisterBlock;

        assert_eq!(Register::Source.offset(), offset_of!(RegisterBlock, SRC));
        assert_eq!(Register::Destination.offset(), offset_of!(RegisterBlock, DST));
        assert_eq!(Register::Control.offset(), offset_of!(RegisterBlock, CTRL));
        assert_eq!(Register::Condition.offset(), offset_of!(RegisterBlock, COND));
        assert_eq!(Register::Interrupt.offset(), offset_of!(RegisterBlock, IRQ));
        assert_eq!(Register::Activate.offset(), offset_of!(RegisterBlock, ACTIVATE));
        assert_eq!(Register::Status.offset(), offset_of!(RegisterBlock, STATUS));
    }

    #[test]
    fn mmio_accesses_the_right_words() {
        let mut memory = [0u32; 7];
        let base = memory.as_mut_ptr();
        // Safety: `memory` outlives `mmio`, and is laid out like the register file.
        let mmio = unsafe { Mmio::new(base.cast::<()>()) };

        mmio.write(Register::Condition, 0x1401_0001);
        mmio.write(Register::Control, 0x2000_0417);
        mmio.write(Register::Activate, 1);
        // Ignored: status is read-only.
        mmio.write(Register::Status, 0xFFFF_FFFF);

        // Safety: in bounds of `memory`.
        unsafe {
            assert_eq!(base.add(3).read_volatile(), 0x1401_0001);
            assert_eq!(base.add(2).read_volatile(), 0x2000_0417);
            assert_eq!(base.add(5).read_volatile(), 1);
            assert_eq!(base.add(6).read_volatile(), 0);
            base.add(6).write_volatile(0x0020_0001);
        }

        assert_eq!(mmio.read(Register::Status), 0x0020_0001);
        assert_eq!(mmio.read(Register::Control), 0x2000_0417);
        assert_eq!(mmio.read(Register::Activate), 0);
    }
}
