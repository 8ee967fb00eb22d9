//! 16550-style UART register block and fields
//!
//! Registers sit on a 4-byte stride.

use super::{RORegister, RWRegister};

#[repr(C)]
pub struct RegisterBlock {
    /// Receive Buffer (read) / Transmit Holding (write) Register
    pub RBR_THR: RWRegister<u32>,
    /// Interrupt Enable Register
    pub IER: RWRegister<u32>,
    /// Interrupt Identification (read) / FIFO Control (write) Register
    pub IIR_FCR: RWRegister<u32>,
    /// Line Control Register
    pub LCR: RWRegister<u32>,
    /// Modem Control Register
    pub MCR: RWRegister<u32>,
    /// Line Status Register
    pub LSR: RORegister<u32>,
}

/// Byte offset of the data register
pub const RBR_THR_OFFSET: u8 = 0x00;
/// Byte offset of the line status register
pub const LSR_OFFSET: u8 = 0x14;

const _: () = assert!(core::mem::offset_of!(RegisterBlock, LSR) == LSR_OFFSET as usize);

pub mod RBR_THR {
    pub mod DATA {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

pub mod IIR_FCR {
    /// FIFO enable
    pub mod FIFOE {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Receive FIFO reset
    pub mod RXRST {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Transmit FIFO reset
    pub mod TXRST {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

pub mod LSR {
    /// Data ready
    pub mod DR {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Transmit holding register empty
    pub mod THRE {
        pub const offset: u32 = 5;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Transmitter empty
    pub mod TEMT {
        pub const offset: u32 = 6;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}
