//! DMA engine register block and fields

use super::{RORegister, RWRegister, WORegister};

/// DMA engine registers
#[repr(C)]
pub struct RegisterBlock {
    /// Source Address Register
    pub SRC: RWRegister<u32>,
    /// Destination Address Register
    pub DST: RWRegister<u32>,
    /// Control Register
    pub CTRL: RWRegister<u32>,
    /// Condition Register
    pub COND: RWRegister<u32>,
    /// Interrupt Register
    ///
    /// Reading acknowledges (and clears) a pending completion interrupt.
    /// Writing stops the running transfer.
    pub IRQ: RWRegister<u32>,
    /// Activate Register
    pub ACTIVATE: WORegister<u32>,
    /// Status Register
    pub STATUS: RORegister<u32>,
}

const _: () = assert!(core::mem::offset_of!(RegisterBlock, IRQ) == 0x10);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, STATUS) == 0x18);

/// Control Register
pub mod CTRL {
    /// Byte offset into the source window
    pub mod SRC_OFFSET {
        pub const offset: u32 = 24;
        pub const mask: u32 = 0xFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Byte offset into the destination window
    pub mod DST_OFFSET {
        pub const offset: u32 = 16;
        pub const mask: u32 = 0xFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Number of elements to move
    pub mod NUM_TRANSFERS {
        pub const offset: u32 = 5;
        pub const mask: u32 = 0x7FF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Raise the completion interrupt when the transfer finishes
    pub mod IRQ_ENABLE {
        pub const offset: u32 = 4;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Advance the source address after each element
    pub mod INC_SRC {
        pub const offset: u32 = 3;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Advance the destination address after each element
    pub mod INC_DST {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Element width
    pub mod TRANSFER_SIZE {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {
            /// 32-bit elements
            pub const WORD: u32 = 0;
            /// 8-bit elements
            pub const BYTE: u32 = 1;
        }
    }
    /// Start the transfer as soon as the control word is written
    pub mod ACTIVATE {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

/// Condition Register
pub mod COND {
    /// Offset of the status register that gates each element
    pub mod ADDR_OFFSET {
        pub const offset: u32 = 24;
        pub const mask: u32 = 0xFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Status bits tested before each element
    pub mod BITMASK {
        pub const offset: u32 = 16;
        pub const mask: u32 = 0xFF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Which side of the transfer owns the status register
    pub mod TYPE {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {
            /// Status register lives in the source window
            pub const READ: u32 = 0;
            /// Status register lives in the destination window
            pub const WRITE: u32 = 1;
        }
    }
    /// Invert the test
    pub mod NEGATE {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Gate transfers on the condition
    pub mod ENABLE {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}

/// Status Register
pub mod STATUS {
    /// Elements read from the source
    pub mod COMPLETED_RECEIVES {
        pub const offset: u32 = 21;
        pub const mask: u32 = 0x7FF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// Elements written to the destination
    pub mod COMPLETED_TRANSMISSIONS {
        pub const offset: u32 = 10;
        pub const mask: u32 = 0x7FF << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
    /// The engine is executing a transfer
    pub mod ACTIVE {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {}
    }
}
