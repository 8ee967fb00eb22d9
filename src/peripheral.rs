//! DMA support for hardware peripherals.
//!
//! If a driver is compatible with this API, it implements some or all of
//! the traits in this module. The engine paces each element on the
//! peripheral's readiness bit, described by a [`Condition`], so the CPU
//! never polls the peripheral itself.
//!
//! [`read()`] and [`write()`] block until the transfer is done. To overlap
//! the transfer with other work, see [`Transfer`](crate::Transfer) and the
//! [`pipeline`](crate::pipeline).

use crate::{
    ral::{self, Static},
    registers::Registers,
    Completion, Condition, ConditionType, Control, Cpu, Element, Engine, Error, Status,
};

/// A peripheral that can be the source of DMA data
///
/// By 'source,' we mean that it provides data for a DMA transfer.
/// A source would be a hardware device writing data into memory,
/// like a UART receiver.
///
/// # Safety
///
/// `Source` should only be implemented on peripherals that are
/// DMA capable. `address()` and `offset()` must describe the data
/// register, and `condition()` must test a status register that the
/// engine can read.
pub unsafe trait Source<E: Element> {
    /// The engine address of the peripheral's register window
    ///
    /// This memory is assumed to be static. Repeated calls should always
    /// return the same address.
    fn address(&self) -> u32;
    /// Byte offset of the data register from [`address()`](Source::address)
    fn offset(&self) -> u8;
    /// The condition under which the peripheral has an element to give
    ///
    /// The condition's status register offset is relative to
    /// [`address()`](Source::address).
    fn condition(&self) -> Condition;
    /// Prepare the peripheral for one transfer
    ///
    /// Called right before each transfer is issued. Use it to request data
    /// from a link partner. The default does nothing.
    fn prime(&self) {}
}

/// A peripheral that can be the destination for DMA data
///
/// By 'destination,' we mean that it receives data from a DMA transfer.
/// A destination would be a peripheral that could send data out of
/// processor memory, like a UART transmitter.
///
/// # Safety
///
/// See [`Source`].
pub unsafe trait Destination<E: Element> {
    /// The engine address of the peripheral's register window
    fn address(&self) -> u32;
    /// Byte offset of the data register from [`address()`](Destination::address)
    fn offset(&self) -> u8;
    /// The condition under which the peripheral can take an element
    ///
    /// The condition's status register offset is relative to
    /// [`address()`](Destination::address).
    fn condition(&self) -> Condition;
}

pub(crate) fn check_count(len: usize) -> crate::Result<u16> {
    if len > Control::MAX_TRANSFERS as usize {
        Err(Error::TransferCount(len))
    } else {
        Ok(len as u16)
    }
}

/// Use the DMA engine to receive a `buffer` of elements from the source peripheral.
///
/// Blocks until the engine is done, then returns its status. An empty
/// buffer returns right away, without touching the engine.
///
/// # Example
///
/// Receive 32 bytes from the UART, polling the engine until it's done.
///
/// ```no_run
/// use gated_dma::{peripheral::{self, Uart}, Completion, Engine, Mmio, Spin};
///
/// static ENGINE: Engine<Mmio> = Engine::new(unsafe { Mmio::instance() });
/// // Safety: the UART's registers live here.
/// let uart = unsafe { Uart::new(0x0300_2000 as *const ()) };
///
/// let mut buffer = [0u8; 32];
/// peripheral::read(&ENGINE, &uart, &mut buffer, Completion::Poll, &Spin)?;
/// # Ok::<(), gated_dma::Error>(())
/// ```
pub fn read<R, S, E, C>(
    engine: &Engine<R>,
    source: &S,
    buffer: &mut [E],
    completion: Completion,
    cpu: &C,
) -> crate::Result<Status>
where
    R: Registers,
    S: Source<E>,
    E: Element,
    C: Cpu,
{
    let num_transfers = check_count(buffer.len())?;
    if num_transfers == 0 {
        return Ok(engine.status());
    }
    let destination = engine
        .registers()
        .dma_address(buffer.as_mut_ptr().cast::<u8>(), core::mem::size_of_val(buffer));
    let control = Control {
        src_offset: source.offset(),
        dst_offset: 0,
        num_transfers,
        interrupt_enable: false,
        increment_src: false,
        increment_dst: true,
        transfer_size: E::SIZE,
        activate: true,
    };
    source.prime();
    Ok(engine.execute(
        source.address(),
        destination,
        control,
        source.condition(),
        completion,
        cpu,
    ))
}

/// Use the DMA engine to send a `buffer` of data to the destination peripheral.
///
/// Blocks until the engine is done, then returns its status. An empty
/// buffer returns right away, without touching the engine.
pub fn write<R, D, E, C>(
    engine: &Engine<R>,
    buffer: &[E],
    destination: &D,
    completion: Completion,
    cpu: &C,
) -> crate::Result<Status>
where
    R: Registers,
    D: Destination<E>,
    E: Element,
    C: Cpu,
{
    let num_transfers = check_count(buffer.len())?;
    if num_transfers == 0 {
        return Ok(engine.status());
    }
    let source = engine
        .registers()
        .dma_address(buffer.as_ptr().cast::<u8>(), core::mem::size_of_val(buffer));
    let control = Control {
        src_offset: 0,
        dst_offset: destination.offset(),
        num_transfers,
        interrupt_enable: false,
        increment_src: true,
        increment_dst: false,
        transfer_size: E::SIZE,
        activate: true,
    };
    Ok(engine.execute(
        source,
        destination.address(),
        control,
        destination.condition(),
        completion,
        cpu,
    ))
}

/// A 16550-style UART
///
/// Besides being a DMA [`Source`] and [`Destination`], `Uart` offers
/// blocking, CPU-driven byte I/O.
pub struct Uart {
    uart: Static<ral::uart::RegisterBlock>,
    handshake: Option<u8>,
}

// Safety: see `Mmio`. Every access is a single volatile load or store.
unsafe impl Send for Uart {}
unsafe impl Sync for Uart {}

impl Uart {
    /// Receiver has data: `LSR` data-ready set, on the source side
    pub const RX_READY: Condition = Condition {
        cond_addr_offset: ral::uart::LSR_OFFSET,
        bitmask: ral::uart::LSR::DR::mask as u8,
        conditional_type: ConditionType::Read,
        negate: false,
        enable: true,
    };

    /// Transmitter can take data: `LSR` holding-register-empty set, on the
    /// destination side
    pub const TX_READY: Condition = Condition {
        cond_addr_offset: ral::uart::LSR_OFFSET,
        bitmask: ral::uart::LSR::THRE::mask as u8,
        conditional_type: ConditionType::Write,
        negate: false,
        enable: true,
    };

    /// Access the UART at `base`
    ///
    /// # Safety
    ///
    /// `base` must point at a 16550-style register block. The engine sees
    /// the block at the same address.
    pub const unsafe fn new(base: *const ()) -> Self {
        Uart {
            uart: Static(base.cast()),
            handshake: None,
        }
    }

    /// Transmit `byte` right before each DMA read
    ///
    /// Use this when the link partner sends a block of data only after it's
    /// asked for one.
    pub const fn with_handshake(self, byte: u8) -> Self {
        Uart {
            uart: self.uart,
            handshake: Some(byte),
        }
    }

    /// Indicates that the receiver holds a byte
    pub fn is_readable(&self) -> bool {
        ral::read_reg!(crate::ral::uart, self.uart, LSR, DR == 1)
    }

    /// Indicates that the transmitter can take a byte
    pub fn is_writable(&self) -> bool {
        ral::read_reg!(crate::ral::uart, self.uart, LSR, THRE == 1)
    }

    /// Block until a byte arrives, then return it
    pub fn read_byte(&self) -> u8 {
        while !self.is_readable() {
            core::hint::spin_loop();
        }
        ral::read_reg!(crate::ral::uart, self.uart, RBR_THR, DATA) as u8
    }

    /// Block until the transmitter has room, then send `byte`
    pub fn write_byte(&self, byte: u8) {
        while !self.is_writable() {
            core::hint::spin_loop();
        }
        ral::write_reg!(crate::ral::uart, self.uart, RBR_THR, DATA: byte as u32);
    }

    /// Indicates that the transmitter has sent everything it was given
    pub fn is_idle(&self) -> bool {
        ral::read_reg!(crate::ral::uart, self.uart, LSR, TEMT == 1)
    }

    /// Wait for the transmitter to drain, then enable and clear both FIFOs
    pub fn flush(&self) {
        while !self.is_idle() {
            core::hint::spin_loop();
        }
        ral::write_reg!(crate::ral::uart, self.uart, IIR_FCR, FIFOE: 1, RXRST: 1, TXRST: 1);
    }
}

unsafe impl Source<u8> for Uart {
    fn address(&self) -> u32 {
        self.uart.address()
    }
    fn offset(&self) -> u8 {
        ral::uart::RBR_THR_OFFSET
    }
    fn condition(&self) -> Condition {
        Self::RX_READY
    }
    fn prime(&self) {
        if let Some(byte) = self.handshake {
            self.write_byte(byte);
        }
    }
}

unsafe impl Destination<u8> for Uart {
    fn address(&self) -> u32 {
        self.uart.address()
    }
    fn offset(&self) -> u8 {
        ral::uart::RBR_THR_OFFSET
    }
    fn condition(&self) -> Condition {
        Self::TX_READY
    }
}
