//! Driver for a condition-gated DMA engine
//!
//! `gated-dma` drives a single-channel, memory-mapped DMA engine found on
//! small RV32 systems. The engine moves bytes or words between a peripheral's
//! register window and memory. Before each element, it may test a status
//! register in the peripheral, so transfers are paced by the peripheral's
//! readiness bit, not by the CPU.
//!
//! The crate provides
//!
//! - bit-exact codecs for the [`Control`], [`Condition`], and [`Status`]
//!   words,
//! - an [`Engine`] that programs, starts, stops, and waits on transfers,
//!   either by polling or by sleeping until the completion interrupt,
//! - a trap [`Dispatcher`] that routes the completion interrupt to the
//!   engine, and a [`Transfer`] future woken by it,
//! - blocking [`peripheral`] and [`memcpy`] transfers, and
//! - a double-buffered [`pipeline`] that overlaps peripheral input with
//!   computation.
//!
//! The engine's registers are reached through the [`Registers`] trait.
//! [`Mmio`] is the hardware register file. With the `sim` feature, the `sim`
//! module offers a register-level model of the engine, a UART, and memory.
//!
//! # Example
//!
//! Copy words, polling the engine until it's done.
//!
//! ```no_run
//! use gated_dma::{memcpy::memcpy, Completion, Engine, Mmio, Spin};
//!
//! static ENGINE: Engine<Mmio> = Engine::new(unsafe { Mmio::instance() });
//!
//! let source = [0x5555_AAAAu32; 64];
//! let mut destination = [0u32; 64];
//! let copied = memcpy(&ENGINE, &source, &mut destination, Completion::Poll, &Spin)?;
//! assert_eq!(copied, 64);
//! # Ok::<(), gated_dma::Error>(())
//! ```
//!
//! To sleep until the completion interrupt instead, route the engine in a
//! [`Dispatcher`] called from your trap vector, and wait with
//! [`Completion::Interrupt`] and `Machine`.
//!
//! # Features
//!
//! - `defmt`: log through `defmt`.
//! - `log`: log through `log`.
//! - `sim`: expose the simulator. Requires `std`.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0) ([LICENSE-APACHE](./LICENSE-APACHE))
//! - [MIT License](http://opensource.org/licenses/MIT) ([LICENSE-MIT](./LICENSE-MIT))
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![no_std]

#[cfg(any(test, feature = "sim"))]
extern crate std;

// Must come first, so that the logging macros are visible to every module.
pub(crate) mod fmt;

mod element;
mod engine;
mod error;
mod interrupt;
pub mod memcpy;
pub mod peripheral;
pub mod pipeline;
mod ral;
mod registers;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod word;

pub use element::Element;
pub use engine::{Completion, Engine};
pub use error::Error;
#[cfg(target_arch = "riscv32")]
pub use interrupt::{mcause, Machine};
pub use interrupt::{Cause, Cpu, Dispatcher, Handler, Spin, Transfer, Trap, ASYNC_TRAP};
pub use ral::{DMA_BASE, DMA_IRQ_CAUSE};
pub use registers::{Mmio, Register, Registers};
pub use word::{
    decode_status, encode_condition, encode_control, toggle_destination, Condition,
    ConditionType, Control, Status, TransferSize,
};

/// A DMA result
pub type Result<T> = core::result::Result<T, Error>;

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

/// Poll `future` once, with a waker that does nothing
///
/// The first poll of a [`Transfer`] activates the engine, so this starts a
/// staged transfer without an executor. Do other work, then finish the
/// transfer with [`block`].
///
/// The completion handler wakes nothing through this waker. Use an
/// executor's waker if a task should resume on completion.
pub fn poll_no_wake<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(|_| NOOP, |_| {}, |_| {}, |_| {});
    const NOOP: RawWaker = RawWaker::new(core::ptr::null(), &VTABLE);
    // Safety: every entry ignores the data pointer, and does nothing.
    let waker = unsafe { Waker::from_raw(NOOP) };
    future.poll(&mut Context::from_waker(&waker))
}

/// Poll `future` until it's ready
///
/// Each poll of a [`Transfer`] reads the engine's status register, so on a
/// transfer this spins on the busy flag, then returns the final [`Status`].
pub fn block<F: Future>(mut future: Pin<&mut F>) -> F::Output {
    loop {
        if let Poll::Ready(output) = poll_no_wake(future.as_mut()) {
            return output;
        }
    }
}
