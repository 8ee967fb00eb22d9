//! DMA interrupt support
//!
//! The engine signals completion with a machine-level external interrupt.
//! Your trap vector reads `mcause` and hands it to a [`Dispatcher`], which
//! calls the [`Handler`] routed for that cause:
//!
//! ```no_run
//! use gated_dma::{Dispatcher, Engine, Mmio, Trap};
//!
//! static ENGINE: Engine<Mmio> = Engine::new(unsafe { Mmio::instance() });
//! static DISPATCHER: Dispatcher<4> = Dispatcher::new();
//!
//! fn trap_entry(mcause: u32) {
//!     DISPATCHER.trap(mcause);
//! }
//!
//! ENGINE.route(&DISPATCHER).unwrap();
//! ```

use core::{
    cell::{Cell, RefCell},
    future::Future,
    marker::PhantomPinned,
    pin::Pin,
    task::{Context, Poll},
};

use critical_section::Mutex;

use crate::{registers::Registers, Engine, Error, Status};

/// Set in `mcause` when the trap is an interrupt, not an exception
pub const ASYNC_TRAP: u32 = 1 << 31;

/// Something that services a trap
pub trait Handler {
    /// Called, from the trap context, once per dispatched trap
    fn on_trap(&self);
}

/// A decoded `mcause` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cause(u32);

impl Cause {
    /// Wrap a raw `mcause` value
    pub const fn new(mcause: u32) -> Self {
        Cause(mcause)
    }

    /// The `mcause` value of interrupt `code`
    pub const fn interrupt(code: u32) -> Self {
        Cause(ASYNC_TRAP | code)
    }

    /// Indicates an interrupt, as opposed to a synchronous exception
    pub const fn is_async(self) -> bool {
        self.0 & ASYNC_TRAP != 0
    }

    /// The exception code
    pub const fn code(self) -> u32 {
        self.0 & !ASYNC_TRAP
    }

    /// The raw `mcause` value
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Entry point for a trap vector
pub trait Trap {
    /// Handle the trap described by `mcause`
    ///
    /// Returns `true` if a handler ran.
    fn trap(&self, mcause: u32) -> bool;
}

#[derive(Clone, Copy)]
struct Route {
    code: u32,
    handler: &'static (dyn Handler + Sync),
}

/// Routes interrupts to their handlers
///
/// Holds up to `N` routes, each keyed by an interrupt's exception code.
pub struct Dispatcher<const N: usize> {
    routes: Mutex<RefCell<[Option<Route>; N]>>,
}

impl<const N: usize> Dispatcher<N> {
    /// Create a dispatcher with no routes
    pub const fn new() -> Self {
        Dispatcher {
            routes: Mutex::new(RefCell::new([None; N])),
        }
    }

    /// Route interrupt `code` to `handler`
    ///
    /// Fails if `code` is already routed, or if there's no free route.
    pub fn register(
        &self,
        code: u32,
        handler: &'static (dyn Handler + Sync),
    ) -> crate::Result<()> {
        critical_section::with(|cs| {
            let mut routes = self.routes.borrow(cs).borrow_mut();
            if routes.iter().flatten().any(|route| route.code == code) {
                return Err(Error::CauseTaken(code));
            }
            let free = routes
                .iter_mut()
                .find(|route| route.is_none())
                .ok_or(Error::DispatcherFull)?;
            *free = Some(Route { code, handler });
            Ok(())
        })
    }

    /// Remove the route for interrupt `code`
    ///
    /// Returns `true` if there was one.
    pub fn unregister(&self, code: u32) -> bool {
        critical_section::with(|cs| {
            let mut routes = self.routes.borrow(cs).borrow_mut();
            match routes
                .iter_mut()
                .find(|route| matches!(route, Some(route) if route.code == code))
            {
                Some(route) => {
                    *route = None;
                    true
                }
                None => false,
            }
        })
    }

    /// Call the handler routed for `cause`
    ///
    /// Synchronous exceptions, and interrupts without a route, are ignored.
    /// Returns `true` if a handler ran.
    pub fn dispatch(&self, cause: Cause) -> bool {
        if !cause.is_async() {
            return false;
        }
        let handler = critical_section::with(|cs| {
            self.routes
                .borrow(cs)
                .borrow()
                .iter()
                .flatten()
                .find(|route| route.code == cause.code())
                .map(|route| route.handler)
        });
        match handler {
            // Outside the critical section: handlers take their own.
            Some(handler) => {
                handler.on_trap();
                true
            }
            None => {
                trace!("Unrouted trap {:#X}", cause.raw());
                false
            }
        }
    }
}

impl<const N: usize> Default for Dispatcher<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Trap for Dispatcher<N> {
    fn trap(&self, mcause: u32) -> bool {
        self.dispatch(Cause::new(mcause))
    }
}

/// CPU services needed to wait on an interrupt
pub trait Cpu {
    /// Unmask interrupt `code`, and enable machine interrupts
    fn enable_irq(&self, code: u32);
    /// Mask interrupt `code`
    fn disable_irq(&self, code: u32);
    /// Suspend until an interrupt might have been taken
    ///
    /// Spurious returns are allowed. Called with interrupts masked (see
    /// [`without_interrupts`](Cpu::without_interrupts)), it must still
    /// return once an enabled interrupt is pending.
    fn wait_for_interrupt(&self);
    /// Run `f` with machine interrupts masked
    ///
    /// An interrupt that becomes pending meanwhile is taken after `f`
    /// returns. The default uses a critical section.
    fn without_interrupts(&self, f: &mut dyn FnMut()) {
        critical_section::with(|_| f())
    }
}

impl<C: Cpu + ?Sized> Cpu for &C {
    fn enable_irq(&self, code: u32) {
        (**self).enable_irq(code)
    }
    fn disable_irq(&self, code: u32) {
        (**self).disable_irq(code)
    }
    fn wait_for_interrupt(&self) {
        (**self).wait_for_interrupt()
    }
    fn without_interrupts(&self, f: &mut dyn FnMut()) {
        (**self).without_interrupts(f)
    }
}

/// A CPU that never sleeps
///
/// Interrupt masking is left to someone else. Waiting is a spin. Use `Spin`
/// with [`Completion::Poll`](crate::Completion::Poll), or when some other
/// code owns `mie`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spin;

impl Cpu for Spin {
    fn enable_irq(&self, _: u32) {}
    fn disable_irq(&self, _: u32) {}
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }
}

/// The RV32 hart running this code
#[cfg(target_arch = "riscv32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Machine;

#[cfg(target_arch = "riscv32")]
impl Cpu for Machine {
    fn enable_irq(&self, code: u32) {
        let bit = 1u32 << code;
        // Safety: sets the line's enable bit, then MIE. Handlers must be
        // routed before this.
        unsafe {
            core::arch::asm!("csrs mie, {0}", in(reg) bit);
            core::arch::asm!("csrsi mstatus, 8");
        }
    }

    fn disable_irq(&self, code: u32) {
        let bit = 1u32 << code;
        // Safety: only clears the line's enable bit.
        unsafe { core::arch::asm!("csrc mie, {0}", in(reg) bit) };
    }

    fn wait_for_interrupt(&self) {
        // Safety: wfi only stalls the hart. It wakes on a pending, enabled
        // line even with MIE clear.
        unsafe { core::arch::asm!("wfi") };
    }

    fn without_interrupts(&self, f: &mut dyn FnMut()) {
        let mstatus: u32;
        // Safety: clears MIE, and restores it below if it was set.
        unsafe { core::arch::asm!("csrrci {0}, mstatus, 8", out(reg) mstatus) };
        f();
        if mstatus & 8 != 0 {
            // Safety: see above.
            unsafe { core::arch::asm!("csrsi mstatus, 8") };
        }
    }
}

/// Read `mcause`
#[cfg(target_arch = "riscv32")]
pub fn mcause() -> u32 {
    let mcause: u32;
    // Safety: reading a CSR has no side effects.
    unsafe { core::arch::asm!("csrr {0}, mcause", out(reg) mcause) };
    mcause
}

/// The root DMA transfer future
///
/// `Transfer` is woken by the engine's completion [`Handler`], so the engine
/// must be routed in a [`Dispatcher`] if you want an executor to be woken.
/// [`block`](crate::block) works without a route.
///
/// Dropping a `Transfer` before it completes stops the engine.
pub struct Transfer<'a, R: Registers> {
    engine: &'a Engine<R>,
    started: Cell<bool>,
    _pinned: PhantomPinned,
}

impl<'a, R: Registers> Transfer<'a, R> {
    /// # Safety
    ///
    /// Assumes that the transfer is programmed but not yet activated, and
    /// that the memory it touches stays valid until the future completes or
    /// is dropped. The transfer activates on the first call to `poll()`.
    pub unsafe fn new(engine: &'a Engine<R>) -> Self {
        Transfer {
            engine,
            started: Cell::new(false),
            _pinned: PhantomPinned,
        }
    }
}

impl<R: Registers> Future for Transfer<'_, R> {
    type Output = Status;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.engine.register_waker(cx.waker());

        loop {
            if self.engine.busy() {
                return Poll::Pending;
            } else if self.started.get() {
                self.engine.take_completion();
                core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
                return Poll::Ready(self.engine.status());
            } else {
                self.started.set(true);
                self.engine.activate();
            }
        }
    }
}

impl<R: Registers> Drop for Transfer<'_, R> {
    fn drop(&mut self) {
        if self.engine.busy() {
            self.engine.abort();
        }
        self.engine.clear_waker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sim, Control, TransferSize};
    use core::{
        pin::pin,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use std::boxed::Box;

    struct Counter(AtomicUsize);

    impl Handler for Counter {
        fn on_trap(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counter() -> &'static Counter {
        Box::leak(Box::new(Counter(AtomicUsize::new(0))))
    }

    #[test]
    fn cause_fields() {
        let cause = Cause::new(0x8000_0013);
        assert!(cause.is_async());
        assert_eq!(cause.code(), 19);
        assert_eq!(Cause::interrupt(19), cause);
        assert!(!Cause::new(19).is_async());
    }

    #[test]
    fn dispatch_requires_async_and_exact_code() {
        let dispatcher = Dispatcher::<2>::new();
        let dma = counter();
        dispatcher.register(19, dma).unwrap();

        assert!(dispatcher.trap(0x8000_0013));
        // Exception with the same code
        assert!(!dispatcher.trap(19));
        // Code 19 in the low five bits, but not 19
        assert!(!dispatcher.trap(0x8000_0033));
        assert!(!dispatcher.trap(0x8000_0007));
        assert_eq!(dma.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn routes_are_exclusive_and_bounded() {
        let dispatcher = Dispatcher::<2>::default();
        let (first, second, third) = (counter(), counter(), counter());

        dispatcher.register(19, first).unwrap();
        assert_eq!(dispatcher.register(19, second), Err(Error::CauseTaken(19)));
        dispatcher.register(7, second).unwrap();
        assert_eq!(dispatcher.register(11, third), Err(Error::DispatcherFull));

        assert!(dispatcher.unregister(19));
        assert!(!dispatcher.unregister(19));
        assert!(!dispatcher.trap(Cause::interrupt(19).raw()));
        dispatcher.register(11, third).unwrap();
        assert!(dispatcher.trap(Cause::interrupt(11).raw()));
        assert!(dispatcher.trap(Cause::interrupt(7).raw()));

        assert_eq!(first.0.load(Ordering::Relaxed), 0);
        assert_eq!(second.0.load(Ordering::Relaxed), 1);
        assert_eq!(third.0.load(Ordering::Relaxed), 1);
    }

    fn stage(engine: &Engine<&sim::Sim>, source: &[u8], destination: &mut [u8]) {
        let len = source.len();
        let src = engine.registers().dma_address(source.as_ptr(), len);
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), len);
        let control = Control {
            num_transfers: len as u16,
            increment_src: true,
            increment_dst: true,
            transfer_size: TransferSize::Byte,
            ..Control::default()
        };
        engine.program(src, dst, control.encode(), 0);
    }

    #[test]
    fn transfer_activates_on_first_poll() {
        let (sim, engine) = sim::fixture();
        let source = [0x5Au8; 8];
        let mut destination = [0u8; 8];
        stage(engine, &source, &mut destination);
        assert_eq!(sim.stats().activations, 0);

        // Safety: buffers outlive the transfer.
        let mut transfer = pin!(unsafe { Transfer::new(engine) });
        assert!(crate::poll_no_wake(transfer.as_mut()).is_pending());
        assert_eq!(sim.stats().activations, 1);

        let status = crate::block(transfer.as_mut());
        assert_eq!(status.completed_transmissions, 8);
        assert!(!status.active);
        assert_eq!(destination, source);
        assert_eq!(sim.stats().activations, 1);
        assert_eq!(sim.stats().aborts, 0);
    }

    #[test]
    fn dropping_a_running_transfer_stops_the_engine() {
        let (sim, engine) = sim::fixture();
        let source = [1u8; 64];
        let mut destination = [0u8; 64];
        stage(engine, &source, &mut destination);

        {
            // Safety: buffers outlive the transfer.
            let mut transfer = pin!(unsafe { Transfer::new(engine) });
            assert!(crate::poll_no_wake(transfer.as_mut()).is_pending());
        }
        assert!(engine.ready());
        assert_eq!(sim.stats().aborts, 1);
        assert!(destination.iter().any(|&byte| byte == 0));
    }
}
