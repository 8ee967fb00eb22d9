//! DMA engine

use core::{
    cell::RefCell,
    sync::atomic::{self, AtomicBool, Ordering},
    task::Waker,
};

use critical_section::Mutex;

use crate::{
    interrupt::{Cpu, Dispatcher, Handler},
    ral,
    registers::{Register, Registers},
    Condition, Control, Status,
};

pub(crate) type SharedWaker = Mutex<RefCell<Option<Waker>>>;

/// How a caller waits for a transfer to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Spin on the status register until the engine is idle
    Poll,
    /// Suspend the CPU until the engine's completion interrupt was handled
    ///
    /// The transfer must be programmed with `interrupt_enable`, the
    /// interrupt line must be armed, and the engine must be routed in the
    /// trap dispatcher.
    Interrupt,
}

impl Completion {
    /// The control word's `interrupt_enable` for this kind of completion
    pub const fn interrupt_enable(self) -> bool {
        matches!(self, Completion::Interrupt)
    }
}

/// The DMA engine
///
/// `Engine` programs transfers, starts and stops them, and observes their
/// completion. There is exactly one engine, and one outstanding transfer.
///
/// Methods take `&self` so that the engine can also serve as its own
/// completion [`Handler`]. You're still expected to have a single logical
/// owner issuing transfers.
///
/// `Engine` doesn't stop you from programming a busy engine. Check
/// [`busy()`](Engine::busy) first; the hardware outcome is undefined otherwise.
pub struct Engine<R> {
    registers: R,
    /// Trap cause of the completion interrupt
    cause: u32,
    /// Set by the completion handler, consumed by waiters
    completed: AtomicBool,
    waker: SharedWaker,
}

impl<R> Engine<R> {
    /// Creates an engine that completes on trap cause [`DMA_IRQ_CAUSE`](crate::DMA_IRQ_CAUSE)
    pub const fn new(registers: R) -> Self {
        Self::with_cause(registers, ral::DMA_IRQ_CAUSE)
    }

    /// Creates an engine whose completion interrupt arrives with trap cause `cause`
    pub const fn with_cause(registers: R, cause: u32) -> Self {
        Engine {
            registers,
            cause,
            completed: AtomicBool::new(false),
            waker: Mutex::new(RefCell::new(None)),
        }
    }

    /// Returns the trap cause of the completion interrupt
    pub const fn cause(&self) -> u32 {
        self.cause
    }

    /// Returns the engine's registers
    pub fn registers(&self) -> &R {
        &self.registers
    }
}

impl<R: Registers> Engine<R> {
    /// Program a transfer
    ///
    /// Writes the source, destination, condition, and control registers,
    /// in that order. If `control` has `activate` set, the transfer starts
    /// with the last write.
    ///
    /// The engine must be idle.
    pub fn program(&self, source: u32, destination: u32, control: u32, condition: u32) {
        #[cfg(any(feature = "log", feature = "defmt"))]
        if self.busy() {
            debug!("DMA programmed while busy");
        }
        self.completed.store(false, Ordering::Relaxed);
        // Buffer contents must land before the engine can see them.
        atomic::fence(Ordering::SeqCst);

        self.registers.write(Register::Source, source);
        self.registers.write(Register::Destination, destination);
        self.registers.write(Register::Condition, condition);
        self.registers.write(Register::Control, control);
        trace!(
            "DMA programmed: {:#X} -> {:#X}, control {:#X}, condition {:#X}",
            source,
            destination,
            control,
            condition
        );
    }

    /// Rewrite only the control register
    ///
    /// Source, destination, and condition stay as last programmed. Use this
    /// to restart a transfer with a new count or offsets.
    ///
    /// The engine must be idle.
    pub fn set_control(&self, control: u32) {
        self.completed.store(false, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        self.registers.write(Register::Control, control);
    }

    /// Start the staged transfer
    ///
    /// Use this after programming a control word without `activate`.
    pub fn activate(&self) {
        self.completed.store(false, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        self.registers.write(Register::Activate, 1);
    }

    /// Stop the running transfer
    ///
    /// Keeps signaling a stop until the engine reports idle. An element in
    /// flight may only be partially transferred. Spins forever if the engine
    /// never goes idle.
    pub fn abort(&self) {
        debug!("DMA abort");
        while self.busy() {
            self.registers.write(Register::Interrupt, 1);
        }
        self.completed.store(false, Ordering::Relaxed);
    }

    /// Returns the current status
    pub fn status(&self) -> Status {
        Status::decode(self.registers.read(Register::Status))
    }

    /// Indicates if the engine is executing a transfer
    pub fn busy(&self) -> bool {
        self.status().active
    }

    /// Indicates if the engine is idle
    pub fn ready(&self) -> bool {
        !self.busy()
    }

    /// Acknowledge the completion interrupt
    ///
    /// Returns the raw interrupt register value. Non-zero means an
    /// interrupt was pending.
    pub fn acknowledge(&self) -> u32 {
        self.registers.read(Register::Interrupt)
    }

    /// Block until the transfer is done
    ///
    /// See [`Completion`] for the two ways of waiting. Once `wait` returns,
    /// the memory written by the transfer is safe to read.
    pub fn wait<C: Cpu>(&self, completion: Completion, cpu: &C) {
        match completion {
            Completion::Poll => {
                while self.busy() {
                    core::hint::spin_loop();
                }
            }
            Completion::Interrupt => {
                let mut done = false;
                while !done {
                    // Check and sleep with interrupts masked, so that the trap
                    // can't land in between. It's taken on unmask.
                    cpu.without_interrupts(&mut || {
                        done = self.take_completion();
                        if !done {
                            cpu.wait_for_interrupt();
                        }
                    });
                }
            }
        }
        atomic::fence(Ordering::SeqCst);
    }

    /// Program a transfer, start it, and wait for it to finish
    ///
    /// Arms and disarms the interrupt line around the transfer when
    /// `completion` is [`Completion::Interrupt`]. `control` should have
    /// `activate` set.
    pub fn execute<C: Cpu>(
        &self,
        source: u32,
        destination: u32,
        control: Control,
        condition: Condition,
        completion: Completion,
        cpu: &C,
    ) -> Status {
        let control = Control {
            interrupt_enable: completion.interrupt_enable(),
            ..control
        };
        if completion == Completion::Interrupt {
            cpu.enable_irq(self.cause);
        }
        self.program(source, destination, control.encode(), condition.encode());
        self.wait(completion, cpu);
        if completion == Completion::Interrupt {
            cpu.disable_irq(self.cause);
        }
        self.status()
    }

    /// Returns `true`, once, after the completion handler ran
    pub(crate) fn take_completion(&self) -> bool {
        // Load, then store: no compare-and-swap on every target. The handler
        // only ever sets the flag.
        if self.completed.load(Ordering::Acquire) {
            self.completed.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub(crate) fn register_waker(&self, waker: &Waker) {
        critical_section::with(|cs| {
            let mut slot = self.waker.borrow(cs).borrow_mut();
            match slot.as_ref() {
                Some(registered) if registered.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
        });
    }

    pub(crate) fn clear_waker(&self) {
        critical_section::with(|cs| {
            *self.waker.borrow(cs).borrow_mut() = None;
        });
    }
}

impl<R: Registers + Sync> Engine<R> {
    /// Route the engine's completion interrupt through `dispatcher`
    pub fn route<const N: usize>(&'static self, dispatcher: &Dispatcher<N>) -> crate::Result<()> {
        dispatcher.register(self.cause, self)
    }
}

impl<R: Registers> Handler for Engine<R> {
    /// Acknowledge the completion interrupt and wake the waiter
    fn on_trap(&self) {
        self.acknowledge();
        self.completed.store(true, Ordering::Release);
        let waker = critical_section::with(|cs| self.waker.borrow(cs).borrow_mut().take());
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sim, ConditionType, Spin, TransferSize};

    const COPY: Control = Control {
        src_offset: 0,
        dst_offset: 0,
        num_transfers: 16,
        interrupt_enable: false,
        increment_src: true,
        increment_dst: true,
        transfer_size: TransferSize::Byte,
        activate: true,
    };

    #[test]
    fn busy_after_program_then_idle() {
        let (sim, engine) = sim::fixture();
        let source = [0xA5u8; 16];
        let mut destination = [0u8; 16];
        let src = engine.registers().dma_address(source.as_ptr(), 16);
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), 16);

        assert!(engine.ready());
        engine.program(src, dst, COPY.encode(), 0);
        assert!(engine.busy());

        let mut polls = 0;
        while engine.busy() {
            polls += 1;
            assert!(polls <= 16, "engine never went idle");
        }
        assert_eq!(destination, [0xA5; 16]);
        assert_eq!(
            engine.status(),
            Status {
                active: false,
                completed_receives: 16,
                completed_transmissions: 16,
            }
        );
        assert_eq!(sim.stats().programs, 1);
    }

    #[test]
    fn zero_length_transfer_never_starts() {
        let (_, engine) = sim::fixture();
        let control = Control {
            num_transfers: 0,
            ..COPY
        };
        engine.program(0, 0, control.encode(), 0);
        assert!(engine.ready());
    }

    #[test]
    fn program_writes_control_last() {
        let (sim, engine) = sim::fixture();
        let control = Control {
            activate: false,
            ..COPY
        };
        engine.program(0x1000_0000, 0x1000_0100, control.encode(), 0x1401_0001);
        assert_eq!(
            sim.writes(),
            [
                (Register::Source, 0x1000_0000),
                (Register::Destination, 0x1000_0100),
                (Register::Condition, 0x1401_0001),
                (Register::Control, control.encode()),
            ]
        );
        assert!(engine.ready());
    }

    #[test]
    fn activate_starts_staged_transfer() {
        let (sim, engine) = sim::fixture();
        let source = [1u8, 2, 3, 4];
        let mut destination = [0u8; 4];
        let src = engine.registers().dma_address(source.as_ptr(), 4);
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), 4);
        let staged = Control {
            num_transfers: 4,
            activate: false,
            ..COPY
        };

        engine.program(src, dst, staged.encode(), 0);
        assert!(engine.ready());
        engine.activate();
        engine.wait(Completion::Poll, &Spin);

        assert_eq!(destination, source);
        assert_eq!(sim.stats().activations, 1);
    }

    #[test]
    fn abort_stops_a_stalled_transfer() {
        let (sim, engine) = sim::fixture();
        let mut destination = [0u8; 8];
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), 8);
        let control = Control {
            src_offset: 0,
            num_transfers: 8,
            increment_src: false,
            ..COPY
        };
        // No data in the receiver: the engine waits on "data ready" forever.
        let condition = Condition {
            cond_addr_offset: 0x14,
            bitmask: 1,
            conditional_type: ConditionType::Read,
            negate: false,
            enable: true,
        };

        engine.program(sim::UART_BASE, dst, control.encode(), condition.encode());
        assert!(engine.busy());
        assert!(engine.busy());
        // The first two stops go unheeded.
        sim.ignore_stops(2);
        engine.abort();
        assert!(engine.ready());
        assert_eq!(sim.stats().aborts, 1);
        assert_eq!(engine.status().completed_receives, 0);

        let stops = sim
            .writes()
            .iter()
            .filter(|(register, _)| *register == Register::Interrupt)
            .count();
        assert_eq!(stops, 3);
    }

    #[test]
    fn interrupt_completion_is_acknowledged() {
        let (sim, engine) = sim::fixture();
        let source = [7u32; 4];
        let mut destination = [0u32; 4];
        let src = engine.registers().dma_address(source.as_ptr().cast::<u8>(), 16);
        let dst = engine.registers().dma_address(destination.as_mut_ptr().cast::<u8>(), 16);
        let control = Control {
            num_transfers: 4,
            transfer_size: TransferSize::Word,
            ..COPY
        };

        let status = engine.execute(
            src,
            dst,
            control,
            Condition::NONE,
            Completion::Interrupt,
            sim,
        );

        assert_eq!(destination, [7; 4]);
        assert_eq!(status.completed_transmissions, 4);
        assert_eq!(sim.stats().traps, 1);
        assert_eq!(sim.stats().acknowledged, 1);
        assert!(!sim.irq_armed());
        // Nothing left to acknowledge.
        assert_eq!(engine.acknowledge(), 0);
    }

    #[test]
    fn completion_observed_before_waiting() {
        let (sim, engine) = sim::fixture();
        let source = [3u8; 2];
        let mut destination = [0u8; 2];
        let src = engine.registers().dma_address(source.as_ptr(), 2);
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), 2);
        let control = Control {
            num_transfers: 2,
            interrupt_enable: true,
            ..COPY
        };

        sim.enable_irq(engine.cause());
        engine.program(src, dst, control.encode(), 0);
        // The transfer finishes, and the trap is taken, before anyone waits.
        sim.run(usize::MAX);
        assert_eq!(sim.stats().traps, 1);

        engine.wait(Completion::Interrupt, sim);
        assert_eq!(destination, [3; 2]);
    }

    /// Finishes the transfer right before it sleeps, as if the completion
    /// raced the `wfi`
    struct LateSleeper(&'static sim::Sim);

    impl Cpu for LateSleeper {
        fn enable_irq(&self, code: u32) {
            self.0.enable_irq(code);
        }
        fn disable_irq(&self, code: u32) {
            self.0.disable_irq(code);
        }
        fn wait_for_interrupt(&self) {
            self.0.run(usize::MAX);
            assert!(
                self.0.irq_pending(),
                "sleeping with nothing left to wake the hart"
            );
            self.0.wait_for_interrupt();
        }
        fn without_interrupts(&self, f: &mut dyn FnMut()) {
            self.0.without_interrupts(f);
        }
    }

    #[test]
    fn completion_racing_the_sleep_still_wakes() {
        let (sim, engine) = sim::fixture();
        let source = [0x3Cu8; 8];
        let mut destination = [0u8; 8];
        let src = engine.registers().dma_address(source.as_ptr(), 8);
        let dst = engine.registers().dma_address(destination.as_mut_ptr(), 8);
        let control = Control {
            num_transfers: 8,
            ..COPY
        };

        let status = engine.execute(
            src,
            dst,
            control,
            Condition::NONE,
            Completion::Interrupt,
            &LateSleeper(sim),
        );

        assert_eq!(destination, source);
        assert_eq!(status.completed_transmissions, 8);
        assert_eq!(sim.stats().traps, 1);
        assert_eq!(sim.stats().acknowledged, 1);
        assert!(!sim.irq_pending());
    }
}
