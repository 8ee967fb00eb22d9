//! Register-level model of the DMA engine
//!
//! [`Sim`] stands in for the engine's register file. It implements
//! [`Registers`] for the driver, and [`Cpu`] for waiting on the completion
//! interrupt. Behind the registers, it models
//!
//! - host memory, mapped into the engine's 32-bit address space by
//!   [`Registers::dma_address`],
//! - a 16550-style UART at [`UART_BASE`], fed with [`Sim::feed`] or
//!   [`Sim::respond`], and
//! - one machine interrupt line, delivered to an attached [`Trap`].
//!
//! Time advances one element per step. Each status read is a step, so a
//! driver polling `busy()` sees the transfer make progress. [`Sim::run`] and
//! a wait for interrupt also step the model. Traps are taken there, and when
//! [`Cpu::without_interrupts`] unmasks; never while masked.
//!
//! Memory handed to [`Registers::dma_address`] is written through raw
//! pointers while a transfer runs. Keep it alive, and don't touch it, until
//! the engine is idle.

use core::cell::{Cell, RefCell};
use std::{collections::VecDeque, vec::Vec};

use critical_section::{CriticalSection, Mutex};

use crate::{
    interrupt::{Cause, Cpu, Trap},
    ral::{self, uart},
    registers::{Register, Registers},
    Condition, ConditionType, Control, Status,
};

/// First engine address handed out for mapped host memory
pub const RAM_BASE: u32 = 0x1000_0000;
/// Engine address of the simulated UART
pub const UART_BASE: u32 = 0x0300_2000;

const UART_LEN: u32 = 0x20;
const PAGE: u32 = 0x1000;

/// Event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Writes to the control register
    pub programs: usize,
    /// Writes to the activate register
    pub activations: usize,
    /// Stops of a running transfer
    pub aborts: usize,
    /// Interrupt register reads that cleared a pending interrupt
    pub acknowledged: usize,
    /// Traps taken
    pub traps: usize,
    /// Accesses outside of mapped memory and the UART
    pub faults: usize,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    address: u32,
    host: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Job {
    source: u32,
    destination: u32,
    control: Control,
    condition: Condition,
    moved: u16,
}

#[derive(Default)]
struct State {
    source: u32,
    destination: u32,
    control: u32,
    condition: u32,
    job: Option<Job>,
    receives: u16,
    transmissions: u16,
    irq_pending: bool,
    mie: u32,
    mstatus_mie: bool,
    /// Nesting depth of `without_interrupts`
    masked: usize,
    ignored_stops: usize,
    regions: Vec<Region>,
    next: u32,
    rx: VecDeque<u8>,
    responses: VecDeque<Vec<u8>>,
    tx: Vec<u8>,
    writes: Vec<(Register, u32)>,
    stats: Stats,
}

impl State {
    fn status(&self) -> Status {
        Status {
            active: self.job.is_some(),
            completed_receives: self.receives,
            completed_transmissions: self.transmissions,
        }
    }

    fn start(&mut self) {
        let control = Control::decode(self.control);
        if self.job.is_some() {
            warn!("sim: activated while busy; restarting");
        }
        self.receives = 0;
        self.transmissions = 0;
        self.job = (control.num_transfers != 0).then_some(Job {
            source: self.source,
            destination: self.destination,
            control,
            condition: Condition::decode(self.condition),
            moved: 0,
        });
    }

    fn region(&self, address: u32, len: usize) -> Option<(usize, Region)> {
        self.regions.iter().find_map(|region| {
            let start = address.checked_sub(region.address)? as usize;
            (start + len <= region.len).then_some((start, *region))
        })
    }

    fn map(&mut self, host: usize, len: usize) -> u32 {
        if let Some(region) = self
            .regions
            .iter()
            .find(|region| region.host <= host && host + len <= region.host + region.len)
        {
            return region.address + (host - region.host) as u32;
        }
        if self.next == 0 {
            self.next = RAM_BASE;
        }
        // Keep the host's alignment, up to 16 bytes.
        let address = self.next.next_multiple_of(PAGE) + (host % 16) as u32;
        self.next = address + len as u32;
        self.regions.push(Region { address, host, len });
        address
    }

    fn uart_register(&self, address: u32) -> Option<u32> {
        address
            .checked_sub(UART_BASE)
            .filter(|offset| *offset < UART_LEN)
    }

    fn line_status(&self) -> u32 {
        let ready = if self.rx.is_empty() {
            0
        } else {
            uart::LSR::DR::mask
        };
        ready | uart::LSR::THRE::mask | uart::LSR::TEMT::mask
    }

    fn transmit(&mut self, byte: u8) {
        self.tx.push(byte);
        if let Some(response) = self.responses.pop_front() {
            self.rx.extend(response);
        }
    }

    /// Peek at a gating status register, without side effects
    fn peek(&mut self, address: u32) -> u32 {
        match self.uart_register(address) {
            Some(offset) if offset == uart::LSR_OFFSET as u32 => self.line_status(),
            Some(_) => 0,
            None => self.load(address, 1).unwrap_or(0),
        }
    }

    fn load(&mut self, address: u32, len: usize) -> Option<u32> {
        if let Some(offset) = self.uart_register(address) {
            return Some(match offset as u8 {
                uart::RBR_THR_OFFSET => self.rx.pop_front().unwrap_or(0) as u32,
                uart::LSR_OFFSET => self.line_status(),
                _ => 0,
            });
        }
        let Some((start, region)) = self.region(address, len) else {
            self.stats.faults += 1;
            warn!("sim: load from unmapped {:#X}", address);
            return None;
        };
        let mut bytes = [0u8; 4];
        // Safety: `region` was mapped from live host memory, and the access
        // is in bounds.
        unsafe {
            core::ptr::copy_nonoverlapping(
                (region.host as *const u8).add(start),
                bytes.as_mut_ptr(),
                len,
            );
        }
        Some(u32::from_le_bytes(bytes))
    }

    fn store(&mut self, address: u32, len: usize, value: u32) {
        if let Some(offset) = self.uart_register(address) {
            if offset as u8 == uart::RBR_THR_OFFSET {
                self.transmit(value as u8);
            }
            return;
        }
        let Some((start, region)) = self.region(address, len) else {
            self.stats.faults += 1;
            warn!("sim: store to unmapped {:#X}", address);
            return;
        };
        let bytes = value.to_le_bytes();
        // Safety: see `load`.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), (region.host as *mut u8).add(start), len);
        }
    }

    /// Move one element. Returns `false` if nothing moved.
    fn step(&mut self) -> bool {
        let Some(mut job) = self.job else {
            return false;
        };
        let condition = job.condition;
        if condition.enable {
            let base = match condition.conditional_type {
                ConditionType::Read => job.source,
                ConditionType::Write => job.destination,
            };
            let status = self.peek(base.wrapping_add(condition.cond_addr_offset as u32));
            if !condition.permits(status) {
                return false;
            }
        }

        let control = job.control;
        let size = control.transfer_size.bytes();
        let stride = |increment: bool| {
            if increment {
                job.moved as u32 * size as u32
            } else {
                0
            }
        };
        let from = job
            .source
            .wrapping_add(control.src_offset as u32)
            .wrapping_add(stride(control.increment_src));
        let to = job
            .destination
            .wrapping_add(control.dst_offset as u32)
            .wrapping_add(stride(control.increment_dst));

        if let Some(value) = self.load(from, size) {
            self.receives += 1;
            self.store(to, size, value);
            self.transmissions += 1;
        }

        job.moved += 1;
        if job.moved == control.num_transfers {
            self.job = None;
            if control.interrupt_enable {
                self.irq_pending = true;
            }
        } else {
            self.job = Some(job);
        }
        true
    }

    /// The line that wakes `wfi`, whether or not traps are masked
    fn wake_pending(&self) -> bool {
        self.irq_pending && self.mie & (1 << ral::DMA_IRQ_CAUSE) != 0
    }

    fn stop(&mut self) {
        if self.ignored_stops > 0 {
            self.ignored_stops -= 1;
            return;
        }
        if self.job.take().is_some() {
            self.stats.aborts += 1;
        }
    }
}

/// A simulated DMA engine
pub struct Sim {
    state: Mutex<RefCell<State>>,
    trap: Mutex<Cell<Option<&'static (dyn Trap + Sync)>>>,
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl Sim {
    /// An idle engine with nothing mapped
    pub fn new() -> Self {
        Sim {
            state: Mutex::new(RefCell::new(State::default())),
            trap: Mutex::new(Cell::new(None)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        critical_section::with(|cs| f(&mut self.state(cs).borrow_mut()))
    }

    fn state<'cs>(&'cs self, cs: CriticalSection<'cs>) -> &'cs RefCell<State> {
        self.state.borrow(cs)
    }

    /// Deliver traps to `trap`
    pub fn attach(&self, trap: &'static (dyn Trap + Sync)) {
        critical_section::with(|cs| self.trap.borrow(cs).set(Some(trap)));
    }

    /// Queue bytes in the UART receiver
    pub fn feed(&self, bytes: &[u8]) {
        self.with(|state| state.rx.extend(bytes.iter().copied()));
    }

    /// Queue bytes that the UART receives after the next transmitted byte
    ///
    /// Models a link partner that answers each handshake with a block of
    /// data. Responses are released in the order they were queued.
    pub fn respond(&self, bytes: &[u8]) {
        self.with(|state| state.responses.push_back(bytes.to_vec()));
    }

    /// Bytes transmitted by the UART so far
    pub fn transmitted(&self) -> Vec<u8> {
        self.with(|state| state.tx.clone())
    }

    /// Bytes waiting in the UART receiver
    pub fn pending_rx(&self) -> usize {
        self.with(|state| state.rx.len())
    }

    /// Register writes so far, oldest first
    pub fn writes(&self) -> Vec<(Register, u32)> {
        self.with(|state| state.writes.clone())
    }

    /// Event counters
    pub fn stats(&self) -> Stats {
        self.with(|state| state.stats)
    }

    /// Indicates if a transfer is running
    pub fn is_active(&self) -> bool {
        self.with(|state| state.job.is_some())
    }

    /// Indicates if the engine's interrupt line is unmasked
    pub fn irq_armed(&self) -> bool {
        self.with(|state| state.mie & (1 << ral::DMA_IRQ_CAUSE) != 0)
    }

    /// Indicates if a completion interrupt waits to be acknowledged
    pub fn irq_pending(&self) -> bool {
        self.with(|state| state.irq_pending)
    }

    /// Ignore the next `count` stop requests
    ///
    /// Models an engine that finishes the element in flight before it
    /// honors a stop.
    pub fn ignore_stops(&self, count: usize) {
        self.with(|state| state.ignored_stops = count);
    }

    /// Move one element, if the running transfer can make progress
    ///
    /// Returns `true` if an element moved.
    pub fn tick(&self) -> bool {
        self.with(State::step)
    }

    /// Take a pending trap, if it's deliverable
    fn deliver(&self) -> bool {
        let trap = critical_section::with(|cs| {
            let mut state = self.state(cs).borrow_mut();
            let deliverable = state.wake_pending() && state.mstatus_mie && state.masked == 0;
            let trap = self.trap.borrow(cs).get().filter(|_| deliverable);
            if trap.is_some() {
                state.stats.traps += 1;
            }
            trap
        });
        match trap {
            // Outside of the critical section, like a real trap.
            Some(trap) => trap.trap(Cause::interrupt(ral::DMA_IRQ_CAUSE).raw()),
            None => false,
        }
    }

    /// Step the model, taking traps, until no more progress is possible or
    /// `limit` steps ran
    ///
    /// Returns the number of elements moved.
    pub fn run(&self, limit: usize) -> usize {
        let mut moved = 0;
        while moved < limit {
            self.deliver();
            if !self.tick() {
                break;
            }
            moved += 1;
        }
        self.deliver();
        moved
    }
}

impl Registers for Sim {
    fn read(&self, register: Register) -> u32 {
        self.with(|state| match register {
            Register::Source => state.source,
            Register::Destination => state.destination,
            Register::Control => (state.control & !1) | state.job.is_some() as u32,
            Register::Condition => state.condition,
            Register::Interrupt => {
                let pending = core::mem::take(&mut state.irq_pending);
                if pending {
                    state.stats.acknowledged += 1;
                }
                pending as u32
            }
            Register::Activate => 0,
            Register::Status => {
                state.step();
                state.status().encode()
            }
        })
    }

    fn write(&self, register: Register, value: u32) {
        self.with(|state| {
            state.writes.push((register, value));
            match register {
                Register::Source => state.source = value,
                Register::Destination => state.destination = value,
                Register::Condition => state.condition = value,
                Register::Control => {
                    state.control = value;
                    state.stats.programs += 1;
                    if Control::decode(value).activate {
                        state.start();
                    }
                }
                Register::Interrupt => state.stop(),
                Register::Activate => {
                    state.stats.activations += 1;
                    state.start();
                }
                Register::Status => {}
            }
        })
    }

    fn dma_address(&self, ptr: *const u8, len: usize) -> u32 {
        self.with(|state| state.map(ptr as usize, len))
    }
}

impl Cpu for Sim {
    fn enable_irq(&self, code: u32) {
        self.with(|state| {
            state.mie |= 1 << code;
            state.mstatus_mie = true;
        });
    }

    fn disable_irq(&self, code: u32) {
        self.with(|state| state.mie &= !(1 << code));
    }

    /// Step until a trap is taken or, with traps masked, until the engine's
    /// line is pending
    ///
    /// # Panics
    ///
    /// Panics if nothing can ever wake the hart: the engine is idle or
    /// stalled, and its line isn't pending.
    fn wait_for_interrupt(&self) {
        loop {
            if self.deliver() || self.with(|state| state.wake_pending()) {
                return;
            }
            if !self.tick() {
                panic!("sim: wfi with no interrupt to wake the hart");
            }
        }
    }

    fn without_interrupts(&self, f: &mut dyn FnMut()) {
        self.with(|state| state.masked += 1);
        f();
        let masked = self.with(|state| {
            state.masked -= 1;
            state.masked
        });
        if masked == 0 {
            self.deliver();
        }
    }
}

/// The simulated UART, as a DMA source and destination
#[derive(Clone, Copy)]
pub struct Uart<'a> {
    sim: &'a Sim,
    handshake: Option<u8>,
}

impl<'a> Uart<'a> {
    /// The UART at [`UART_BASE`]
    pub fn new(sim: &'a Sim) -> Self {
        Uart {
            sim,
            handshake: None,
        }
    }

    /// Transmit `byte` before each fill
    pub fn with_handshake(self, byte: u8) -> Self {
        Uart {
            handshake: Some(byte),
            ..self
        }
    }
}

// Safety: the UART window is in the engine's address space, and the data
// register is byte-wide.
unsafe impl crate::peripheral::Source<u8> for Uart<'_> {
    fn address(&self) -> u32 {
        UART_BASE
    }
    fn offset(&self) -> u8 {
        uart::RBR_THR_OFFSET
    }
    fn condition(&self) -> Condition {
        crate::peripheral::Uart::RX_READY
    }
    fn prime(&self) {
        if let Some(byte) = self.handshake {
            self.sim.with(|state| state.transmit(byte));
        }
    }
}

// Safety: see the `Source` implementation.
unsafe impl crate::peripheral::Destination<u8> for Uart<'_> {
    fn address(&self) -> u32 {
        UART_BASE
    }
    fn offset(&self) -> u8 {
        uart::RBR_THR_OFFSET
    }
    fn condition(&self) -> Condition {
        crate::peripheral::Uart::TX_READY
    }
}

#[cfg(test)]
pub(crate) fn fixture() -> (&'static Sim, &'static crate::Engine<&'static Sim>) {
    use crate::{interrupt::Dispatcher, Engine};
    use std::boxed::Box;

    let sim: &'static Sim = Box::leak(Box::new(Sim::new()));
    let engine: &'static Engine<&'static Sim> = Box::leak(Box::new(Engine::new(sim)));
    let dispatcher: &'static Dispatcher<1> = Box::leak(Box::new(Dispatcher::new()));
    engine.route(dispatcher).unwrap();
    sim.attach(dispatcher);
    (sim, engine)
}
