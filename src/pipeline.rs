//! Double-buffered streaming
//!
//! A [`Pipeline`] overlaps peripheral input with computation. It splits one
//! buffer into two halves. While the engine fills one half from a
//! [`Source`], the CPU computes on the other. Each window, the halves swap.
//!
//! ```text
//! window:    0           1           2     ...   N-1
//! engine:  fill A  |  fill B  |  fill A  | ... |
//! cpu:             | compute A | compute B | ... | compute last
//! ```
//!
//! The pipeline never computes on a half before its fill has completed, and
//! never issues a fill after the last window.

use crate::{
    peripheral::{check_count, Source},
    registers::Registers,
    toggle_destination, Completion, Control, Cpu, Element, Engine, Error,
};

/// One half of the double buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    /// The lower half, at destination offset 0
    First,
    /// The upper half
    Second,
}

impl Half {
    /// The other half
    pub const fn other(self) -> Self {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }
}

/// Where the pipeline is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Not running
    Idle,
    /// The engine is filling a half, and there's nothing to compute yet
    Filling(Half),
    /// A half is filled, and waits for computation
    Ready(Half),
    /// The CPU is computing on a half
    Computing(Half),
}

/// What to do when a fill completes before the computation that ran
/// alongside it
///
/// The engine then sits idle until the next window. No data is lost, but
/// the computation is the bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Overrun {
    /// Don't check
    Ignore,
    /// Log, and count in the [`Report`]
    #[default]
    Warn,
    /// Stop the pipeline with [`Error::Overrun`]
    Fail,
}

/// A pipeline phase, as presented on a [`SignalLine`]
///
/// Each code carries the last computation result in its low bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Waiting on, or issuing, a fill
    Loading,
    /// A fill completed
    Setup,
    /// About to compute, with the engine busy filling ahead (or not)
    Computing {
        /// The engine is busy
        busy: bool,
    },
    /// All windows computed
    Done,
}

impl Phase {
    /// The signal-line code for this phase
    pub const fn code(self, result: u32) -> u32 {
        match self {
            Phase::Loading => 2 + result,
            Phase::Setup | Phase::Done => result,
            Phase::Computing { busy } => ((busy as u32) << 1) + 4 + result,
        }
    }
}

/// An output that traces the pipeline's progress
///
/// Use it to drive a GPIO, so that a logic analyzer or testbench can follow
/// along. `()` discards the trace.
pub trait SignalLine {
    /// Present `code` on the line
    fn write(&mut self, code: u32);
}

impl SignalLine for () {
    fn write(&mut self, _: u32) {}
}

impl<L: SignalLine + ?Sized> SignalLine for &mut L {
    fn write(&mut self, code: u32) {
        (**self).write(code)
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Number of windows to fill and compute
    pub windows: usize,
    /// How to wait on each fill
    pub completion: Completion,
    /// Fill-before-compute policy
    pub overrun: Overrun,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            windows: 1,
            completion: Completion::Interrupt,
            overrun: Overrun::default(),
        }
    }
}

/// What a pipeline run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
    /// Computation steps
    pub computes: usize,
    /// Fills issued, including the first
    pub fills: usize,
    /// Fills issued while a computation was pending
    pub fills_ahead: usize,
    /// Fills that completed before the computation running alongside them
    pub overruns: usize,
    /// The last computation result
    pub result: u32,
}

/// A double-buffered transfer pipeline
///
/// See the [module documentation](crate::pipeline) for the flow. The
/// pipeline borrows the engine for its lifetime. It owns the engine while
/// running; don't issue other transfers from a trap handler.
pub struct Pipeline<'a, R, C, E> {
    engine: &'a Engine<R>,
    cpu: &'a C,
    buffer: &'a mut [E],
    config: Config,
    state: State,
}

impl<'a, R, C, E> Pipeline<'a, R, C, E>
where
    R: Registers,
    C: Cpu,
    E: Element,
{
    /// Create a pipeline over `buffer`
    ///
    /// `buffer` holds both halves. Its length must be even and non-zero,
    /// each half must fit one transfer, and the byte size of a half must fit
    /// the control word's destination offset.
    pub fn new(
        engine: &'a Engine<R>,
        cpu: &'a C,
        buffer: &'a mut [E],
        config: Config,
    ) -> crate::Result<Self> {
        if config.windows == 0 {
            return Err(Error::NoWindows);
        }
        if buffer.is_empty() || buffer.len() % 2 != 0 {
            return Err(Error::Layout(buffer.len()));
        }
        let half = buffer.len() / 2;
        check_count(half)?;
        let half_bytes = half * E::SIZE.bytes();
        if half_bytes > u8::MAX as usize {
            return Err(Error::Offset(half_bytes));
        }
        Ok(Pipeline {
            engine,
            cpu,
            buffer,
            config,
            state: State::Idle,
        })
    }

    /// Where the pipeline is
    pub fn state(&self) -> State {
        self.state
    }

    /// The half the engine is filling, if any
    pub fn filling(&self) -> Option<Half> {
        match self.state {
            State::Filling(half) => Some(half),
            State::Idle | State::Ready(_) | State::Computing(_) => None,
        }
    }

    /// Elements per half
    pub fn half_len(&self) -> usize {
        self.buffer.len() / 2
    }

    fn half(&self, half: Half) -> &[E] {
        let (first, second) = self.buffer.split_at(self.half_len());
        match half {
            Half::First => first,
            Half::Second => second,
        }
    }

    fn arm(&self) {
        if self.config.completion == Completion::Interrupt {
            self.cpu.enable_irq(self.engine.cause());
        }
    }

    fn disarm(&self) {
        if self.config.completion == Completion::Interrupt {
            self.cpu.disable_irq(self.engine.cause());
        }
    }

    /// Fill and compute every window
    ///
    /// `compute` runs once per window on the filled half. Its result is
    /// traced on `signal`, and returned in the [`Report`].
    pub fn run<S, L, F>(
        &mut self,
        source: &S,
        mut signal: L,
        mut compute: F,
    ) -> crate::Result<Report>
    where
        S: Source<E>,
        L: SignalLine,
        F: FnMut(&[E]) -> u32,
    {
        let half_len = self.half_len();
        let half_bytes = (half_len * E::SIZE.bytes()) as u8;
        let windows = self.config.windows;
        let mut report = Report::default();

        let destination = self.engine.registers().dma_address(
            self.buffer.as_mut_ptr().cast::<u8>(),
            core::mem::size_of_val(self.buffer),
        );
        let mut control = Control {
            src_offset: source.offset(),
            dst_offset: 0,
            num_transfers: half_len as u16,
            interrupt_enable: self.config.completion.interrupt_enable(),
            increment_src: false,
            increment_dst: true,
            transfer_size: E::SIZE,
            activate: true,
        }
        .encode();
        let mut filling = Half::First;

        debug!("Pipeline: {} windows of {} elements", windows, half_len);
        source.prime();
        self.arm();
        self.engine.program(
            source.address(),
            destination,
            control,
            source.condition().encode(),
        );
        report.fills += 1;
        self.state = State::Filling(filling);

        for window in 0..windows {
            signal.write(Phase::Loading.code(report.result));

            let ready = filling;
            filling = filling.other();
            control = toggle_destination(control, half_bytes);

            self.engine.wait(self.config.completion, self.cpu);
            self.state = State::Ready(ready);
            signal.write(Phase::Setup.code(report.result));

            let ahead = window + 1 != windows;
            if ahead {
                signal.write(Phase::Loading.code(report.result));
                source.prime();
                self.arm();
                self.engine.set_control(control);
                report.fills += 1;
                report.fills_ahead += 1;
            }

            let busy = self.engine.busy();
            signal.write(Phase::Computing { busy }.code(report.result));
            self.state = State::Computing(ready);
            report.result = compute(self.half(ready));
            report.computes += 1;
            trace!("Pipeline: window {} computed {}", window, report.result);

            if ahead && self.config.overrun != Overrun::Ignore && self.engine.ready() {
                report.overruns += 1;
                warn!("Pipeline: window {} computed after the next fill", window);
                if self.config.overrun == Overrun::Fail {
                    self.engine.abort();
                    self.disarm();
                    self.state = State::Idle;
                    return Err(Error::Overrun { window });
                }
            }
            if ahead {
                self.state = State::Filling(filling);
            }
        }

        signal.write(Phase::Done.code(report.result));
        self.disarm();
        self.state = State::Idle;
        Ok(report)
    }
}
