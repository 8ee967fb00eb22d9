//! DMA-powered memcpy

use crate::{
    peripheral::check_count, registers::Registers, Completion, Condition, Control, Cpu, Element,
    Engine,
};

/// Perform a DMA-powered `memcpy` between the `source` and `destination` buffers
///
/// Copies the minimum number of elements between the two buffers, streaming
/// without a condition. Blocks until the copy is done, then returns the
/// number of elements copied.
///
/// If you use [`Completion::Interrupt`], the engine must be routed in the
/// trap dispatcher.
pub fn memcpy<R, E, C>(
    engine: &Engine<R>,
    source: &[E],
    destination: &mut [E],
    completion: Completion,
    cpu: &C,
) -> crate::Result<usize>
where
    R: Registers,
    E: Element,
    C: Cpu,
{
    let len = source.len().min(destination.len());
    let num_transfers = check_count(len)?;
    if num_transfers == 0 {
        return Ok(0);
    }

    let bytes = len * core::mem::size_of::<E>();
    let registers = engine.registers();
    let src = registers.dma_address(source.as_ptr().cast::<u8>(), bytes);
    let dst = registers.dma_address(destination.as_mut_ptr().cast::<u8>(), bytes);
    let control = Control {
        num_transfers,
        increment_src: true,
        increment_dst: true,
        transfer_size: E::SIZE,
        activate: true,
        ..Control::default()
    };

    let status = engine.execute(src, dst, control, Condition::NONE, completion, cpu);
    Ok(status.completed_transmissions as usize)
}

#[cfg(test)]
mod tests {
    use super::memcpy;
    use crate::{sim, Completion, Error, Spin};
    use std::{vec, vec::Vec};

    #[test]
    fn words_by_polling() {
        let (sim, engine) = sim::fixture();
        let source: Vec<u32> = (0..64).map(|word| word * 0x0101_0101).collect();
        let mut destination = vec![0u32; 64];

        let copied = memcpy(engine, &source, &mut destination, Completion::Poll, &Spin).unwrap();

        assert_eq!(copied, 64);
        assert_eq!(destination, source);
        assert_eq!(sim.stats().traps, 0);
    }

    #[test]
    fn shorter_buffer_wins() {
        let (sim, engine) = sim::fixture();
        let source = *b"condition-gated";
        let mut destination = [0u8; 9];

        let copied = memcpy(engine, &source, &mut destination, Completion::Interrupt, sim).unwrap();

        assert_eq!(copied, 9);
        assert_eq!(&destination, b"condition");
        assert_eq!(sim.stats().traps, 1);
        assert_eq!(sim.stats().faults, 0);
    }

    #[test]
    fn nothing_to_copy() {
        let (sim, engine) = sim::fixture();
        let mut destination = [0u32; 4];
        assert_eq!(
            memcpy(engine, &[], &mut destination, Completion::Interrupt, sim),
            Ok(0)
        );
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn too_many_elements() {
        let (sim, engine) = sim::fixture();
        let source = vec![0u8; 4096];
        let mut destination = vec![0u8; 2048];
        assert_eq!(
            memcpy(engine, &source, &mut destination, Completion::Poll, &Spin),
            Err(Error::TransferCount(2048))
        );
        assert!(sim.writes().is_empty());
    }
}
