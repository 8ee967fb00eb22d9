//! Control, condition, and status words
//!
//! Every field is shifted into place and masked to its width. Values that
//! don't fit are truncated, not rejected; callers that care about range
//! check before encoding (see [`Control::MAX_TRANSFERS`]).

use crate::ral::dma::{COND, CTRL, STATUS};

const fn insert(value: u32, offset: u32, mask: u32) -> u32 {
    (value << offset) & mask
}

const fn extract(word: u32, offset: u32, mask: u32) -> u32 {
    (word & mask) >> offset
}

/// Width of each element moved by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferSize {
    /// 32-bit elements
    #[default]
    Word,
    /// 8-bit elements
    Byte,
}

impl TransferSize {
    /// Element width in bytes
    pub const fn bytes(self) -> usize {
        match self {
            TransferSize::Word => 4,
            TransferSize::Byte => 1,
        }
    }

    const fn raw(self) -> u32 {
        match self {
            TransferSize::Word => CTRL::TRANSFER_SIZE::RW::WORD,
            TransferSize::Byte => CTRL::TRANSFER_SIZE::RW::BYTE,
        }
    }

    const fn from_raw(raw: u32) -> Self {
        if raw == CTRL::TRANSFER_SIZE::RW::BYTE {
            TransferSize::Byte
        } else {
            TransferSize::Word
        }
    }
}

/// Which side of a transfer the gating status register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConditionType {
    /// Test a register in the source window before each read
    #[default]
    Read,
    /// Test a register in the destination window before each write
    Write,
}

impl ConditionType {
    const fn raw(self) -> u32 {
        match self {
            ConditionType::Read => COND::TYPE::RW::READ,
            ConditionType::Write => COND::TYPE::RW::WRITE,
        }
    }

    const fn from_raw(raw: u32) -> Self {
        if raw == COND::TYPE::RW::WRITE {
            ConditionType::Write
        } else {
            ConditionType::Read
        }
    }
}

/// Fields of the control word
///
/// Writing an encoded control word with `activate` set starts the transfer
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Control {
    /// Byte offset into the source window
    pub src_offset: u8,
    /// Byte offset into the destination window
    pub dst_offset: u8,
    /// Number of elements to move (11 bits)
    pub num_transfers: u16,
    /// Raise the completion interrupt
    pub interrupt_enable: bool,
    /// Advance the source address after each element
    pub increment_src: bool,
    /// Advance the destination address after each element
    pub increment_dst: bool,
    /// Element width
    pub transfer_size: TransferSize,
    /// Start the transfer
    pub activate: bool,
}

impl Control {
    /// Largest element count the control word can hold
    pub const MAX_TRANSFERS: u16 = (CTRL::NUM_TRANSFERS::mask >> CTRL::NUM_TRANSFERS::offset) as u16;

    /// Pack the fields into a control word
    pub const fn encode(&self) -> u32 {
        insert(self.src_offset as u32, CTRL::SRC_OFFSET::offset, CTRL::SRC_OFFSET::mask)
            | insert(self.dst_offset as u32, CTRL::DST_OFFSET::offset, CTRL::DST_OFFSET::mask)
            | insert(
                self.num_transfers as u32,
                CTRL::NUM_TRANSFERS::offset,
                CTRL::NUM_TRANSFERS::mask,
            )
            | insert(self.interrupt_enable as u32, CTRL::IRQ_ENABLE::offset, CTRL::IRQ_ENABLE::mask)
            | insert(self.increment_src as u32, CTRL::INC_SRC::offset, CTRL::INC_SRC::mask)
            | insert(self.increment_dst as u32, CTRL::INC_DST::offset, CTRL::INC_DST::mask)
            | insert(
                self.transfer_size.raw(),
                CTRL::TRANSFER_SIZE::offset,
                CTRL::TRANSFER_SIZE::mask,
            )
            | insert(self.activate as u32, CTRL::ACTIVATE::offset, CTRL::ACTIVATE::mask)
    }

    /// Unpack a control word
    pub const fn decode(word: u32) -> Self {
        Control {
            src_offset: extract(word, CTRL::SRC_OFFSET::offset, CTRL::SRC_OFFSET::mask) as u8,
            dst_offset: extract(word, CTRL::DST_OFFSET::offset, CTRL::DST_OFFSET::mask) as u8,
            num_transfers: extract(word, CTRL::NUM_TRANSFERS::offset, CTRL::NUM_TRANSFERS::mask)
                as u16,
            interrupt_enable: extract(word, CTRL::IRQ_ENABLE::offset, CTRL::IRQ_ENABLE::mask) != 0,
            increment_src: extract(word, CTRL::INC_SRC::offset, CTRL::INC_SRC::mask) != 0,
            increment_dst: extract(word, CTRL::INC_DST::offset, CTRL::INC_DST::mask) != 0,
            transfer_size: TransferSize::from_raw(extract(
                word,
                CTRL::TRANSFER_SIZE::offset,
                CTRL::TRANSFER_SIZE::mask,
            )),
            activate: extract(word, CTRL::ACTIVATE::offset, CTRL::ACTIVATE::mask) != 0,
        }
    }
}

/// Fields of the condition word
///
/// When enabled, the engine moves an element only after the register at
/// `cond_addr_offset` has any of the `bitmask` bits set (or, with `negate`,
/// none of them set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Condition {
    /// Offset of the status register, relative to the side named by `conditional_type`
    pub cond_addr_offset: u8,
    /// Status bits to test
    pub bitmask: u8,
    /// Which side owns the status register
    pub conditional_type: ConditionType,
    /// Invert the test
    pub negate: bool,
    /// Gate transfers; `false` streams unconditionally
    pub enable: bool,
}

impl Condition {
    /// Unconditional streaming
    pub const NONE: Condition = Condition {
        cond_addr_offset: 0,
        bitmask: 0,
        conditional_type: ConditionType::Read,
        negate: false,
        enable: false,
    };

    /// Pack the fields into a condition word
    pub const fn encode(&self) -> u32 {
        insert(self.cond_addr_offset as u32, COND::ADDR_OFFSET::offset, COND::ADDR_OFFSET::mask)
            | insert(self.bitmask as u32, COND::BITMASK::offset, COND::BITMASK::mask)
            | insert(self.conditional_type.raw(), COND::TYPE::offset, COND::TYPE::mask)
            | insert(self.negate as u32, COND::NEGATE::offset, COND::NEGATE::mask)
            | insert(self.enable as u32, COND::ENABLE::offset, COND::ENABLE::mask)
    }

    /// Unpack a condition word
    pub const fn decode(word: u32) -> Self {
        Condition {
            cond_addr_offset: extract(word, COND::ADDR_OFFSET::offset, COND::ADDR_OFFSET::mask)
                as u8,
            bitmask: extract(word, COND::BITMASK::offset, COND::BITMASK::mask) as u8,
            conditional_type: ConditionType::from_raw(extract(
                word,
                COND::TYPE::offset,
                COND::TYPE::mask,
            )),
            negate: extract(word, COND::NEGATE::offset, COND::NEGATE::mask) != 0,
            enable: extract(word, COND::ENABLE::offset, COND::ENABLE::mask) != 0,
        }
    }

    /// Evaluate the condition against a status register value
    pub const fn permits(&self, status: u32) -> bool {
        !self.enable || (status & self.bitmask as u32 != 0) != self.negate
    }
}

/// A snapshot of the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// The engine is executing a transfer
    pub active: bool,
    /// Elements read from the source during the last transfer
    pub completed_receives: u16,
    /// Elements written to the destination during the last transfer
    pub completed_transmissions: u16,
}

impl Status {
    /// Unpack a status word
    ///
    /// Counters are taken as-is; nothing is subtracted from them.
    pub const fn decode(word: u32) -> Self {
        Status {
            active: extract(word, STATUS::ACTIVE::offset, STATUS::ACTIVE::mask) != 0,
            completed_receives: extract(
                word,
                STATUS::COMPLETED_RECEIVES::offset,
                STATUS::COMPLETED_RECEIVES::mask,
            ) as u16,
            completed_transmissions: extract(
                word,
                STATUS::COMPLETED_TRANSMISSIONS::offset,
                STATUS::COMPLETED_TRANSMISSIONS::mask,
            ) as u16,
        }
    }

    /// Pack a status word, as the hardware presents it
    pub const fn encode(&self) -> u32 {
        insert(self.active as u32, STATUS::ACTIVE::offset, STATUS::ACTIVE::mask)
            | insert(
                self.completed_receives as u32,
                STATUS::COMPLETED_RECEIVES::offset,
                STATUS::COMPLETED_RECEIVES::mask,
            )
            | insert(
                self.completed_transmissions as u32,
                STATUS::COMPLETED_TRANSMISSIONS::offset,
                STATUS::COMPLETED_TRANSMISSIONS::mask,
            )
    }
}

/// Encode a control word
pub const fn encode_control(control: &Control) -> u32 {
    control.encode()
}

/// Encode a condition word
pub const fn encode_condition(condition: &Condition) -> u32 {
    condition.encode()
}

/// Decode a status word
pub const fn decode_status(word: u32) -> Status {
    Status::decode(word)
}

/// Flip the destination offset of an encoded control word between the two
/// halves of a double buffer
///
/// `half_bytes` is XOR-ed into the `dst_offset` field, so applying the
/// toggle twice gives back the original word.
pub const fn toggle_destination(control: u32, half_bytes: u8) -> u32 {
    control ^ insert(half_bytes as u32, CTRL::DST_OFFSET::offset, CTRL::DST_OFFSET::mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UART_RX: Control = Control {
        src_offset: 0x20,
        dst_offset: 0,
        num_transfers: 32,
        interrupt_enable: true,
        increment_src: false,
        increment_dst: true,
        transfer_size: TransferSize::Byte,
        activate: true,
    };

    #[test]
    fn control_layout() {
        // 0x20 << 24 | 32 << 5 | irq | inc_dst | byte | activate
        assert_eq!(UART_RX.encode(), 0x2000_0417);
        assert_eq!(encode_control(&UART_RX), UART_RX.encode());
    }

    #[test]
    fn control_fields_land_in_their_bits() {
        let only = |control: Control| control.encode();
        let base = Control::default();
        assert_eq!(only(Control { src_offset: 0xFF, ..base }), 0xFF00_0000);
        assert_eq!(only(Control { dst_offset: 0xFF, ..base }), 0x00FF_0000);
        assert_eq!(only(Control { num_transfers: 0x7FF, ..base }), 0x0000_FFE0);
        assert_eq!(only(Control { interrupt_enable: true, ..base }), 1 << 4);
        assert_eq!(only(Control { increment_src: true, ..base }), 1 << 3);
        assert_eq!(only(Control { increment_dst: true, ..base }), 1 << 2);
        assert_eq!(only(Control { transfer_size: TransferSize::Byte, ..base }), 1 << 1);
        assert_eq!(only(Control { activate: true, ..base }), 1);
    }

    #[test]
    fn control_round_trip() {
        for num_transfers in 0..=Control::MAX_TRANSFERS {
            let control = Control {
                src_offset: num_transfers as u8,
                dst_offset: !(num_transfers as u8),
                num_transfers,
                interrupt_enable: num_transfers % 2 == 0,
                increment_src: num_transfers % 3 == 0,
                increment_dst: num_transfers % 5 == 0,
                transfer_size: if num_transfers % 7 == 0 {
                    TransferSize::Byte
                } else {
                    TransferSize::Word
                },
                activate: num_transfers % 11 == 0,
            };
            assert_eq!(Control::decode(control.encode()), control);
        }
    }

    #[test]
    fn transfer_count_is_truncated() {
        assert_eq!(Control::MAX_TRANSFERS, 2047);
        let zero = Control { num_transfers: 0, ..UART_RX };
        let wrapped = Control { num_transfers: 2048, ..UART_RX };
        assert_eq!(wrapped.encode(), zero.encode());

        let over = Control { num_transfers: 2049, ..UART_RX };
        assert_eq!(Control::decode(over.encode()).num_transfers, 1);
        // Truncation never leaks into the neighbouring fields.
        assert_eq!(Control::decode(over.encode()).dst_offset, 0);
    }

    #[test]
    fn condition_layout() {
        let lsr_data_ready = Condition {
            cond_addr_offset: 0x14,
            bitmask: 1,
            conditional_type: ConditionType::Read,
            negate: false,
            enable: true,
        };
        assert_eq!(lsr_data_ready.encode(), 0x1401_0001);

        let thr_empty = Condition {
            cond_addr_offset: 0x14,
            bitmask: 1 << 5,
            conditional_type: ConditionType::Write,
            negate: true,
            enable: true,
        };
        assert_eq!(encode_condition(&thr_empty), 0x1420_0007);
        assert_eq!(Condition::NONE.encode(), 0);
    }

    #[test]
    fn condition_round_trip() {
        for bitmask in 0..=u8::MAX {
            let condition = Condition {
                cond_addr_offset: bitmask.rotate_left(3),
                bitmask,
                conditional_type: if bitmask & 1 == 0 {
                    ConditionType::Read
                } else {
                    ConditionType::Write
                },
                negate: bitmask & 2 != 0,
                enable: bitmask & 4 != 0,
            };
            assert_eq!(Condition::decode(condition.encode()), condition);
        }
    }

    #[test]
    fn condition_polarity() {
        let ready = Condition {
            cond_addr_offset: 0x14,
            bitmask: 0b0010_0001,
            conditional_type: ConditionType::Read,
            negate: false,
            enable: true,
        };
        assert!(ready.permits(0x01));
        assert!(ready.permits(0x20));
        assert!(!ready.permits(0x00));

        let busy = Condition { negate: true, ..ready };
        assert!(busy.permits(0x00));
        assert!(!busy.permits(0x21));

        assert!(Condition::NONE.permits(0));
    }

    #[test]
    fn status_counters_are_not_offset() {
        let status = decode_status(0);
        assert_eq!(status, Status::default());

        let word = (5 << 21) | (7 << 10) | 1;
        assert_eq!(
            decode_status(word),
            Status {
                active: true,
                completed_receives: 5,
                completed_transmissions: 7
            }
        );
    }

    #[test]
    fn status_round_trip() {
        for count in (0..=Control::MAX_TRANSFERS).step_by(13) {
            let status = Status {
                active: count % 2 == 1,
                completed_receives: count,
                completed_transmissions: Control::MAX_TRANSFERS - count,
            };
            assert_eq!(Status::decode(status.encode()), status);
        }
    }

    #[test]
    fn destination_toggle_pairs_up() {
        let word = UART_RX.encode();
        let flipped = toggle_destination(word, 32);
        assert_eq!(Control::decode(flipped).dst_offset, 32);
        assert_eq!(
            Control::decode(flipped),
            Control {
                dst_offset: 32,
                ..UART_RX
            }
        );
        assert_eq!(toggle_destination(flipped, 32), word);

        for half in 0..=u8::MAX {
            assert_eq!(toggle_destination(toggle_destination(word, half), half), word);
        }
    }
}
