use crate::opcode::Opcode;
use crate::panic_reason::PanicReason;
use crate::types::{Immediate16, RegisterId};

use core::iter;

/// A single fixed-width machine instruction.
///
/// Layout on the wire:
///
/// ```text
/// byte 0 : opcode
/// byte 1 : dst register (or first operand)
/// byte 2 : src/left register  (or low byte of u16 immediate)
/// byte 3 : src/right register (or high byte of u16 immediate)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    op: Opcode,
    a: u8,
    b: u8,
    c: u8,
}

impl Instruction {
    /// Size of an instruction in bytes.
    pub const LEN: usize = 4;

    /// Filler for operand slots an opcode doesn't use.
    const PAD: u8 = 0x00;

    const fn with_imm(op: Opcode, a: u8, imm: Immediate16) -> Self {
        let bytes = imm.to_le_bytes();
        Self {
            op,
            a,
            b: bytes[0],
            c: bytes[1],
        }
    }

    /// `loadc dst, index` — materialize the pool entry at `index` into `dst`.
    pub const fn load_const(dst: RegisterId, index: Immediate16) -> Self {
        Self::with_imm(Opcode::LoadConst, dst, index)
    }

    /// `loads dst, index` — read the slot named by the pool entry at `index`.
    pub const fn load_slot(dst: RegisterId, index: Immediate16) -> Self {
        Self::with_imm(Opcode::LoadSlot, dst, index)
    }

    /// `mov dst, src`.
    pub const fn mov(dst: RegisterId, src: RegisterId) -> Self {
        Self {
            op: Opcode::Move,
            a: dst,
            b: src,
            c: Self::PAD,
        }
    }

    /// `add dst, left, right`.
    pub const fn add(dst: RegisterId, left: RegisterId, right: RegisterId) -> Self {
        Self {
            op: Opcode::Add,
            a: dst,
            b: left,
            c: right,
        }
    }

    /// `eq dst, left, right`.
    pub const fn eq(dst: RegisterId, left: RegisterId, right: RegisterId) -> Self {
        Self {
            op: Opcode::Eq,
            a: dst,
            b: left,
            c: right,
        }
    }

    /// `fillempty dst, left, right`.
    pub const fn fill_empty(dst: RegisterId, left: RegisterId, right: RegisterId) -> Self {
        Self {
            op: Opcode::FillEmpty,
            a: dst,
            b: left,
            c: right,
        }
    }

    /// `testeq left, right`.
    pub const fn test_eq(left: RegisterId, right: RegisterId) -> Self {
        Self {
            op: Opcode::TestEq,
            a: left,
            b: right,
            c: Self::PAD,
        }
    }

    /// `testt reg`.
    pub const fn test_truthy(reg: RegisterId) -> Self {
        Self {
            op: Opcode::TestTruthy,
            a: reg,
            b: Self::PAD,
            c: Self::PAD,
        }
    }

    /// `testf reg`.
    pub const fn test_falsey(reg: RegisterId) -> Self {
        Self {
            op: Opcode::TestFalsey,
            a: reg,
            b: Self::PAD,
            c: Self::PAD,
        }
    }

    /// `jmp offset` — forward jump measured from the end of this instruction.
    pub const fn jmp(offset: Immediate16) -> Self {
        Self::with_imm(Opcode::Jmp, Self::PAD, offset)
    }

    /// Opcode byte.
    pub const fn op(&self) -> Opcode {
        self.op
    }

    /// First operand byte (destination, or the tested register).
    pub const fn a(&self) -> RegisterId {
        self.a
    }

    /// Second operand byte.
    pub const fn b(&self) -> RegisterId {
        self.b
    }

    /// Third operand byte.
    pub const fn c(&self) -> RegisterId {
        self.c
    }

    /// The 16-bit immediate packed little-endian into operand bytes 2 and 3.
    pub const fn imm16(&self) -> Immediate16 {
        Immediate16::from_le_bytes([self.b, self.c])
    }

    /// Wire representation.
    pub const fn to_bytes(self) -> [u8; Self::LEN] {
        [self.op as u8, self.a, self.b, self.c]
    }

    /// Decode one instruction from the head of `bytes`.
    ///
    /// Fails with [`PanicReason::MisalignedProgram`] when fewer than
    /// [`Self::LEN`] bytes remain, and [`PanicReason::InvalidOpcode`] on an
    /// unknown opcode byte.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PanicReason> {
        match *bytes {
            [op, a, b, c, ..] => Ok(Self {
                op: Opcode::try_from(op)?,
                a,
                b,
                c,
            }),
            _ => Err(PanicReason::MisalignedProgram),
        }
    }
}

impl From<Instruction> for [u8; Instruction::LEN] {
    fn from(instruction: Instruction) -> Self {
        instruction.to_bytes()
    }
}

impl iter::FromIterator<Instruction> for Vec<u8> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Instruction>,
    {
        iter.into_iter()
            .flat_map(Instruction::to_bytes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trip() {
        let instructions = [
            Instruction::load_const(1, 0x1234),
            Instruction::load_slot(2, 7),
            Instruction::mov(0, 1),
            Instruction::add(0, 1, 2),
            Instruction::eq(3, 1, 2),
            Instruction::fill_empty(0, 1, 2),
            Instruction::test_eq(1, 2),
            Instruction::test_truthy(1),
            Instruction::test_falsey(1),
            Instruction::jmp(0xbeef),
        ];

        for instruction in instructions {
            let bytes = instruction.to_bytes();
            assert_eq!(Instruction::from_slice(&bytes), Ok(instruction));
        }

        let stream: Vec<u8> = instructions.iter().copied().collect();
        assert_eq!(stream.len(), instructions.len() * Instruction::LEN);
    }

    #[test]
    fn immediates_are_little_endian() {
        let bytes = Instruction::jmp(0x0102).to_bytes();
        assert_eq!(bytes, [Opcode::Jmp as u8, 0x00, 0x02, 0x01]);
        assert_eq!(Instruction::from_slice(&bytes).unwrap().imm16(), 0x0102);
    }

    #[test]
    fn short_and_unknown_input_fail() {
        assert_eq!(
            Instruction::from_slice(&[0x00, 0x01]),
            Err(PanicReason::MisalignedProgram)
        );
        assert_eq!(
            Instruction::from_slice(&[0xff, 0, 0, 0]),
            Err(PanicReason::InvalidOpcode)
        );
    }
}
