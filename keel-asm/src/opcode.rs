use crate::panic_reason::PanicReason;

use core::fmt;

/// Instruction opcode for the interpreter.
///
/// Every instruction occupies exactly [`Instruction::LEN`](crate::Instruction::LEN)
/// bytes: the opcode, then up to three operand bytes. Opcodes that carry a
/// 16-bit immediate (a constant-pool index or a jump offset) consume the last
/// two operand bytes as a little-endian `u16`.
///
/// The test opcodes do not branch themselves; they prime the `Jmp` that must
/// follow, which is taken iff the tested predicate holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Copy a constant-pool entry into a register.
    LoadConst = 0x00,
    /// Read the current value of an external slot into a register. The
    /// operand indexes a `Slot`-tagged pool entry naming the slot.
    LoadSlot = 0x01,
    /// Copy one register into another.
    Move = 0x02,
    /// Integer addition with nothing-propagation: if either operand is
    /// nothing, so is the result.
    Add = 0x03,
    /// Field-wise cell equality, yielding a boolean.
    Eq = 0x04,
    /// The left operand if it is not nothing, the right one otherwise.
    FillEmpty = 0x05,
    /// Take the following jump iff two registers hold equal cells.
    TestEq = 0x06,
    /// Take the following jump iff the register's payload is non-zero.
    TestTruthy = 0x07,
    /// Take the following jump iff the register's payload is zero.
    TestFalsey = 0x08,
    /// Forward jump. The 16-bit offset is measured from the byte just past
    /// this instruction; backward jumps are unrepresentable.
    Jmp = 0x09,
}

impl Opcode {
    /// Assembly mnemonic, as printed in disassembly listings.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::LoadConst => "loadc",
            Opcode::LoadSlot => "loads",
            Opcode::Move => "mov",
            Opcode::Add => "add",
            Opcode::Eq => "eq",
            Opcode::FillEmpty => "fillempty",
            Opcode::TestEq => "testeq",
            Opcode::TestTruthy => "testt",
            Opcode::TestFalsey => "testf",
            Opcode::Jmp => "jmp",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = PanicReason;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        match b {
            0x00 => Ok(LoadConst),
            0x01 => Ok(LoadSlot),
            0x02 => Ok(Move),
            0x03 => Ok(Add),
            0x04 => Ok(Eq),
            0x05 => Ok(FillEmpty),
            0x06 => Ok(TestEq),
            0x07 => Ok(TestTruthy),
            0x08 => Ok(TestFalsey),
            0x09 => Ok(Jmp),
            _ => Err(PanicReason::InvalidOpcode),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_u8_round_trip() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
        let last = Opcode::iter().last().unwrap() as u8;
        for b in (last + 1)..=u8::MAX {
            assert_eq!(Opcode::try_from(b), Err(PanicReason::InvalidOpcode));
        }
    }
}
