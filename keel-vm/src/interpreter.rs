//! Fetch-decode-execute loop over the assembled byte stream.

use crate::assembler::Program;
use crate::consts::REG_RESULT;
use crate::error::RuntimeError;

use keel_asm::{
    Immediate16, Instruction, Opcode, PanicReason, RegisterId, Slot, SlotId, ValueCell,
};

use tracing::trace;

/// Register VM executing one assembled program.
///
/// The frame is a single stack of value cells: the constant pool occupies the
/// low slots, and run entry grows it exactly once by the program's register
/// count, so register `r` lives at `stack[base + r]` with `base` the pool
/// length. There are no reallocations while the program runs and no heap
/// allocation on the dispatch path.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: Program,
    stack: Vec<ValueCell>,
    base: usize,
    slots: Vec<Slot>,
}

impl Interpreter {
    /// Interpreter for a program that reads no external slots.
    pub fn new(program: Program) -> Self {
        Self::with_slots(program, Vec::new())
    }

    /// Interpreter reading slot cells from `slots`. Slot indices embedded in
    /// the program refer into this table; the embedder may
    /// [`set`](Slot::set) slots between runs without recompiling.
    pub fn with_slots(program: Program, slots: Vec<Slot>) -> Self {
        let base = program.constants.len();
        let stack = program.constants.clone();
        Self {
            program,
            stack,
            base,
            slots,
        }
    }

    /// The executed program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The register file of the current frame. Empty until [`run`](Self::run)
    /// has grown the frame.
    pub fn registers(&self) -> &[ValueCell] {
        &self.stack[self.base..]
    }

    /// The program's result: register 0 of the frame.
    pub fn result(&self) -> ValueCell {
        self.stack
            .get(self.base + usize::from(REG_RESULT))
            .copied()
            .unwrap_or_else(ValueCell::nothing)
    }

    /// Execute the program to completion.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        if self.program.code.len() % Instruction::LEN != 0 {
            return Err(PanicReason::MisalignedProgram.into());
        }
        self.stack.resize(
            self.base + usize::from(self.program.registers),
            ValueCell::nothing(),
        );

        let end = self.program.code.len();
        let mut pc = 0;
        while pc != end {
            let instruction = self.fetch(pc)?;
            trace!("{:04} {:?}", pc, instruction);
            pc += Instruction::LEN;

            match instruction.op() {
                Opcode::LoadConst => {
                    let value = self.constant(instruction.imm16())?;
                    self.write(instruction.a(), value);
                }
                Opcode::LoadSlot => {
                    let cell = self.constant(instruction.imm16())?;
                    let value = self
                        .slots
                        .get(cell.val as SlotId)
                        .ok_or(PanicReason::InvalidSlotIndex)?
                        .get();
                    self.write(instruction.a(), value);
                }
                Opcode::Move => {
                    let value = self.read(instruction.b());
                    self.write(instruction.a(), value);
                }
                Opcode::Add => {
                    let left = self.read(instruction.b());
                    let right = self.read(instruction.c());
                    // Nothing is contagious through arithmetic.
                    let value = if left.is_nothing() || right.is_nothing() {
                        ValueCell::nothing()
                    } else {
                        ValueCell::int(left.val.wrapping_add(right.val) as i64)
                    };
                    self.write(instruction.a(), value);
                }
                Opcode::Eq => {
                    let value =
                        ValueCell::boolean(self.read(instruction.b()) == self.read(instruction.c()));
                    self.write(instruction.a(), value);
                }
                Opcode::FillEmpty => {
                    let left = self.read(instruction.b());
                    let right = self.read(instruction.c());
                    self.write(instruction.a(), if left.is_nothing() { right } else { left });
                }
                Opcode::TestEq => {
                    let taken = self.read(instruction.a()) == self.read(instruction.b());
                    pc = self.branch(pc, taken)?;
                }
                Opcode::TestTruthy => {
                    let taken = self.read(instruction.a()).is_truthy();
                    pc = self.branch(pc, taken)?;
                }
                Opcode::TestFalsey => {
                    let taken = self.read(instruction.a()).is_falsey();
                    pc = self.branch(pc, taken)?;
                }
                Opcode::Jmp => {
                    pc += usize::from(instruction.imm16());
                }
            }
        }

        Ok(())
    }

    /// Resolve a primed test at the instruction following it: consume the
    /// mandatory `Jmp`, following its offset iff the test held.
    fn branch(&self, pc: usize, taken: bool) -> Result<usize, RuntimeError> {
        let jump = self.fetch(pc)?;
        if jump.op() != Opcode::Jmp {
            return Err(PanicReason::ExpectedJump.into());
        }
        let next = pc + Instruction::LEN;
        Ok(if taken {
            next + usize::from(jump.imm16())
        } else {
            next
        })
    }

    fn fetch(&self, pc: usize) -> Result<Instruction, RuntimeError> {
        let bytes = self
            .program
            .code
            .get(pc..)
            .ok_or(PanicReason::MisalignedProgram)?;
        Instruction::from_slice(bytes).map_err(Into::into)
    }

    fn constant(&self, index: Immediate16) -> Result<ValueCell, RuntimeError> {
        self.program
            .constants
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| PanicReason::InvalidConstantIndex.into())
    }

    fn read(&self, register: RegisterId) -> ValueCell {
        self.stack[self.base + usize::from(register)]
    }

    fn write(&mut self, register: RegisterId, value: ValueCell) {
        self.stack[self.base + usize::from(register)] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_asm::Tag;
    use rstest::rstest;

    fn program(instructions: Vec<Instruction>, constants: Vec<ValueCell>, registers: u8) -> Program {
        Program {
            code: instructions.into_iter().collect(),
            constants,
            registers,
        }
    }

    fn run(program: Program) -> ValueCell {
        let mut vm = Interpreter::new(program);
        vm.run().expect("program should execute");
        vm.result()
    }

    #[test]
    fn add_produces_an_int() {
        let result = run(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 1),
                Instruction::add(0, 1, 2),
            ],
            vec![ValueCell::int(3), ValueCell::int(4)],
            3,
        ));
        assert_eq!(result, ValueCell::int(7));
    }

    #[test]
    fn add_propagates_nothing_and_clears_the_stale_tag() {
        // Register 0 holds a bool before the add overwrites it; the result
        // must still carry the Int tag.
        let result = run(program(
            vec![
                Instruction::load_const(0, 2),
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 1),
                Instruction::add(0, 1, 2),
            ],
            vec![
                ValueCell::int(3),
                ValueCell::int(4),
                ValueCell::boolean(true),
            ],
            3,
        ));
        assert_eq!(result.tag, Tag::Int);

        let nothing = run(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 1),
                Instruction::add(0, 1, 2),
            ],
            vec![ValueCell::nothing(), ValueCell::int(5)],
            3,
        ));
        assert_eq!(nothing, ValueCell::nothing());
    }

    #[test]
    fn eq_compares_cells_field_wise() {
        let result = run(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 1),
                Instruction::eq(0, 1, 2),
            ],
            vec![ValueCell::int(1), ValueCell::boolean(true)],
            3,
        ));
        // Same payload, different tag.
        assert_eq!(result, ValueCell::boolean(false));
    }

    #[rstest]
    #[case(ValueCell::nothing(), ValueCell::int(99))]
    #[case(ValueCell::int(7), ValueCell::int(7))]
    fn fill_empty_picks_the_present_side(#[case] left: ValueCell, #[case] expected: ValueCell) {
        let result = run(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 1),
                Instruction::fill_empty(0, 1, 2),
            ],
            vec![left, ValueCell::int(99)],
            3,
        ));
        assert_eq!(result, expected);
    }

    #[rstest]
    #[case(ValueCell::boolean(true), ValueCell::int(1))]
    #[case(ValueCell::boolean(false), ValueCell::int(2))]
    #[case(ValueCell::int(-3), ValueCell::int(1))]
    fn test_truthy_takes_or_skips_the_jump(
        #[case] condition: ValueCell,
        #[case] expected: ValueCell,
    ) {
        // A truthy condition jumps over the overwrite of register 0.
        let result = run(program(
            vec![
                Instruction::load_const(0, 1),
                Instruction::load_const(1, 0),
                Instruction::test_truthy(1),
                Instruction::jmp(4),
                Instruction::load_const(0, 2),
            ],
            vec![condition, ValueCell::int(1), ValueCell::int(2)],
            2,
        ));
        assert_eq!(result, expected);
    }

    #[test]
    fn test_falsey_branches_on_zero_payload() {
        let mut code = vec![
            Instruction::load_const(1, 0),
            Instruction::test_falsey(1),
            Instruction::jmp(4),
            Instruction::load_const(0, 1),
            Instruction::load_const(0, 2),
        ];
        // Falsey condition: the jump skips the store of 7, leaving 9.
        let result = run(program(
            code.clone(),
            vec![
                ValueCell::boolean(false),
                ValueCell::int(7),
                ValueCell::int(9),
            ],
            2,
        ));
        assert_eq!(result, ValueCell::int(9));

        // Truthy condition: both stores execute, 9 wins again but via the
        // fall-through path; swap the final store to observe the difference.
        code[4] = Instruction::load_const(2, 2);
        let result = run(program(
            code,
            vec![
                ValueCell::boolean(true),
                ValueCell::int(7),
                ValueCell::int(9),
            ],
            3,
        ));
        assert_eq!(result, ValueCell::int(7));
    }

    #[test]
    fn test_eq_compares_two_registers() {
        let result = run(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::load_const(2, 0),
                Instruction::load_const(0, 1),
                Instruction::test_eq(1, 2),
                Instruction::jmp(4),
                Instruction::load_const(0, 2),
                Instruction::load_const(0, 1),
            ],
            vec![
                ValueCell::int(5),
                ValueCell::int(1),
                ValueCell::int(2),
            ],
            3,
        ));
        assert_eq!(result, ValueCell::int(1));
    }

    #[test]
    fn slots_are_read_through_the_pool_entry() {
        let slot = Slot::new(ValueCell::int(41));
        let program = program(
            vec![Instruction::load_slot(0, 0)],
            vec![ValueCell::slot(0)],
            1,
        );

        let mut vm = Interpreter::with_slots(program.clone(), vec![slot.clone()]);
        vm.run().unwrap();
        assert_eq!(vm.result(), ValueCell::int(41));

        // The embedder mutates the slot; a fresh run sees the new value
        // without recompilation.
        slot.set(ValueCell::int(42));
        let mut vm = Interpreter::with_slots(program, vec![slot]);
        vm.run().unwrap();
        assert_eq!(vm.result(), ValueCell::int(42));
    }

    #[test]
    fn missing_slot_is_a_panic() {
        let mut vm = Interpreter::new(program(
            vec![Instruction::load_slot(0, 0)],
            vec![ValueCell::slot(3)],
            1,
        ));
        assert_eq!(
            vm.run(),
            Err(RuntimeError::Panic(PanicReason::InvalidSlotIndex))
        );
    }

    #[test]
    fn unknown_opcodes_and_misalignment_are_panics() {
        let mut vm = Interpreter::new(Program {
            code: vec![0xff, 0, 0, 0],
            constants: vec![],
            registers: 1,
        });
        assert_eq!(
            vm.run(),
            Err(RuntimeError::Panic(PanicReason::InvalidOpcode))
        );

        let mut vm = Interpreter::new(Program {
            code: vec![0x00, 0, 0],
            constants: vec![],
            registers: 1,
        });
        assert_eq!(
            vm.run(),
            Err(RuntimeError::Panic(PanicReason::MisalignedProgram))
        );
    }

    #[test]
    fn a_test_must_be_followed_by_a_jump() {
        let mut vm = Interpreter::new(program(
            vec![
                Instruction::load_const(1, 0),
                Instruction::test_truthy(1),
                Instruction::mov(0, 1),
            ],
            vec![ValueCell::boolean(true)],
            2,
        ));
        assert_eq!(
            vm.run(),
            Err(RuntimeError::Panic(PanicReason::ExpectedJump))
        );
    }

    #[test]
    fn empty_programs_yield_nothing() {
        let mut vm = Interpreter::new(Program {
            code: vec![],
            constants: vec![],
            registers: 1,
        });
        vm.run().unwrap();
        assert_eq!(vm.result(), ValueCell::nothing());
    }
}
