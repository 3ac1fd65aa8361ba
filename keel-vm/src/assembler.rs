//! Register allocation and byte emission.
//!
//! Allocation is two-phase: first every destination temp is assigned a
//! machine register using liveness derived from "is ever read after here",
//! then the instruction list is emitted as 4-byte entries with a constant
//! pool and a jump fix-up table. Offsets are measured from the end of each
//! `Jmp`, so a fix-up patches `label - (operand_offset + 2)`.

use crate::analysis::is_temp_live;
use crate::consts::{REG_RESULT, VM_MAX_CONSTANTS, VM_REGISTER_COUNT};
use crate::error::CompileError;
use crate::ir::{CompilationResult, LInstr, TempId};

use keel_asm::{Immediate16, Instruction, Opcode, RegisterId, ValueCell};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::debug;

/// An assembled program: the fixed-width byte stream, its constant pool, and
/// the number of machine registers the frame must provide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    /// Byte stream of 4-byte instructions.
    pub code: Vec<u8>,
    /// Value cells referenced by 16-bit pool indices.
    pub constants: Vec<ValueCell>,
    /// Registers used, result register included. The frame grows by exactly
    /// this amount at run entry.
    pub registers: u8,
}

impl Program {
    fn push(&mut self, instruction: Instruction) -> usize {
        let offset = self.code.len();
        self.code.extend_from_slice(&instruction.to_bytes());
        debug_assert_eq!(self.code.len() % Instruction::LEN, 0);
        offset
    }

    fn push_constant(&mut self, value: ValueCell) -> Result<Immediate16, CompileError> {
        // An obvious deduplication opportunity lives here; the pool stays
        // append-only for now.
        if self.constants.len() >= VM_MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants(VM_MAX_CONSTANTS));
        }
        let index = self.constants.len() as Immediate16;
        self.constants.push(value);
        Ok(index)
    }
}

/// Working state of one assembly: temp→register bindings, per-register
/// occupancy history, and the jump fix-up tables.
#[derive(Debug, Default)]
struct AssembleCtx {
    next_register: u8,
    temp_to_register: HashMap<TempId, RegisterId>,
    // Every temp a register has held, in order; the last entry is the
    // current occupant. Ordered so the reuse scan is deterministic.
    register_to_temps: BTreeMap<RegisterId, Vec<TempId>>,
    // (operand byte offset, label) pairs awaiting the label's position.
    jump_fixups: Vec<(usize, String)>,
    label_offsets: HashMap<String, usize>,
}

impl AssembleCtx {
    fn new() -> Self {
        Self {
            // Register 0 is reserved for the program output.
            next_register: 1,
            ..Self::default()
        }
    }

    fn allocate_register(&mut self) -> Result<RegisterId, CompileError> {
        if usize::from(self.next_register) >= VM_REGISTER_COUNT {
            return Err(CompileError::RegisterLimit(VM_REGISTER_COUNT));
        }
        let register = self.next_register;
        self.next_register += 1;
        Ok(register)
    }

    fn register_for(&self, temp: TempId) -> Result<RegisterId, CompileError> {
        self.temp_to_register
            .get(&temp)
            .copied()
            .ok_or(CompileError::UndefinedTemp(temp))
    }

    /// Bind `temp` (defined at instruction `index`) to a register.
    ///
    /// A register whose current occupant is not live *after* this
    /// instruction can be reused: the dying temp is still a valid source
    /// while the instruction executes, as in `add r0, r0, r1`.
    fn choose_register(
        &mut self,
        result: &CompilationResult,
        temp: TempId,
        index: usize,
    ) -> Result<(), CompileError> {
        if self.temp_to_register.contains_key(&temp) {
            return Ok(());
        }

        let reusable = self
            .register_to_temps
            .iter()
            .find(|(_, history)| {
                history
                    .last()
                    .map_or(true, |&occupant| !is_temp_live(result, occupant, index + 1))
            })
            .map(|(&register, _)| register);

        let register = match reusable {
            Some(register) => {
                debug!("r{} reused for t{}", register, temp);
                register
            }
            None => {
                let register = self.allocate_register()?;
                debug!("r{} created for t{}", register, temp);
                register
            }
        };

        self.temp_to_register.insert(temp, register);
        self.register_to_temps.entry(register).or_default().push(temp);
        Ok(())
    }
}

/// The machine ISA has no nothing-test opcode. Rewrite every surviving
/// `TestNothing t` into `TestEq t, tN` against a single shared temp holding
/// the nothing cell, hoisted to the front of the list. Cell equality is
/// field-wise, so the test holds exactly when `t` is nothing.
fn lower_nothing_tests(result: &mut CompilationResult) {
    if !result
        .instructions
        .iter()
        .any(|instr| matches!(instr, LInstr::TestNothing { .. }))
    {
        return;
    }

    let nothing = result
        .instructions
        .iter()
        .filter_map(LInstr::dst)
        .max()
        .map_or(0, |temp| temp + 1)
        .max(result.temp + 1);

    for instr in result.instructions.iter_mut() {
        if let LInstr::TestNothing { reg } = *instr {
            *instr = LInstr::TestEq {
                left: reg,
                right: nothing,
            };
        }
    }
    result.instructions.insert(
        0,
        LInstr::LoadConst {
            dst: nothing,
            value: ValueCell::nothing(),
        },
    );
}

/// Assign registers and emit the byte stream for a φ-free result.
pub fn assemble(mut result: CompilationResult) -> Result<Program, CompileError> {
    lower_nothing_tests(&mut result);

    let mut ctx = AssembleCtx::new();
    // The program output always lands in register 0.
    ctx.temp_to_register.insert(result.temp, REG_RESULT);

    for (index, instr) in result.instructions.iter().enumerate() {
        if matches!(instr, LInstr::MovePhi { .. }) {
            return Err(CompileError::PhiNotEliminated);
        }
        if let Some(dst) = instr.dst() {
            ctx.choose_register(&result, dst, index)?;
        }
    }

    let mut program = Program {
        registers: ctx.next_register,
        ..Program::default()
    };

    for instr in &result.instructions {
        match instr {
            LInstr::LoadConst { dst, value } => {
                let index = program.push_constant(*value)?;
                program.push(Instruction::load_const(ctx.register_for(*dst)?, index));
            }
            LInstr::LoadSlot { dst, slot } => {
                let index = program.push_constant(ValueCell::slot(*slot))?;
                program.push(Instruction::load_slot(ctx.register_for(*dst)?, index));
            }
            LInstr::Move { dst, src } => {
                program.push(Instruction::mov(
                    ctx.register_for(*dst)?,
                    ctx.register_for(*src)?,
                ));
            }
            LInstr::Add { dst, left, right } => {
                program.push(Instruction::add(
                    ctx.register_for(*dst)?,
                    ctx.register_for(*left)?,
                    ctx.register_for(*right)?,
                ));
            }
            LInstr::FillEmpty { dst, left, right } => {
                program.push(Instruction::fill_empty(
                    ctx.register_for(*dst)?,
                    ctx.register_for(*left)?,
                    ctx.register_for(*right)?,
                ));
            }
            LInstr::TestEq { left, right } => {
                program.push(Instruction::test_eq(
                    ctx.register_for(*left)?,
                    ctx.register_for(*right)?,
                ));
            }
            LInstr::TestTruthy { reg } => {
                program.push(Instruction::test_truthy(ctx.register_for(*reg)?));
            }
            LInstr::TestFalsey { reg } => {
                program.push(Instruction::test_falsey(ctx.register_for(*reg)?));
            }
            LInstr::Jmp { target } => {
                let offset = program.push(Instruction::jmp(0));
                ctx.jump_fixups.push((offset + 2, target.clone()));
            }
            LInstr::Label { name } => {
                ctx.label_offsets.insert(name.clone(), program.code.len());
            }
            LInstr::MovePhi { .. } => return Err(CompileError::PhiNotEliminated),
            LInstr::TestNothing { .. } => {
                unreachable!("nothing-tests are lowered before emission")
            }
        }
    }

    // Patch each jump with the distance from its own end to the label.
    for (offset, label) in &ctx.jump_fixups {
        let target = *ctx
            .label_offsets
            .get(label)
            .ok_or_else(|| CompileError::UnboundLabel(label.clone()))?;
        let distance = target
            .checked_sub(offset + 2)
            .ok_or(CompileError::BackwardJump {
                from: offset + 2,
                to: target,
            })?;
        if distance > usize::from(Immediate16::MAX) {
            return Err(CompileError::JumpOutOfRange(distance));
        }
        program.code[*offset..offset + 2]
            .copy_from_slice(&(distance as Immediate16).to_le_bytes());
    }

    Ok(program)
}

impl fmt::Display for Program {
    /// Disassembly listing: one line per instruction, with pool entries and
    /// jump targets resolved.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, chunk) in self.code.chunks_exact(Instruction::LEN).enumerate() {
            let offset = index * Instruction::LEN;
            let Ok(instruction) = Instruction::from_slice(chunk) else {
                writeln!(f, "{offset:04}  ??")?;
                continue;
            };

            let mnemonic = instruction.op().mnemonic();
            match instruction.op() {
                Opcode::LoadConst | Opcode::LoadSlot => {
                    let index = usize::from(instruction.imm16());
                    match self.constants.get(index) {
                        Some(value) => writeln!(
                            f,
                            "{offset:04}  {mnemonic:<10} r{} {value}",
                            instruction.a()
                        )?,
                        None => writeln!(
                            f,
                            "{offset:04}  {mnemonic:<10} r{} c{index}",
                            instruction.a()
                        )?,
                    }
                }
                Opcode::Move => writeln!(
                    f,
                    "{offset:04}  {mnemonic:<10} r{} r{}",
                    instruction.a(),
                    instruction.b()
                )?,
                Opcode::Add | Opcode::Eq | Opcode::FillEmpty => writeln!(
                    f,
                    "{offset:04}  {mnemonic:<10} r{} r{} r{}",
                    instruction.a(),
                    instruction.b(),
                    instruction.c()
                )?,
                Opcode::TestEq => writeln!(
                    f,
                    "{offset:04}  {mnemonic:<10} r{} r{}",
                    instruction.a(),
                    instruction.b()
                )?,
                Opcode::TestTruthy | Opcode::TestFalsey => {
                    writeln!(f, "{offset:04}  {mnemonic:<10} r{}", instruction.a())?
                }
                Opcode::Jmp => {
                    // Targets are measured from the end of the jump.
                    let target = offset + Instruction::LEN + usize::from(instruction.imm16());
                    writeln!(f, "{offset:04}  {mnemonic:<10} {target:04}")?
                }
            }
        }
        writeln!(f, "{:04}  <end>", self.code.len())
    }
}
