//! Definition lookup, liveness by future read, and may-be-nothing
//! constraint propagation.
//!
//! Every analysis here treats the instruction list as a straight line. That
//! is sound because lowering only emits forward jumps: if an instruction at a
//! later index reads a temp, some path from here reaches that read.

use crate::ir::{CompilationResult, LInstr, TempId};

use keel_asm::Tag;

use std::collections::HashMap;

/// Index of the unique instruction defining `temp`, if any.
pub fn find_definition(result: &CompilationResult, temp: TempId) -> Option<usize> {
    result
        .instructions
        .iter()
        .position(|instr| instr.dst() == Some(temp))
}

/// Whether any instruction at index `start` or later reads `temp`.
/// Destinations don't count.
pub fn is_temp_read(result: &CompilationResult, temp: TempId, start: usize) -> bool {
    result
        .instructions
        .iter()
        .skip(start)
        .any(|instr| instr.reads(temp))
}

/// Liveness at `index` is "read at or after `index`". See the module note on
/// why forward-only control flow makes this exact.
pub fn is_temp_live(result: &CompilationResult, temp: TempId, index: usize) -> bool {
    is_temp_read(result, temp, index)
}

/// What constraint propagation knows about one temp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempConstraints {
    /// Whether the temp may hold nothing at run time. Bottom of the lattice
    /// is `false` (known present); the join is OR.
    pub can_be_nothing: bool,
}

impl TempConstraints {
    /// Lattice join: a merge may be nothing if any input may.
    pub fn accumulate_or(self, other: TempConstraints) -> TempConstraints {
        TempConstraints {
            can_be_nothing: self.can_be_nothing || other.can_be_nothing,
        }
    }
}

/// Constraint map shared by the optimization passes.
#[derive(Debug, Default)]
pub struct OptimizationCtx {
    /// Per-temp constraints, filled by [`compute_constraints`].
    pub constraints: HashMap<TempId, TempConstraints>,
}

impl OptimizationCtx {
    /// Constraint recorded for `temp`; bottom (not-nothing) when unseen.
    pub fn constraint(&self, temp: TempId) -> TempConstraints {
        self.constraints.get(&temp).copied().unwrap_or_default()
    }
}

/// Single forward pass computing, for every destination temp, whether it may
/// hold nothing at run time.
pub fn compute_constraints(ctx: &mut OptimizationCtx, result: &CompilationResult) {
    for instr in &result.instructions {
        match instr {
            LInstr::LoadConst { dst, value } => {
                ctx.constraints.insert(
                    *dst,
                    TempConstraints {
                        can_be_nothing: value.tag == Tag::Nothing,
                    },
                );
            }
            // Slot contents are unknown until run time.
            LInstr::LoadSlot { dst, .. } => {
                ctx.constraints.insert(
                    *dst,
                    TempConstraints {
                        can_be_nothing: true,
                    },
                );
            }
            // Conservative: either operand being nothing makes the sum
            // nothing.
            LInstr::Add { dst, .. } => {
                ctx.constraints.insert(
                    *dst,
                    TempConstraints {
                        can_be_nothing: true,
                    },
                );
            }
            // fillEmpty(_, nothing) is still nothing; the left side is
            // forced present by the operation itself.
            LInstr::FillEmpty { dst, right, .. } => {
                let constraint = ctx.constraint(*right);
                ctx.constraints.insert(*dst, constraint);
            }
            LInstr::Move { dst, src } => {
                let constraint = ctx.constraint(*src);
                ctx.constraints.insert(*dst, constraint);
            }
            LInstr::MovePhi { dst, sources } => {
                let constraint = sources
                    .iter()
                    .map(|src| ctx.constraint(*src))
                    .fold(TempConstraints::default(), TempConstraints::accumulate_or);
                ctx.constraints.insert(*dst, constraint);
            }
            LInstr::TestNothing { .. }
            | LInstr::TestTruthy { .. }
            | LInstr::TestFalsey { .. }
            | LInstr::TestEq { .. }
            | LInstr::Jmp { .. }
            | LInstr::Label { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_asm::ValueCell;

    fn result(instructions: Vec<LInstr>, temp: TempId) -> CompilationResult {
        CompilationResult { temp, instructions }
    }

    #[test]
    fn definitions_are_found_by_destination() {
        let r = result(
            vec![
                LInstr::LoadConst {
                    dst: 0,
                    value: ValueCell::int(1),
                },
                LInstr::LoadConst {
                    dst: 1,
                    value: ValueCell::int(2),
                },
                LInstr::Add {
                    dst: 2,
                    left: 0,
                    right: 1,
                },
            ],
            2,
        );
        assert_eq!(find_definition(&r, 1), Some(1));
        assert_eq!(find_definition(&r, 2), Some(2));
        assert_eq!(find_definition(&r, 9), None);
    }

    #[test]
    fn reads_respect_the_start_index() {
        let r = result(
            vec![
                LInstr::LoadConst {
                    dst: 0,
                    value: ValueCell::int(1),
                },
                LInstr::TestTruthy { reg: 0 },
                LInstr::Jmp {
                    target: "l0".to_owned(),
                },
                LInstr::Label {
                    name: "l0".to_owned(),
                },
            ],
            0,
        );
        assert!(is_temp_read(&r, 0, 0));
        assert!(is_temp_read(&r, 0, 1));
        assert!(!is_temp_read(&r, 0, 2));
    }

    #[test]
    fn constraints_follow_the_lattice_rules() {
        let mut ctx = OptimizationCtx::default();
        let r = result(
            vec![
                LInstr::LoadConst {
                    dst: 0,
                    value: ValueCell::nothing(),
                },
                LInstr::LoadConst {
                    dst: 1,
                    value: ValueCell::int(5),
                },
                // Present even though the left side is nothing.
                LInstr::FillEmpty {
                    dst: 2,
                    left: 0,
                    right: 1,
                },
                // Maybe-nothing because the fallback is.
                LInstr::FillEmpty {
                    dst: 3,
                    left: 1,
                    right: 0,
                },
                LInstr::Add {
                    dst: 4,
                    left: 1,
                    right: 1,
                },
                LInstr::Move { dst: 5, src: 2 },
                LInstr::MovePhi {
                    dst: 6,
                    sources: vec![1, 2],
                },
                LInstr::MovePhi {
                    dst: 7,
                    sources: vec![1, 0],
                },
            ],
            7,
        );
        compute_constraints(&mut ctx, &r);

        assert!(ctx.constraint(0).can_be_nothing);
        assert!(!ctx.constraint(1).can_be_nothing);
        assert!(!ctx.constraint(2).can_be_nothing);
        assert!(ctx.constraint(3).can_be_nothing);
        assert!(ctx.constraint(4).can_be_nothing);
        assert!(!ctx.constraint(5).can_be_nothing);
        assert!(!ctx.constraint(6).can_be_nothing);
        assert!(ctx.constraint(7).can_be_nothing);
    }

    #[test]
    fn slot_loads_are_maybe_nothing() {
        let mut ctx = OptimizationCtx::default();
        let r = result(vec![LInstr::LoadSlot { dst: 0, slot: 0 }], 0);
        compute_constraints(&mut ctx, &r);
        assert!(ctx.constraint(0).can_be_nothing);
    }
}
