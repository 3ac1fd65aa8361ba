//! IR rewrites: the pre-SSA passes, φ elimination, and post-SSA copy
//! propagation.
//!
//! The drivers run each pass exactly once, in a fixed order; there is no
//! fixed-point loop. Pre-SSA ordering matters: removing never-taken nothing
//! tests exposes dead stores, and folding `fillEmpty` into moves feeds the
//! post-SSA copy propagation.

use crate::analysis::{
    compute_constraints, find_definition, is_temp_read, OptimizationCtx,
};
use crate::error::CompileError;
use crate::ir::{CompilationResult, LInstr};

use itertools::Itertools;
use tracing::debug;

/// One rewrite over a compilation result. Returns whether anything changed.
pub trait Pass {
    /// Pass name for diagnostics.
    fn name(&self) -> &'static str;
    /// Apply the pass once.
    fn run(&self, ctx: &mut OptimizationCtx, result: &mut CompilationResult) -> bool;
}

/// Drops `TestNothing` + `Jmp` pairs whose tested temp is known present.
/// The branch can never be taken, so the pair is a no-op.
pub struct RemoveRedundantNothingTest;

impl Pass for RemoveRedundantNothingTest {
    fn name(&self) -> &'static str {
        "remove-redundant-nothing-test"
    }

    fn run(&self, ctx: &mut OptimizationCtx, result: &mut CompilationResult) -> bool {
        let mut changed = false;
        let mut idx = 0;
        while idx < result.instructions.len() {
            if let LInstr::TestNothing { reg } = result.instructions[idx] {
                if !ctx.constraint(reg).can_be_nothing {
                    // Lowering always pairs a test with its jump.
                    debug_assert!(matches!(
                        result.instructions.get(idx + 1),
                        Some(LInstr::Jmp { .. })
                    ));
                    result.instructions.drain(idx..idx + 2);
                    changed = true;
                    continue;
                }
            }
            idx += 1;
        }
        changed
    }
}

/// Rewrites `FillEmpty` whose left side is known present into a plain move
/// of that side.
pub struct FillEmptyFold;

impl Pass for FillEmptyFold {
    fn name(&self) -> &'static str {
        "fill-empty-fold"
    }

    fn run(&self, ctx: &mut OptimizationCtx, result: &mut CompilationResult) -> bool {
        let mut changed = false;
        for instr in result.instructions.iter_mut() {
            if let LInstr::FillEmpty { dst, left, .. } = *instr {
                if !ctx.constraint(left).can_be_nothing {
                    *instr = LInstr::Move { dst, src: left };
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Removes stores whose destination is never read afterwards. The overall
/// result temp is exempt: it is the program's output.
pub struct DeadStore;

impl Pass for DeadStore {
    fn name(&self) -> &'static str {
        "dead-store"
    }

    fn run(&self, _ctx: &mut OptimizationCtx, result: &mut CompilationResult) -> bool {
        let mut changed = false;
        let mut idx = 0;
        while idx < result.instructions.len() {
            if let Some(dst) = result.instructions[idx].dst() {
                if dst != result.temp && !is_temp_read(result, dst, idx + 1) {
                    result.instructions.remove(idx);
                    changed = true;
                    continue;
                }
            }
            idx += 1;
        }
        changed
    }
}

/// For each `Move dst, src` in the same straight-line extent as `src`'s
/// definition (no `Jmp` in between), retires `src`: every occurrence in the
/// result becomes `dst` and the move is deleted.
///
/// The replacement is global, including uses beyond later jumps. That is
/// safe here because φ elimination has already placed a move at every
/// reaching definition of a merge, so renaming the source re-targets all of
/// them consistently.
pub struct BasicCopyProp;

impl Pass for BasicCopyProp {
    fn name(&self) -> &'static str {
        "basic-copy-prop"
    }

    fn run(&self, _ctx: &mut OptimizationCtx, result: &mut CompilationResult) -> bool {
        let mut changed = false;
        let mut idx = 0;
        while idx < result.instructions.len() {
            let LInstr::Move { dst, src } = result.instructions[idx] else {
                idx += 1;
                continue;
            };
            let Some(def) = find_definition(result, src) else {
                idx += 1;
                continue;
            };

            let blocked = result.instructions[def..idx]
                .iter()
                .any(|instr| matches!(instr, LInstr::Jmp { .. }));
            if blocked {
                idx += 1;
                continue;
            }

            result.replace_temp(src, dst);
            result.instructions.remove(idx);
            changed = true;
        }
        changed
    }
}

/// Eliminate φ-nodes: remove each `MovePhi` and copy into its destination
/// right after every source's definition, then rescan from the top since
/// positions have shifted.
pub fn remove_phi(result: &mut CompilationResult) -> Result<(), CompileError> {
    loop {
        let Some(idx) = result
            .instructions
            .iter()
            .position(|instr| matches!(instr, LInstr::MovePhi { .. }))
        else {
            return Ok(());
        };

        let LInstr::MovePhi { dst, sources } = result.instructions.remove(idx) else {
            unreachable!("position matched a phi");
        };

        for src in sources {
            let def = find_definition(result, src).ok_or(CompileError::UndefinedTemp(src))?;
            result
                .instructions
                .insert(def + 1, LInstr::Move { dst, src });
        }
    }
}

/// Run constraint propagation and the pre-SSA passes, in order, once each.
pub fn optimize_pre_ssa(ctx: &mut OptimizationCtx, result: &mut CompilationResult) {
    compute_constraints(ctx, result);
    for (temp, constraint) in ctx.constraints.iter().sorted_by_key(|(temp, _)| **temp) {
        debug!(
            "t{} {}",
            temp,
            if constraint.can_be_nothing {
                "maybe-nothing"
            } else {
                "not-nothing"
            }
        );
    }

    let passes: [&dyn Pass; 3] = [&RemoveRedundantNothingTest, &FillEmptyFold, &DeadStore];
    for pass in passes {
        let changed = pass.run(ctx, result);
        debug!("{}: changed={}", pass.name(), changed);
    }
}

/// Run the post-SSA passes once each.
pub fn optimize_post_ssa(ctx: &mut OptimizationCtx, result: &mut CompilationResult) {
    let passes: [&dyn Pass; 1] = [&BasicCopyProp];
    for pass in passes {
        let changed = pass.run(ctx, result);
        debug!("{}: changed={}", pass.name(), changed);
    }
}
