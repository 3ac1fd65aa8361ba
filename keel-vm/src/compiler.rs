//! The end-to-end pipeline from expression tree to assembled program.

use crate::analysis::OptimizationCtx;
use crate::assembler::{assemble, Program};
use crate::error::CompileError;
use crate::expr::Expression;
use crate::ir::CompileCtx;
use crate::optimizer::{optimize_post_ssa, optimize_pre_ssa, remove_phi};

use tracing::debug;

/// Compile an expression through every stage: structural optimization,
/// lowering, pre-SSA optimization, φ elimination, post-SSA copy propagation,
/// and assembly.
pub fn compile(expr: Expression) -> Result<Program, CompileError> {
    let expr = expr.optimize();

    let mut ctx = CompileCtx::default();
    let mut result = expr.compile(&mut ctx)?;
    debug!("lowered to {} instructions", result.instructions.len());

    let mut opt = OptimizationCtx::default();
    optimize_pre_ssa(&mut opt, &mut result);
    remove_phi(&mut result)?;
    optimize_post_ssa(&mut opt, &mut result);
    debug!("optimized to {} instructions", result.instructions.len());

    assemble(result)
}
