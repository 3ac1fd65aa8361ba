//! Compiler and runtime error variants.

use crate::expr::BinOpKind;
use crate::ir::TempId;

use keel_asm::PanicReason;

use thiserror::Error;

/// Errors produced while lowering, optimizing, or assembling an expression.
///
/// The compiler is built for a trusted embedder: each of these marks a
/// contract violation and aborts the compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A variable was referenced with no enclosing `let` binding it.
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    /// A call named a function the compiler doesn't know.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// A known function was called with the wrong number of arguments.
    #[error("`{function}` takes {expected} arguments, got {actual}")]
    BadArity {
        /// Function name as written in the call.
        function: String,
        /// Arity the function requires.
        expected: usize,
        /// Arity the call supplied.
        actual: usize,
    },
    /// Lowering is not defined for this n-ary operator.
    #[error("n-ary `{0:?}` has no lowering")]
    UnsupportedOperation(BinOpKind),
    /// An n-ary operation with no operands has no value.
    #[error("empty n-ary operation")]
    EmptyOperation,
    /// A φ-node survived to a stage that requires them eliminated.
    #[error("phi node reached the assembler")]
    PhiNotEliminated,
    /// An instruction referenced a temp no instruction defines.
    #[error("temp t{0} has no definition")]
    UndefinedTemp(TempId),
    /// A jump referenced a label that was never emitted.
    #[error("jump to unbound label `{0}`")]
    UnboundLabel(String),
    /// A jump would land before its own end; lowering only emits forward
    /// control flow.
    #[error("backward jump from byte {from} to byte {to}")]
    BackwardJump {
        /// Byte offset the jump is taken from.
        from: usize,
        /// Byte offset of the label.
        to: usize,
    },
    /// A jump distance overflowed the 16-bit offset encoding.
    #[error("jump offset {0} does not fit in 16 bits")]
    JumpOutOfRange(usize),
    /// The allocator ran out of machine registers.
    #[error("expression requires more than {0} registers")]
    RegisterLimit(usize),
    /// The constant pool overflowed its 16-bit index space.
    #[error("constant pool exceeds {0} entries")]
    TooManyConstants(usize),
}

/// Runtime error of one program execution. Always terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The byte stream violated an execution invariant.
    #[error("execution panic: {0}")]
    Panic(#[from] PanicReason),
}
