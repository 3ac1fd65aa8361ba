//! VM parameters

use keel_asm::RegisterId;

/// Register holding the program's result. The allocator pre-binds the output
/// temp here and the interpreter reads the final value from it.
pub const REG_RESULT: RegisterId = 0x00;

/// Hard ceiling on machine registers per program, result register included.
pub const VM_REGISTER_COUNT: usize = 250;

/// Capacity of the constant pool; pool indices must fit the 16-bit operand.
pub const VM_MAX_CONSTANTS: usize = u16::MAX as usize + 1;
