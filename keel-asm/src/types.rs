/// Register-sized value payload.
pub type Word = u64;

/// Index of a machine register.
pub type RegisterId = u8;

/// 16-bit immediate occupying the last two operand bytes of an instruction,
/// little-endian. Used for constant-pool indices and jump offsets.
pub type Immediate16 = u16;

/// Index of an external slot in the run's slot table.
pub type SlotId = usize;
