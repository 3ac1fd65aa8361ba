use core::fmt;

/// Panic reason representation for the interpreter.
///
/// The machine trusts its embedder; all of these are terminal. There is no
/// recovery and no user-facing error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// The byte can't be mapped to any known `Opcode`.
    InvalidOpcode = 0x00,
    /// The byte stream length is not a multiple of the instruction width.
    MisalignedProgram = 0x01,
    /// A test instruction was not followed by a `Jmp`.
    ExpectedJump = 0x02,
    /// A constant-pool index is out of bounds.
    InvalidConstantIndex = 0x03,
    /// A slot index is out of bounds of the run's slot table.
    InvalidSlotIndex = 0x04,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for PanicReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
