use stackvm_derive::Error;

/// Errors produced by assembly or execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VMError {
    /// Stack index out of range, or a bytecode read past the end.
    #[error("out of bounds access at {index} (len {len})")]
    OutOfBounds { index: usize, len: usize },
    /// A typed pop or operand received a value of a different kind.
    #[error("{instruction} expected {expected}, got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Heap or string-heap access outside any owned allocation.
    #[error("invalid address {address:#x}")]
    InvalidAddress { address: usize },
    /// Operand rejected by the instruction (wrong address kind, bad count).
    #[error("{instruction} cannot operate on {operand}")]
    InvalidOperand {
        instruction: &'static str,
        operand: String,
    },
    /// Unknown opcode byte in the bytecode stream.
    #[error("invalid instruction {opcode:#04x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A numeric literal that does not parse or does not fit its type.
    #[error("invalid number: {literal}")]
    InvalidNumber { literal: String },
    /// A malformed escape sequence in a string literal.
    #[error("invalid escape sequence")]
    InvalidEscape,
    /// The assembler could not recognize a mnemonic, label or operand.
    #[error("{message}")]
    NoMatch { message: String },
    /// A label referenced by an instruction was never defined.
    #[error("missing label: {label}")]
    MissingLabel { label: String },
    /// A user-defined runtime error raised by the `err` instruction.
    #[error("{message}")]
    RuntimeError { message: String },
    /// Underlying file or standard stream failure.
    #[error("io error: {message}")]
    Io { message: String },
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_fields() {
        let err = VMError::MissingLabel {
            label: "loop".to_string(),
        };
        assert_eq!(err.to_string(), "missing label: loop");

        let err = VMError::TypeMismatch {
            instruction: "add",
            expected: "Integer",
            actual: "Float",
        };
        assert_eq!(err.to_string(), "add expected Integer, got Float");
    }

    #[test]
    fn runtime_error_is_verbatim() {
        let err = VMError::RuntimeError {
            message: "user message".to_string(),
        };
        assert_eq!(err.to_string(), "user message");
    }
}
