//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`] macro holds the canonical instruction
//! definition list and invokes a callback macro for code generation, so the
//! ISA and the assembler can generate instruction-related code from a single
//! table.
//!
//! This module generates:
//! - The [`Instruction`] enum with its opcode byte assignment
//! - `TryFrom<u8>` for decoding opcodes
//! - [`Instruction::mnemonic`], [`Instruction::operand_kind`] and the
//!   case-insensitive [`Instruction::from_mnemonic`] lookup
//!
//! # Bytecode Format
//!
//! Opcode bytes are positional: the first entry of the table is 0 and each
//! subsequent entry increments by one. The assignment is part of the
//! bytecode format and must never be reordered (see the stability test at
//! the bottom of this file). Each opcode is followed by at most one operand
//! whose encoding is determined by its [`OperandKind`].

use crate::errors::VMError;

/// The shape of the single operand following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand.
    None,
    /// A 4-byte big-endian `i32` immediate.
    Integer,
    /// An 8-byte big-endian IEEE-754 bit pattern.
    Float,
    /// An 8-byte big-endian address; in source it may be written as a label.
    Address,
    /// A length-prefixed byte string.
    String,
}

/// Invokes a callback macro with the complete instruction definition list.
///
/// Each entry is `Name = opcode, "mnemonic", OperandKind`.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            /// concat ; pops two string addresses, pushes their concatenation
            Concat = 0, "concat", None,
            /// jump addr ; sets the code pointer to addr
            Jump = 1, "jump", Address,
            /// jz addr ; pops an integer, jumps to addr if it is zero
            Jz = 2, "jz", Address,
            /// pusha addr ; pushes addr as a code address
            PushA = 3, "pusha", Address,
            /// call ; pops a code address, pushes a call frame, jumps
            Call = 4, "call", None,
            /// return ; tears down the current frame, resumes at the caller
            Return = 5, "return", None,
            /// start ; marks the current stack top as the global frame base
            Start = 6, "start", None,
            /// nop ; no effect
            Nop = 7, "nop", None,
            /// stop ; sets the stop flag, ending execution
            Stop = 8, "stop", None,
            /// err "msg" ; raises a user runtime error with msg
            Err = 9, "err", String,
            /// atoi ; pops a string address, pushes the parsed integer
            Atoi = 10, "atoi", None,
            /// atof ; pops a string address, pushes the parsed float
            Atof = 11, "atof", None,
            /// itof ; pops an integer, pushes it as a float
            Itof = 12, "itof", None,
            /// ftoi ; pops a float, pushes it truncated to an integer
            Ftoi = 13, "ftoi", None,
            /// stri ; pops an integer, pushes its decimal text as a string address
            Stri = 14, "stri", None,
            /// strf ; pops a float, pushes its decimal text as a string address
            Strf = 15, "strf", None,
            /// dup n ; copies the top n stack entries, preserving order
            Dup = 16, "dup", Integer,
            /// dupn ; like dup, but pops the count from the stack
            DupN = 17, "dupn", None,
            /// fadd ; pops two floats, pushes their sum
            FAdd = 18, "fadd", None,
            /// fsub ; pops two floats, pushes their difference
            FSub = 19, "fsub", None,
            /// fmul ; pops two floats, pushes their product
            FMul = 20, "fmul", None,
            /// fdiv ; pops two floats, pushes their quotient
            FDiv = 21, "fdiv", None,
            /// finf ; pops two floats, pushes 1 if a < b else 0
            FInf = 22, "finf", None,
            /// finfeq ; pops two floats, pushes 1 if a <= b else 0
            FInfEq = 23, "finfeq", None,
            /// fsup ; pops two floats, pushes 1 if a > b else 0
            FSup = 24, "fsup", None,
            /// fsupeq ; pops two floats, pushes 1 if a >= b else 0
            FSupEq = 25, "fsupeq", None,
            /// fcos ; pops a float, pushes its cosine
            FCos = 26, "fcos", None,
            /// fsin ; pops a float, pushes its sine
            FSin = 27, "fsin", None,
            /// alloc n ; allocates n heap cells, pushes the base address
            Alloc = 28, "alloc", Address,
            /// allocn ; like alloc, but pops the size from the stack
            AllocN = 29, "allocn", None,
            /// free ; pops a heap address, releases its allocation
            Free = 30, "free", None,
            /// equal ; pops two values, pushes 1 if equal else 0
            Equal = 31, "equal", None,
            /// add ; pops two integers, pushes their sum
            Add = 32, "add", None,
            /// sub ; pops two integers, pushes their difference
            Sub = 33, "sub", None,
            /// mul ; pops two integers, pushes their product
            Mul = 34, "mul", None,
            /// div ; pops two integers, pushes their floor quotient
            Div = 35, "div", None,
            /// mod ; pops two integers, pushes their floor remainder
            Mod = 36, "mod", None,
            /// inf ; pops two integers, pushes 1 if a < b else 0
            Inf = 37, "inf", None,
            /// infeq ; pops two integers, pushes 1 if a <= b else 0
            InfEq = 38, "infeq", None,
            /// sup ; pops two integers, pushes 1 if a > b else 0
            Sup = 39, "sup", None,
            /// supeq ; pops two integers, pushes 1 if a >= b else 0
            SupEq = 40, "supeq", None,
            /// not ; pops an integer, pushes 1 if it was 0 else 0
            Not = 41, "not", None,
            /// load off ; pops a heap or stack address, pushes the cell at base+off
            Load = 42, "load", Integer,
            /// loadn ; like load, but pops the offset from the stack
            LoadN = 43, "loadn", None,
            /// swap ; exchanges the two topmost stack entries
            Swap = 44, "swap", None,
            /// debug ; reserved, no effect
            Debug = 45, "debug", None,
            /// writei ; pops an integer, prints it in decimal
            WriteI = 46, "writei", None,
            /// writelni ; pops an integer, prints it followed by a newline
            WritelnI = 47, "writelni", None,
            /// writef ; pops a float, prints it in decimal
            WriteF = 48, "writef", None,
            /// writelnf ; pops a float, prints it followed by a newline
            WritelnF = 49, "writelnf", None,
            /// writes ; pops a string address, prints its bytes
            WriteS = 50, "writes", None,
            /// writelns ; pops a string address, prints it followed by a newline
            WritelnS = 51, "writelns", None,
            /// read ; reads one line from standard input, pushes a string address
            Read = 52, "read", None,
            /// padd ; pops an integer offset and an address, pushes the displaced address
            Padd = 53, "padd", None,
            /// pop n ; discards the top n stack entries
            Pop = 54, "pop", Integer,
            /// popn ; like pop, but pops the count from the stack
            PopN = 55, "popn", None,
            /// pushi n ; pushes the integer n
            PushI = 56, "pushi", Integer,
            /// pushn n ; pushes n zero-integers
            PushN = 57, "pushn", Integer,
            /// pushf x ; pushes the float x
            PushF = 58, "pushf", Float,
            /// pushs "text" ; allocates text in the string heap, pushes its address
            PushS = 59, "pushs", String,
            /// pushg off ; pushes a copy of the stack entry at gp+off
            PushG = 60, "pushg", Integer,
            /// pushl off ; pushes a copy of the stack entry at fp+off
            PushL = 61, "pushl", Integer,
            /// pushsp ; pushes the stack pointer as a stack address
            PushSP = 62, "pushsp", None,
            /// pushfp ; pushes the frame pointer as a stack address
            PushFP = 63, "pushfp", None,
            /// pushgp ; pushes the global pointer as a stack address
            PushGP = 64, "pushgp", None,
            /// store off ; pops a value and an address, stores at base+off
            Store = 65, "store", Integer,
            /// storel off ; pops a value, stores it at fp+off
            StoreL = 66, "storel", Integer,
            /// storeg off ; pops a value, stores it at gp+off
            StoreG = 67, "storeg", Integer,
            /// storen ; like store, but pops the offset from the stack
            StoreN = 68, "storen", None,
        }
    };
}

macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal, $operand:ident
        ),* $(,)?
    ) => {
        /// A decoded opcode.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        #[repr(u8)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns the shape of this instruction's operand.
            pub const fn operand_kind(&self) -> OperandKind {
                match self {
                    $( Instruction::$name => OperandKind::$operand, )*
                }
            }

            /// Looks up an instruction by mnemonic, case-insensitively.
            pub fn from_mnemonic(name: &str) -> Option<Instruction> {
                let lowered = name.to_ascii_lowercase();
                match lowered.as_str() {
                    $( $mnemonic => Some(Instruction::$name), )*
                    _ => Option::None,
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);
