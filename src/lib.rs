//! Stack-based bytecode virtual machine.
//!
//! Assembles a small, explicitly-typed assembly-like language into compact
//! bytecode and executes it against four address spaces: the operand stack,
//! the call-frame stack, a typed heap, and a byte-addressable string heap.
//!
//! # Pipeline
//!
//! ```text
//! source text -> assembler -> bytecode + source map -> vm
//! ```
//!
//! The [`assembler`] parses text and emits bytecode through the [`bytecode`]
//! writer, resolving labels by back-patching and recording a [`source_map`]
//! span for every instruction. The [`vm`] fetches opcodes through the
//! bytecode reader and executes them over [`value`]s; on a fault, the source
//! map translates the failing bytecode offset back to source text.
//!
//! # Example
//!
//! ```
//! use stackvm::assembler::Parser;
//! use stackvm::vm::VM;
//!
//! let mut parser = Parser::new("pushi 2 pushi 3 add stop");
//! let reader = parser.parse().expect("assembly failed");
//! let mut vm = VM::new(reader);
//! vm.execute().expect("execution failed");
//! assert_eq!(vm.stack_len(), 1);
//! ```

pub mod assembler;
pub mod bytecode;
pub mod bytes;
pub mod errors;
pub mod ffi;
pub mod isa;
pub mod log;
pub mod rbtree;
pub mod source_map;
pub mod value;
pub mod vm;
