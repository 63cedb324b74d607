//! Vestnik VM Bytecode Definitions
//!
//! This crate provides the instruction set of the virtual machine, the
//! textual disassembler, and the `Program` linker that turns a linear
//! instruction list into an executable form (label ids patched to
//! instruction indices, TRY instructions paired with their CATCH).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod instr;
pub mod program;

pub use instr::Instr;
pub use program::{LinkError, Pos, Program};
