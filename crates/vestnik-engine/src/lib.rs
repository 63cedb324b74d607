//! Vestnik VM Engine
//!
//! The register-based interpreter: call frames, scope chain, the
//! fetch/decode/dispatch loop with per-frame exception and loop stacks,
//! go-style task spawn, and the builtins registry.

pub mod builtins;
pub mod env;
pub mod interp;
pub mod regs;
pub mod task;

pub use builtins::{Builtins, Output};
pub use env::Env;
pub use interp::Vm;
pub use regs::Registers;
pub use task::TaskHub;

pub use vestnik_core::{VmError, VmResult};
