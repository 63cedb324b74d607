//! Callable values
//!
//! Every callable (native builtin, late-bound method, or a closure the
//! engine compiles out of bytecode) is reduced to one uniform shape: a
//! function taking the argument slice and appending results to a return
//! slice. What a compiled closure captures (its code, its defining scope)
//! lives inside the closure itself.

use super::Value;
use crate::names::{self, NameId};
use crate::{VmError, VmResult};
use std::sync::Arc;

/// Uniform callable signature: arguments in, results appended to `rets`.
pub type NativeFn = Arc<dyn Fn(&[Value], &mut Vec<Value>) -> VmResult<()> + Send + Sync>;

/// A callable value.
pub struct Func {
    /// Interned name; the anonymous sentinel for unnamed callables.
    pub name: NameId,
    /// Declared parameter names of a compiled closure; empty for natives,
    /// which validate arity themselves.
    pub params: Vec<NameId>,
    /// Whether the last parameter receives the remaining positionals as a
    /// slice.
    pub var_arg: bool,
    /// The body.
    pub call: NativeFn,
}

impl Func {
    /// Wrap a native handler under a name.
    pub fn native<F>(name: &str, f: F) -> Func
    where
        F: Fn(&[Value], &mut Vec<Value>) -> VmResult<()> + Send + Sync + 'static,
    {
        Func {
            name: names::intern(name),
            params: Vec::new(),
            var_arg: false,
            call: Arc::new(f),
        }
    }

    /// Invoke and return the first result slot (nil when the callable
    /// produced nothing).
    pub fn invoke(&self, args: &[Value]) -> VmResult<Value> {
        let mut rets = Vec::new();
        (self.call)(args, &mut rets)?;
        Ok(rets.into_iter().next().unwrap_or(Value::Nil))
    }
}

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Func")
            .field("name", &names::name_of(self.name))
            .field("params", &self.params.len())
            .field("var_arg", &self.var_arg)
            .finish()
    }
}

/// Wrap a handler with a fixed-arity check.
pub fn func_must_params<F>(name: &str, n: usize, f: F) -> Func
where
    F: Fn(&[Value], &mut Vec<Value>) -> VmResult<()> + Send + Sync + 'static,
{
    Func::native(name, move |args, rets| {
        if args.len() != n {
            return Err(VmError::ArityMismatch {
                got: args.len(),
                want: n,
            });
        }
        f(args, rets)
    })
}
