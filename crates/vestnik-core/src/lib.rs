//! Vestnik VM Core
//!
//! This crate provides the dynamically-typed value system on which the
//! Vestnik virtual machine operates:
//! - Name interner (identifier ↔ dense integer id, case-insensitive lookup)
//! - `Value` sum type with operator dispatch and type conversion
//! - Time/Duration values with the localized format grammar
//! - Go-style blocking channels
//! - JSON marshalling with cycle detection

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod names;
pub mod ops;
pub mod value;

pub use names::{intern, lower_id, name_of, name_of_lower, NameId, ANON};
pub use ops::Op;
pub use value::channel::Channel;
pub use value::duration::VmDuration;
pub use value::func::{func_must_params, Func, NativeFn};
pub use value::time::VmTime;
pub use value::{TypeTag, UserObject, Value, VmMap, VmSlice};

/// Runtime errors of the virtual machine.
///
/// The display strings are the script-observable error texts, which is why
/// they are in the language of the engine's surface syntax.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// Operator or conversion not defined for the operand types
    #[error("Операция между значениями невозможна")]
    TypeMismatch,

    /// Conversion to the requested type is not defined
    #[error("Приведение к типу невозможно")]
    TypeConversion,

    /// Division by integer or decimal zero
    #[error("Деление на ноль")]
    DivisionByZero,

    /// Arithmetic result does not fit the value's domain
    #[error("Переполнение при вычислении")]
    NumericOverflow,

    /// Sequence index outside of [0, len)
    #[error("Индекс за пределами границ")]
    IndexOutOfRange,

    /// Map access with an absent key
    #[error("Ключ не найден: {0}")]
    KeyNotFound(String),

    /// Identifier resolved neither in the scope chain nor in the builtins
    #[error("Не найдено имя: {0}")]
    NameNotFound(String),

    /// Call with the wrong number of arguments to a non-vararg callee
    #[error("Неверное количество аргументов: {got} вместо {want}")]
    ArityMismatch {
        /// Number of arguments the call site supplied
        got: usize,
        /// Number of parameters the callee declares
        want: usize,
    },

    /// Malformed literal during a string conversion
    #[error("Неверный формат: {0}")]
    Parse(String),

    /// Send on a closed channel, or receive from a closed and drained one
    #[error("Канал закрыт")]
    ChannelClosed,

    /// Decryption input shorter than the nonce prefix
    #[error("Размер данных меньше длины вектора инициализации")]
    SmallDecodeBuffer,

    /// JSON marshal/unmarshal failure (including reference cycles)
    #[error("Ошибка JSON: {0}")]
    Json(String),

    /// Time format grammar failure
    #[error("Ошибка форматирования: {0}")]
    Format(String),

    /// Interpreter-level failure carrying a free-form message.
    ///
    /// Raised for conditions that indicate a broken bytecode stream rather
    /// than a script mistake (unknown type id, NEXT without FOREACH, …).
    #[error("Ошибка исполнения: {0}")]
    Runtime(String),
}

/// Result alias used across the VM crates.
pub type VmResult<T> = Result<T, VmError>;
