//! Instruction set
//!
//! Register-based, three-address. Registers are indices into the current
//! frame; labels are ids resolved to instruction indices at link time.
//! `Display` renders the disassembly line of an instruction.

use crate::program::Program;
use std::fmt;
use std::sync::Arc;
use vestnik_core::names::{self, NameId};
use vestnik_core::{Op, Value};

/// A single bytecode instruction.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Place a literal into a register.
    Load {
        /// Destination register
        reg: usize,
        /// The literal
        val: Value,
    },
    /// Copy one register into another.
    Mv {
        /// Destination register
        dst: usize,
        /// Source register
        src: usize,
    },
    /// Parse the string in `reg` as a number, in place.
    CastNum {
        /// Register holding the value
        reg: usize,
    },
    /// Convert `reg` to the type whose id lives in `type_reg`.
    CastType {
        /// Register holding the value
        reg: usize,
        /// Register holding the interned type name id
        type_reg: usize,
    },
    /// Replace the type id in `reg` with the zero value of that type.
    Make {
        /// Register holding the type id, then the new value
        reg: usize,
    },
    /// Allocate a slice with compile-time length and capacity.
    MakeSlice {
        /// Destination register
        reg: usize,
        /// Element count, nil-filled
        len: usize,
        /// Capacity hint
        cap: usize,
    },
    /// Allocate a slice with length from `reg` and capacity from `cap_reg`.
    MakeArr {
        /// Register holding the length, then the slice
        reg: usize,
        /// Register holding the capacity
        cap_reg: usize,
    },
    /// Allocate a string-map with a size hint.
    MakeMap {
        /// Destination register
        reg: usize,
        /// Size hint
        len: usize,
    },
    /// Replace the buffer size in `reg` with a new channel of that size.
    MakeChan {
        /// Register holding the size, then the channel
        reg: usize,
    },
    /// Store into a slice element at a compile-time index.
    SetIdx {
        /// Register holding the slice
        reg: usize,
        /// Element index
        index: usize,
        /// Register holding the value
        val_reg: usize,
    },
    /// Store into a map under a compile-time key.
    SetKey {
        /// Register holding the map
        reg: usize,
        /// The key
        key: String,
        /// Register holding the value
        val_reg: usize,
    },
    /// Replace `reg` with its element at a runtime index or key.
    GetIdx {
        /// Register holding the slice, map or string
        reg: usize,
        /// Register holding the index or key
        index_reg: usize,
    },
    /// Replace `reg` with a sub-range.
    GetSubslice {
        /// Register holding the slice or string
        reg: usize,
        /// Register holding the begin index
        begin_reg: usize,
        /// Register holding the end index (exclusive)
        end_reg: usize,
    },
    /// Replace `reg` with the named member (field or bound method).
    GetMember {
        /// Register holding the value
        reg: usize,
        /// Interned member name
        name: NameId,
    },
    /// Load the variable named by `name` into `reg`.
    Get {
        /// Destination register
        reg: usize,
        /// Interned variable name
        name: NameId,
        /// The original identifier contained a dot; resolve it as a chain
        /// of member accesses
        dotted: bool,
    },
    /// Assign the variable named by `name` from `reg`.
    Set {
        /// Interned variable name
        name: NameId,
        /// Register holding the value
        reg: usize,
    },
    /// Intern the string in `reg` and overwrite it with the resulting id.
    SetName {
        /// Register holding the name string, then its id
        reg: usize,
    },
    /// Box the value in `reg` for reference semantics.
    Addr {
        /// Register holding the value, then the box
        reg: usize,
    },
    /// Unbox the reference in `reg`.
    Unref {
        /// Register holding the box, then the value
        reg: usize,
    },
    /// In-place unary operator (`-`, `!`, `^`).
    Unary {
        /// Register holding the operand and the result
        reg: usize,
        /// The operator character
        op: char,
    },
    /// Binary operator dispatch; the result lands in the left register.
    Oper {
        /// Left operand and result register
        reg_l: usize,
        /// Right operand register
        reg_r: usize,
        /// The operator
        op: Op,
    },
    /// Call a function.
    Call {
        /// Interned callee name; the anonymous id means the callable lives
        /// in `reg_args` and positionals start one register later
        name: NameId,
        /// Number of arguments
        num_args: usize,
        /// First argument register (arguments ≤ 7), or the register holding
        /// the packed argument slice (arguments > 7)
        reg_args: usize,
        /// The last argument is a slice to be spread into the callee's
        /// vararg tail
        var_arg: bool,
        /// Run the call as an independent task and discard its result
        go: bool,
    },
    /// Build a closure and store it in `reg`; also bind it to `name` unless
    /// anonymous.
    Func {
        /// Destination register
        reg: usize,
        /// Interned function name (anonymous id for lambdas)
        name: NameId,
        /// Parameter name ids
        args: Vec<NameId>,
        /// The last parameter receives remaining positionals as a slice
        var_arg: bool,
        /// The function body, linked separately
        code: Arc<Program>,
    },
    /// Label pseudo-instruction; a no-op at execution time.
    Label {
        /// Label id
        id: usize,
    },
    /// Unconditional jump.
    Jmp {
        /// Target label
        label: usize,
    },
    /// Jump when the register holds a true condition.
    JTrue {
        /// Condition register
        reg: usize,
        /// Target label
        label: usize,
    },
    /// Jump when the register holds a false condition.
    JFalse {
        /// Condition register
        reg: usize,
        /// Target label
        label: usize,
    },
    /// Push an exception handler writing the error into `reg`.
    Try {
        /// Error register of the protected region
        reg: usize,
    },
    /// End of a protected region: branch to `no_err_label` when `reg` holds
    /// no error, fall through into the catch body otherwise.
    Catch {
        /// Error register of the protected region
        reg: usize,
        /// Label to jump to when no error occurred
        no_err_label: usize,
    },
    /// Pop the exception handler keyed by `reg`.
    PopTry {
        /// Error register of the protected region
        reg: usize,
    },
    /// Push a loop frame and initialize iteration over `reg`.
    Foreach {
        /// Register holding the iterated value
        reg: usize,
        /// Register receiving the iterator state
        iter_reg: usize,
        /// Label jumped to by `Break`
        break_label: usize,
    },
    /// Advance the iterator; jump to `end_label` on exhaustion.
    Next {
        /// Register holding the iterated value
        reg: usize,
        /// Register receiving the next element
        val_reg: usize,
        /// Register holding the iterator state
        iter_reg: usize,
        /// Label jumped to when the iteration is done
        end_label: usize,
    },
    /// Pop the loop frame keyed by `reg`.
    PopFor {
        /// Loop key register
        reg: usize,
    },
    /// Push a numeric loop frame; `reg` iterates from `from_reg` to
    /// `to_reg` inclusive.
    ForNum {
        /// Iteration value register
        reg: usize,
        /// Register holding the first value
        from_reg: usize,
        /// Register holding the last value
        to_reg: usize,
        /// Label jumped to by `Break`
        break_label: usize,
    },
    /// Increment the numeric iterator; jump to `end_label` on overshoot.
    NextNum {
        /// Iteration value register
        reg: usize,
        /// Label jumped to when the range is exhausted
        end_label: usize,
    },
    /// Push a loop frame with only a break target.
    While {
        /// Loop key register (the condition register by convention)
        reg: usize,
        /// Label jumped to by `Break`
        break_label: usize,
    },
    /// Jump to the innermost loop's break label.
    Break,
    /// Jump to the innermost loop's continue target.
    Continue,
    /// Blocking send of `val_reg` into the channel in `reg`.
    ChanSend {
        /// Register holding the channel
        reg: usize,
        /// Register holding the value
        val_reg: usize,
    },
    /// Blocking receive; the result replaces the channel in `reg`.
    ChanRecv {
        /// Register holding the channel, then the received value
        reg: usize,
    },
    /// Return from the current function.
    Ret,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Load { reg, val } => write!(f, "LOAD r{}, {:?}", reg, val),
            Instr::Mv { dst, src } => write!(f, "MV r{}, r{}", dst, src),
            Instr::CastNum { reg } => write!(f, "CAST r{}, NUMBER", reg),
            Instr::CastType { reg, type_reg } => {
                write!(f, "CAST r{} AS TYPE r{}", reg, type_reg)
            }
            Instr::Make { reg } => write!(f, "MAKE r{} AS TYPE r{}", reg, reg),
            Instr::MakeSlice { reg, len, cap } => {
                write!(f, "MAKESLICE r{}, LEN {}, CAP {}", reg, len, cap)
            }
            Instr::MakeArr { reg, cap_reg } => {
                write!(f, "MAKESLICE r{}, LEN r{}, CAP r{}", reg, reg, cap_reg)
            }
            Instr::MakeMap { reg, len } => write!(f, "MAKEMAP r{}, LEN {}", reg, len),
            Instr::MakeChan { reg } => write!(f, "MAKECHAN r{} SIZE r{}", reg, reg),
            Instr::SetIdx { reg, index, val_reg } => {
                write!(f, "SETIDX r{}[{}], r{}", reg, index, val_reg)
            }
            Instr::SetKey { reg, key, val_reg } => {
                write!(f, "SETKEY r{}[{:?}], r{}", reg, key, val_reg)
            }
            Instr::GetIdx { reg, index_reg } => write!(f, "GETIDX r{}[r{}]", reg, index_reg),
            Instr::GetSubslice {
                reg,
                begin_reg,
                end_reg,
            } => write!(f, "SLICE r{}[r{} : r{}]", reg, begin_reg, end_reg),
            Instr::GetMember { reg, name } => {
                write!(f, "GETMEMBER r{}, {:?}", reg, &*names::name_of(*name))
            }
            Instr::Get { reg, name, .. } => {
                write!(f, "GET r{}, {:?}", reg, &*names::name_of(*name))
            }
            Instr::Set { name, reg } => {
                write!(f, "SET {:?}, r{}", &*names::name_of(*name), reg)
            }
            Instr::SetName { reg } => write!(f, "SETNAME r{}", reg),
            Instr::Addr { reg } => write!(f, "ADDR r{}", reg),
            Instr::Unref { reg } => write!(f, "UNREF r{}", reg),
            Instr::Unary { reg, op } => write!(f, "UNARY {}r{}", op, reg),
            Instr::Oper { reg_l, reg_r, op } => {
                write!(f, "OP r{}, {:?}, r{}", reg_l, op.symbol(), reg_r)
            }
            Instr::Call {
                name,
                num_args,
                reg_args,
                var_arg,
                go,
            } => {
                if name.is_anon() {
                    write!(
                        f,
                        "CALL ANON r{}, ARGS r{}, ARGS_COUNT {}, VARARG {}, GO {}",
                        reg_args,
                        reg_args + 1,
                        num_args,
                        var_arg,
                        go
                    )
                } else {
                    write!(
                        f,
                        "CALL {:?}, ARGS r{}, ARGS_COUNT {}, VARARG {}, GO {}",
                        &*names::name_of(*name),
                        reg_args,
                        num_args,
                        var_arg,
                        go
                    )
                }
            }
            Instr::Func {
                reg,
                name,
                args,
                var_arg,
                code,
            } => {
                let params = args
                    .iter()
                    .map(|a| names::name_of(*a).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let tail = if *var_arg { " ..." } else { "" };
                writeln!(
                    f,
                    "FUNC r{}, {:?}, ({}{})",
                    reg,
                    &*names::name_of(*name),
                    params,
                    tail
                )?;
                writeln!(f, "{{")?;
                write!(f, "{}", code)?;
                write!(f, "}}")
            }
            Instr::Label { id } => write!(f, "L{}:", id),
            Instr::Jmp { label } => write!(f, "JMP L{}", label),
            Instr::JTrue { reg, label } => write!(f, "JTRUE r{}, L{}", reg, label),
            Instr::JFalse { reg, label } => write!(f, "JFALSE r{}, L{}", reg, label),
            Instr::Try { reg } => write!(f, "TRY r{}", reg),
            Instr::Catch { reg, no_err_label } => {
                write!(f, "CATCH r{}, NOERR L{}", reg, no_err_label)
            }
            Instr::PopTry { reg } => write!(f, "POPTRY r{}", reg),
            Instr::Foreach {
                reg,
                iter_reg,
                break_label,
            } => write!(f, "FOREACH r{}, ITER r{}, BREAK TO L{}", reg, iter_reg, break_label),
            Instr::Next {
                reg,
                val_reg,
                iter_reg,
                end_label,
            } => write!(
                f,
                "NEXT r{}, FROM r{}, ITER r{}, ENDLOOP L{}",
                val_reg, reg, iter_reg, end_label
            ),
            Instr::PopFor { reg } => write!(f, "POPFOR r{}", reg),
            Instr::ForNum {
                reg,
                from_reg,
                to_reg,
                break_label,
            } => write!(
                f,
                "FORNUM r{}, FROM r{}, TO r{}, BREAK TO L{}",
                reg, from_reg, to_reg, break_label
            ),
            Instr::NextNum { reg, end_label } => {
                write!(f, "NEXTNUM r{}, ENDLOOP L{}", reg, end_label)
            }
            Instr::While { reg, break_label } => {
                write!(f, "WHILE r{}, BREAK TO L{}", reg, break_label)
            }
            Instr::Break => write!(f, "BREAK"),
            Instr::Continue => write!(f, "CONTINUE"),
            Instr::ChanSend { reg, val_reg } => write!(f, "CHAN<- r{}, r{}", reg, val_reg),
            Instr::ChanRecv { reg } => write!(f, "<-CHAN r{}, r{}", reg, reg),
            Instr::Ret => write!(f, "RETURN"),
        }
    }
}
