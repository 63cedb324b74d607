//! The fetch/decode/dispatch loop
//!
//! A frame is one `exec` activation: its register file, its handler stack
//! and its loop stack live on the Rust stack of the call and die with it.
//! Compiled closures are reduced to the uniform callable shape of
//! `vestnik_core::Func`; calling one re-enters `exec` with a child scope of
//! the closure's defining scope.
//!
//! Error routing: any instruction failure is diverted to the innermost
//! handler if one is armed: the error text lands in the handler's register
//! and control moves to its CATCH. Without a handler the error unwinds the
//! frame and, ultimately, the task.

use crate::builtins::{Builtins, Output};
use crate::env::Env;
use crate::regs::Registers;
use crate::task::TaskHub;
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::io::Write;
use std::sync::{Arc, Weak};
use vestnik_bytecode::{Instr, Program};
use vestnik_core::names::{self, NameId};
use vestnik_core::{Func, TypeTag, Value, VmError, VmResult};

/// The virtual machine.
pub struct Vm {
    engine: Arc<Engine>,
}

/// Shared engine state reachable from every task.
pub(crate) struct Engine {
    pub(crate) globals: Env,
    pub(crate) builtins: Builtins,
    pub(crate) hub: TaskHub,
}

impl Vm {
    /// Engine writing to standard output.
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    /// Engine writing `Сообщить` output to the given sink.
    pub fn with_output<W: Write + Send + 'static>(writer: W) -> Self {
        let output: Output = Arc::new(Mutex::new(writer));
        Vm {
            engine: Arc::new(Engine {
                globals: Env::root(),
                builtins: Builtins::standard(output),
                hub: TaskHub::new(),
            }),
        }
    }

    /// The global scope.
    pub fn globals(&self) -> &Env {
        &self.engine.globals
    }

    /// Register an additional native builtin.
    pub fn register_builtin(&self, func: Func) {
        self.engine.builtins.register(func);
    }

    /// Execute a linked program in a root frame over the global scope.
    ///
    /// Top-level assignments land in the global scope and stay visible to
    /// later runs. Returns the root task's error; errors of spawned tasks
    /// stay observable on [`Vm::task_errors`].
    pub fn run(&self, program: &Arc<Program>) -> VmResult<()> {
        let mut regs = Registers::new();
        exec(&self.engine, program, &self.engine.globals, &mut regs)
    }

    /// Errors delivered by failed go-spawned tasks.
    pub fn task_errors(&self) -> &Receiver<VmError> {
        self.engine.hub.errors()
    }

    /// Join every task spawned so far.
    pub fn wait_tasks(&self) {
        self.engine.hub.wait();
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

enum Flow {
    Next,
    Goto(usize),
    Return,
}

struct Handler {
    reg: usize,
    catch_ip: usize,
    /// Loop stack depth at arming time, restored when the handler fires
    loops_len: usize,
}

enum LoopIter {
    Slice {
        items: vestnik_core::VmSlice,
        idx: usize,
    },
    /// Insertion-order key snapshot; keys removed mid-loop are skipped
    Map {
        map: vestnik_core::VmMap,
        keys: Vec<String>,
        idx: usize,
    },
    Chan(Arc<vestnik_core::Channel>),
    Str {
        chars: Vec<char>,
        idx: usize,
    },
    Num {
        to: i64,
    },
    While,
}

struct LoopFrame {
    key: usize,
    break_label: usize,
    continue_ip: usize,
    iter: LoopIter,
}

/// Run `prog` to completion in the given scope and register file.
pub(crate) fn exec(
    engine: &Arc<Engine>,
    prog: &Arc<Program>,
    env: &Env,
    regs: &mut Registers,
) -> VmResult<()> {
    let mut ip = 0usize;
    let mut handlers: Vec<Handler> = Vec::new();
    let mut loops: Vec<LoopFrame> = Vec::new();

    while ip < prog.code.len() {
        match step(engine, prog, env, regs, &mut handlers, &mut loops, ip) {
            Ok(Flow::Next) => ip += 1,
            Ok(Flow::Goto(target)) => ip = target,
            Ok(Flow::Return) => return Ok(()),
            Err(e) => match handlers.pop() {
                Some(handler) => {
                    loops.truncate(handler.loops_len);
                    regs.set(handler.reg, Value::string(e.to_string()));
                    ip = handler.catch_ip;
                }
                None => {
                    return Err(match prog.pos(ip) {
                        Some(pos) if pos.line > 0 => VmError::Runtime(format!(
                            "{} (строка {}, колонка {})",
                            e, pos.line, pos.col
                        )),
                        _ => e,
                    })
                }
            },
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn step(
    engine: &Arc<Engine>,
    prog: &Arc<Program>,
    env: &Env,
    regs: &mut Registers,
    handlers: &mut Vec<Handler>,
    loops: &mut Vec<LoopFrame>,
    ip: usize,
) -> VmResult<Flow> {
    match &prog.code[ip] {
        Instr::Load { reg, val } => regs.set(*reg, val.clone()),
        Instr::Mv { dst, src } => {
            let v = regs.get(*src);
            regs.set(*dst, v);
        }
        Instr::CastNum { reg } => {
            let v = regs.get(*reg).cast_number()?;
            regs.set(*reg, v);
        }
        Instr::CastType { reg, type_reg } => {
            let tag = type_tag_from_value(&regs.get(*type_reg))?;
            let v = regs.get(*reg).convert_to_type(tag)?;
            regs.set(*reg, v);
        }
        Instr::Make { reg } => {
            let tag = type_tag_from_value(&regs.get(*reg))?;
            regs.set(*reg, tag.zero_value()?);
        }
        Instr::MakeSlice { reg, len, cap } => {
            let mut items = Vec::with_capacity((*len).max(*cap));
            items.resize(*len, Value::Nil);
            regs.set(*reg, Value::slice(items));
        }
        Instr::MakeArr { reg, cap_reg } => {
            let len = usize::try_from(regs.get(*reg).as_int()?)
                .map_err(|_| VmError::IndexOutOfRange)?;
            let cap = usize::try_from(regs.get(*cap_reg).as_int()?).unwrap_or(len);
            let mut items = Vec::with_capacity(len.max(cap));
            items.resize(len, Value::Nil);
            regs.set(*reg, Value::slice(items));
        }
        Instr::MakeMap { reg, len } => {
            regs.set(*reg, Value::map(indexmap::IndexMap::with_capacity(*len)));
        }
        Instr::MakeChan { reg } => {
            let size = usize::try_from(regs.get(*reg).as_int()?).unwrap_or(0);
            regs.set(
                *reg,
                Value::Chan(Arc::new(vestnik_core::Channel::new(size))),
            );
        }
        Instr::SetIdx { reg, index, val_reg } => {
            let value = regs.get(*val_reg);
            match regs.get(*reg) {
                Value::Slice(items) => {
                    let mut items = items.write();
                    let slot = items.get_mut(*index).ok_or(VmError::IndexOutOfRange)?;
                    *slot = value;
                }
                _ => return Err(VmError::TypeMismatch),
            }
        }
        Instr::SetKey { reg, key, val_reg } => {
            let value = regs.get(*val_reg);
            match regs.get(*reg) {
                Value::Map(entries) => {
                    entries.write().insert(key.clone(), value);
                }
                _ => return Err(VmError::TypeMismatch),
            }
        }
        Instr::GetIdx { reg, index_reg } => {
            let v = get_index(&regs.get(*reg), &regs.get(*index_reg))?;
            regs.set(*reg, v);
        }
        Instr::GetSubslice {
            reg,
            begin_reg,
            end_reg,
        } => {
            let begin = regs.get(*begin_reg).as_int()?;
            let end = regs.get(*end_reg).as_int()?;
            let v = get_subslice(&regs.get(*reg), begin, end)?;
            regs.set(*reg, v);
        }
        Instr::GetMember { reg, name } => {
            let v = get_member(&regs.get(*reg), *name)?;
            regs.set(*reg, v);
        }
        Instr::Get { reg, name, dotted } => {
            let v = if *dotted {
                resolve_dotted(engine, env, *name)?
            } else {
                lookup_name(engine, env, *name)?
            };
            regs.set(*reg, v);
        }
        Instr::Set { name, reg } => {
            env.assign(names::lower_id(*name), regs.get(*reg));
        }
        Instr::SetName { reg } => match regs.get(*reg) {
            Value::String(s) => {
                let id = names::intern(&s);
                regs.set(*reg, Value::Int(id.0 as i64));
            }
            _ => return Err(VmError::TypeMismatch),
        },
        Instr::Addr { reg } => {
            let boxed = Value::Ref(Arc::new(RwLock::new(regs.get(*reg))));
            regs.set(*reg, boxed);
        }
        Instr::Unref { reg } => match regs.get(*reg) {
            Value::Ref(inner) => {
                let v = inner.read().clone();
                regs.set(*reg, v);
            }
            _ => return Err(VmError::TypeMismatch),
        },
        Instr::Unary { reg, op } => {
            let v = regs.get(*reg).eval_unary(*op)?;
            regs.set(*reg, v);
        }
        Instr::Oper { reg_l, reg_r, op } => {
            let v = regs.get(*reg_l).eval_binop(*op, &regs.get(*reg_r))?;
            regs.set(*reg_l, v);
        }
        Instr::Call {
            name,
            num_args,
            reg_args,
            var_arg,
            go,
        } => do_call(engine, env, regs, *name, *num_args, *reg_args, *var_arg, *go)?,
        Instr::Func {
            reg,
            name,
            args,
            var_arg,
            code,
        } => {
            let func = make_closure(engine, env, *name, args.clone(), *var_arg, code.clone());
            if !name.is_anon() {
                env.define(names::lower_id(*name), Value::Func(func.clone()));
            }
            regs.set(*reg, Value::Func(func));
        }
        Instr::Label { .. } => {}
        Instr::Jmp { label } => return jump(prog, *label),
        Instr::JTrue { reg, label } => {
            if regs.get(*reg).truthy()? {
                return jump(prog, *label);
            }
        }
        Instr::JFalse { reg, label } => {
            if !regs.get(*reg).truthy()? {
                return jump(prog, *label);
            }
        }
        Instr::Try { reg } => {
            let catch_ip = prog
                .catch_ip(ip)
                .ok_or_else(|| VmError::Runtime("TRY без CATCH".into()))?;
            handlers.push(Handler {
                reg: *reg,
                catch_ip,
                loops_len: loops.len(),
            });
            regs.set(*reg, Value::Nil);
        }
        Instr::Catch { reg, no_err_label } => {
            if regs.get(*reg).is_nil() {
                return jump(prog, *no_err_label);
            }
        }
        Instr::PopTry { reg } => {
            if let Some(i) = handlers.iter().rposition(|h| h.reg == *reg) {
                handlers.truncate(i);
            }
        }
        Instr::Foreach {
            reg,
            iter_reg,
            break_label,
        } => {
            let iter = match regs.get(*reg) {
                Value::Slice(items) => LoopIter::Slice { items, idx: 0 },
                Value::Map(map) => {
                    let keys = map.read().keys().cloned().collect();
                    LoopIter::Map { map, keys, idx: 0 }
                }
                Value::Chan(chan) => LoopIter::Chan(chan),
                Value::String(s) => LoopIter::Str {
                    chars: s.chars().collect(),
                    idx: 0,
                },
                _ => return Err(VmError::TypeMismatch),
            };
            loops.push(LoopFrame {
                key: *reg,
                break_label: *break_label,
                continue_ip: ip + 1,
                iter,
            });
            regs.set(*iter_reg, Value::Int(0));
        }
        Instr::Next {
            val_reg,
            iter_reg,
            end_label,
            ..
        } => {
            let frame = loops
                .last_mut()
                .ok_or_else(|| VmError::Runtime("NEXT вне цикла".into()))?;
            match advance(&mut frame.iter)? {
                Some(v) => {
                    regs.set(*val_reg, v);
                    let state = match &frame.iter {
                        LoopIter::Slice { idx, .. }
                        | LoopIter::Map { idx, .. }
                        | LoopIter::Str { idx, .. } => *idx as i64,
                        _ => 0,
                    };
                    regs.set(*iter_reg, Value::Int(state));
                }
                None => return jump(prog, *end_label),
            }
        }
        Instr::PopFor { reg } => {
            if let Some(i) = loops.iter().rposition(|l| l.key == *reg) {
                loops.truncate(i);
            }
        }
        Instr::ForNum {
            reg,
            from_reg,
            to_reg,
            break_label,
        } => {
            let from = regs.get(*from_reg).as_int()?;
            let to = regs.get(*to_reg).as_int()?;
            // the matching NEXTNUM pre-increments, so start one below
            regs.set(*reg, Value::Int(from - 1));
            loops.push(LoopFrame {
                key: *reg,
                break_label: *break_label,
                continue_ip: ip + 1,
                iter: LoopIter::Num { to },
            });
        }
        Instr::NextNum { reg, end_label } => {
            let frame = loops
                .last()
                .ok_or_else(|| VmError::Runtime("NEXTNUM вне цикла".into()))?;
            let LoopIter::Num { to } = frame.iter else {
                return Err(VmError::Runtime("NEXTNUM вне числового цикла".into()));
            };
            let next = regs
                .get(*reg)
                .as_int()?
                .checked_add(1)
                .ok_or(VmError::NumericOverflow)?;
            regs.set(*reg, Value::Int(next));
            if next > to {
                return jump(prog, *end_label);
            }
        }
        Instr::While { reg, break_label } => {
            loops.push(LoopFrame {
                key: *reg,
                break_label: *break_label,
                continue_ip: ip + 1,
                iter: LoopIter::While,
            });
        }
        Instr::Break => {
            let frame = loops
                .last()
                .ok_or_else(|| VmError::Runtime("Прервать вне цикла".into()))?;
            return jump(prog, frame.break_label);
        }
        Instr::Continue => {
            let frame = loops
                .last()
                .ok_or_else(|| VmError::Runtime("Продолжить вне цикла".into()))?;
            return Ok(Flow::Goto(frame.continue_ip));
        }
        Instr::ChanSend { reg, val_reg } => match regs.get(*reg) {
            Value::Chan(chan) => chan.send(regs.get(*val_reg))?,
            _ => return Err(VmError::TypeMismatch),
        },
        Instr::ChanRecv { reg } => match regs.get(*reg) {
            Value::Chan(chan) => {
                let v = chan.recv()?;
                regs.set(*reg, v);
            }
            _ => return Err(VmError::TypeMismatch),
        },
        Instr::Ret => return Ok(Flow::Return),
    }
    Ok(Flow::Next)
}

fn jump(prog: &Program, label: usize) -> VmResult<Flow> {
    prog.label_ip(label)
        .map(Flow::Goto)
        .ok_or_else(|| VmError::Runtime(format!("метка L{} не определена", label)))
}

fn advance(iter: &mut LoopIter) -> VmResult<Option<Value>> {
    Ok(match iter {
        LoopIter::Slice { items, idx } => {
            let items = items.read();
            if *idx < items.len() {
                let v = items[*idx].clone();
                *idx += 1;
                Some(v)
            } else {
                None
            }
        }
        LoopIter::Map { map, keys, idx } => loop {
            if *idx >= keys.len() {
                break None;
            }
            let key = &keys[*idx];
            *idx += 1;
            if map.read().contains_key(key) {
                break Some(Value::str(key));
            }
        },
        LoopIter::Chan(chan) => chan.recv_opt()?,
        LoopIter::Str { chars, idx } => {
            if *idx < chars.len() {
                let v = Value::string(chars[*idx].to_string());
                *idx += 1;
                Some(v)
            } else {
                None
            }
        }
        LoopIter::Num { .. } | LoopIter::While => {
            return Err(VmError::Runtime("NEXT вне цикла по коллекции".into()))
        }
    })
}

fn lookup_name(engine: &Arc<Engine>, env: &Env, name: NameId) -> VmResult<Value> {
    let lower = names::lower_id(name);
    if let Some(v) = env.get(lower) {
        return Ok(v);
    }
    if let Some(f) = engine.builtins.get(lower) {
        return Ok(Value::Func(f));
    }
    Err(VmError::NameNotFound(names::name_of(name).to_string()))
}

fn resolve_dotted(engine: &Arc<Engine>, env: &Env, name: NameId) -> VmResult<Value> {
    let full = names::name_of(name);
    let mut parts = full.split('.');
    let head = parts
        .next()
        .ok_or_else(|| VmError::NameNotFound(full.to_string()))?;
    let mut value = lookup_name(engine, env, names::intern(head))?;
    for part in parts {
        value = get_member(&value, names::intern(part))?;
    }
    Ok(value)
}

fn get_member(value: &Value, name: NameId) -> VmResult<Value> {
    if let Value::Map(entries) = value {
        let key = names::name_of(name);
        let map = entries.read();
        if let Some(v) = map.get(&*key) {
            return Ok(v.clone());
        }
        // structure keys resolve case-insensitively
        let lower = names::name_of_lower(name);
        for (k, v) in map.iter() {
            if k.to_lowercase() == *lower {
                return Ok(v.clone());
            }
        }
        return Err(VmError::KeyNotFound(key.to_string()));
    }
    if let Some(f) = value.method_member(name) {
        return Ok(Value::Func(Arc::new(f)));
    }
    Err(VmError::NameNotFound(names::name_of(name).to_string()))
}

fn get_index(container: &Value, index: &Value) -> VmResult<Value> {
    match (container, index) {
        (Value::Slice(items), Value::Int(i)) => {
            let items = items.read();
            let i = usize::try_from(*i).map_err(|_| VmError::IndexOutOfRange)?;
            items.get(i).cloned().ok_or(VmError::IndexOutOfRange)
        }
        (Value::Map(entries), Value::String(key)) => entries
            .read()
            .get(&**key)
            .cloned()
            .ok_or_else(|| VmError::KeyNotFound(key.to_string())),
        (Value::String(s), Value::Int(i)) => {
            let i = usize::try_from(*i).map_err(|_| VmError::IndexOutOfRange)?;
            s.chars()
                .nth(i)
                .map(|c| Value::string(c.to_string()))
                .ok_or(VmError::IndexOutOfRange)
        }
        _ => Err(VmError::TypeMismatch),
    }
}

fn get_subslice(container: &Value, begin: i64, end: i64) -> VmResult<Value> {
    let range = |len: usize| -> VmResult<(usize, usize)> {
        let begin = usize::try_from(begin).map_err(|_| VmError::IndexOutOfRange)?;
        let end = usize::try_from(end).map_err(|_| VmError::IndexOutOfRange)?;
        if begin > end || end > len {
            return Err(VmError::IndexOutOfRange);
        }
        Ok((begin, end))
    };
    match container {
        Value::Slice(items) => {
            let items = items.read();
            let (b, e) = range(items.len())?;
            Ok(Value::slice(items[b..e].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (b, e) = range(chars.len())?;
            Ok(Value::string(chars[b..e].iter().collect()))
        }
        _ => Err(VmError::TypeMismatch),
    }
}

fn type_tag_from_value(value: &Value) -> VmResult<TypeTag> {
    let id = value
        .as_int()
        .map_err(|_| VmError::Runtime("ожидался идентификатор типа".into()))?;
    let id = u32::try_from(id).map_err(|_| VmError::Runtime("неверный идентификатор типа".into()))?;
    let lower = names::name_of_lower(NameId(id));
    TypeTag::from_name(&lower)
        .ok_or_else(|| VmError::Runtime(format!("неизвестный тип: {}", lower)))
}

#[allow(clippy::too_many_arguments)]
fn do_call(
    engine: &Arc<Engine>,
    env: &Env,
    regs: &mut Registers,
    name: NameId,
    num_args: usize,
    reg_args: usize,
    var_arg: bool,
    go: bool,
) -> VmResult<()> {
    let (callee, arg_base) = if name.is_anon() {
        // indirect: the callable lives in reg_args, positionals follow
        let callee = match regs.get(reg_args) {
            Value::Func(f) => f,
            _ => return Err(VmError::TypeMismatch),
        };
        (callee, reg_args + 1)
    } else {
        let callee = match lookup_name(engine, env, name)? {
            Value::Func(f) => f,
            _ => return Err(VmError::TypeMismatch),
        };
        (callee, reg_args)
    };

    let args = collect_args(regs, arg_base, num_args, var_arg)?;

    if go {
        // independent task; its return value is discarded
        engine.hub.spawn(callee, args);
        return Ok(());
    }

    let mut rets = Vec::new();
    (callee.call)(&args, &mut rets)?;
    regs.set(reg_args, rets.into_iter().next().unwrap_or(Value::Nil));
    Ok(())
}

fn collect_args(
    regs: &Registers,
    base: usize,
    num_args: usize,
    var_arg: bool,
) -> VmResult<Vec<Value>> {
    // up to 7 arguments travel in consecutive registers, more arrive packed
    // into a single slice
    let mut args: Vec<Value> = if num_args <= 7 {
        (0..num_args).map(|i| regs.get(base + i)).collect()
    } else {
        match regs.get(base) {
            Value::Slice(items) => items.read().clone(),
            _ => return Err(VmError::TypeMismatch),
        }
    };
    if var_arg {
        match args.pop() {
            Some(Value::Slice(items)) => args.extend(items.read().iter().cloned()),
            _ => return Err(VmError::TypeMismatch),
        }
    }
    Ok(args)
}

fn make_closure(
    engine: &Arc<Engine>,
    env: &Env,
    name: NameId,
    params: Vec<NameId>,
    var_arg: bool,
    code: Arc<Program>,
) -> Arc<Func> {
    let weak: Weak<Engine> = Arc::downgrade(engine);
    let def_env = env.clone();
    let call_params = params.clone();
    let call = move |args: &[Value], rets: &mut Vec<Value>| -> VmResult<()> {
        let engine = weak
            .upgrade()
            .ok_or_else(|| VmError::Runtime("движок остановлен".into()))?;
        let frame_env = def_env.child();
        bind_params(&call_params, var_arg, args, &frame_env)?;
        let mut frame_regs = Registers::new();
        exec(&engine, &code, &frame_env, &mut frame_regs)?;
        // by convention the return value is left in register 0
        rets.push(frame_regs.get(0));
        Ok(())
    };
    Arc::new(Func {
        name,
        params,
        var_arg,
        call: Arc::new(call),
    })
}

fn bind_params(params: &[NameId], var_arg: bool, args: &[Value], env: &Env) -> VmResult<()> {
    if var_arg {
        let fixed = params.len().saturating_sub(1);
        if args.len() < fixed {
            return Err(VmError::ArityMismatch {
                got: args.len(),
                want: fixed,
            });
        }
        for (p, a) in params[..fixed].iter().zip(args) {
            env.define(names::lower_id(*p), a.clone());
        }
        if let Some(last) = params.last() {
            env.define(names::lower_id(*last), Value::slice(args[fixed..].to_vec()));
        }
    } else {
        if args.len() != params.len() {
            return Err(VmError::ArityMismatch {
                got: args.len(),
                want: params.len(),
            });
        }
        for (p, a) in params.iter().zip(args) {
            env.define(names::lower_id(*p), a.clone());
        }
    }
    Ok(())
}
