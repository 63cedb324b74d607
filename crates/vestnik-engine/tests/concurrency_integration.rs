//! Tasks and channels driven through bytecode programs.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vestnik_bytecode::{Instr, Program};
use vestnik_core::names::{self, NameId};
use vestnik_core::{Channel, Op, Value, VmError};
use vestnik_engine::Vm;

#[derive(Clone, Default)]
struct CaptureBuf(Arc<Mutex<Vec<u8>>>);

impl CaptureBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CaptureBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_vm() -> (Vm, CaptureBuf) {
    let buf = CaptureBuf::default();
    (Vm::with_output(buf.clone()), buf)
}

fn id(s: &str) -> NameId {
    names::intern(s)
}

/// Rendezvous over a capacity-0 channel: a spawned task sends 42, the root
/// task receives and prints it.
#[test]
fn test_go_spawn_and_rendezvous() {
    let sender = Program::link(vec![
        Instr::Get { reg: 0, name: id("с"), dotted: false },
        Instr::Load { reg: 1, val: Value::Int(42) },
        Instr::ChanSend { reg: 0, val_reg: 1 },
        Instr::Ret,
    ])
    .unwrap();

    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(0) },
        Instr::MakeChan { reg: 0 },
        Instr::Set { name: id("с"), reg: 0 },
        Instr::Func {
            reg: 1,
            name: id("отправитель"),
            args: vec![],
            var_arg: false,
            code: Arc::new(sender),
        },
        Instr::Call { name: id("отправитель"), num_args: 0, reg_args: 2, var_arg: false, go: true },
        Instr::Get { reg: 3, name: id("с"), dotted: false },
        Instr::ChanRecv { reg: 3 },
        Instr::Mv { dst: 1, src: 3 },
        Instr::Call { name: id("Сообщить"), num_args: 1, reg_args: 1, var_arg: false, go: false },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    vm.wait_tasks();
    assert_eq!(out.text(), "42\n");
    assert_eq!(vm.task_errors().try_iter().count(), 0);
}

/// The send side of a rendezvous completes only after the receive: the
/// spawned task signals completion on a second channel, which must still be
/// empty while the root task has not yet received.
#[test]
fn test_rendezvous_send_blocks_until_receive() {
    let sender = Program::link(vec![
        Instr::Get { reg: 0, name: id("с"), dotted: false },
        Instr::Load { reg: 1, val: Value::Int(42) },
        Instr::ChanSend { reg: 0, val_reg: 1 },
        Instr::Get { reg: 0, name: id("готово"), dotted: false },
        Instr::Load { reg: 1, val: Value::Bool(true) },
        Instr::ChanSend { reg: 0, val_reg: 1 },
        Instr::Ret,
    ])
    .unwrap();

    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(0) },
        Instr::MakeChan { reg: 0 },
        Instr::Set { name: id("с"), reg: 0 },
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::MakeChan { reg: 0 },
        Instr::Set { name: id("готово"), reg: 0 },
        Instr::Func {
            reg: 1,
            name: id("отправитель"),
            args: vec![],
            var_arg: false,
            code: Arc::new(sender),
        },
        Instr::Call { name: id("отправитель"), num_args: 0, reg_args: 2, var_arg: false, go: true },
    ])
    .unwrap();

    let (vm, _) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();

    let chan = match vm.globals().get(names::lower_id(id("с"))).unwrap() {
        Value::Chan(c) => c,
        _ => unreachable!(),
    };
    let done = match vm.globals().get(names::lower_id(id("готово"))).unwrap() {
        Value::Chan(c) => c,
        _ => unreachable!(),
    };

    // the task cannot progress past the rendezvous send
    std::thread::sleep(Duration::from_millis(50));
    assert!(done.is_empty(), "send completed before the receive");

    assert_eq!(chan.recv().unwrap(), Value::Int(42));
    assert_eq!(done.recv().unwrap(), Value::Bool(true));
    vm.wait_tasks();
}

/// A failed task delivers its error to the engine channel exactly once and
/// does not affect the root task.
#[test]
fn test_task_error_reaches_engine_channel() {
    let crash = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::Load { reg: 1, val: Value::Int(0) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Quo },
        Instr::Ret,
    ])
    .unwrap();

    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("авария"),
            args: vec![],
            var_arg: false,
            code: Arc::new(crash),
        },
        Instr::Call { name: id("авария"), num_args: 0, reg_args: 1, var_arg: false, go: true },
        Instr::Load { reg: 1, val: Value::str("живо") },
        Instr::Call { name: id("Сообщить"), num_args: 1, reg_args: 1, var_arg: false, go: false },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    vm.wait_tasks();

    assert_eq!(out.text(), "живо\n");
    let errors: Vec<VmError> = vm.task_errors().try_iter().collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], VmError::DivisionByZero));
}

/// Buffered channel between two script tasks: values arrive in order.
#[test]
fn test_producer_consumer_through_buffered_channel() {
    let producer = Program::link(vec![
        Instr::Get { reg: 0, name: id("к"), dotted: false },
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::Load { reg: 2, val: Value::Int(5) },
        Instr::ForNum { reg: 3, from_reg: 1, to_reg: 2, break_label: 1 },
        Instr::Label { id: 0 },
        Instr::NextNum { reg: 3, end_label: 1 },
        Instr::ChanSend { reg: 0, val_reg: 3 },
        Instr::Jmp { label: 0 },
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 3 },
        Instr::Get { reg: 4, name: id("к"), dotted: false },
        Instr::Call { name: id("Закрыть"), num_args: 1, reg_args: 4, var_arg: false, go: false },
        Instr::Ret,
    ])
    .unwrap();

    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(2) },
        Instr::MakeChan { reg: 0 },
        Instr::Set { name: id("к"), reg: 0 },
        Instr::Func {
            reg: 1,
            name: id("производитель"),
            args: vec![],
            var_arg: false,
            code: Arc::new(producer),
        },
        Instr::Call { name: id("производитель"), num_args: 0, reg_args: 2, var_arg: false, go: true },
        Instr::Load { reg: 5, val: Value::Int(0) },
        Instr::Get { reg: 0, name: id("к"), dotted: false },
        Instr::Foreach { reg: 0, iter_reg: 3, break_label: 1 },
        Instr::Label { id: 0 },
        Instr::Next { reg: 0, val_reg: 4, iter_reg: 3, end_label: 1 },
        Instr::Oper { reg_l: 5, reg_r: 4, op: Op::Add },
        Instr::Jmp { label: 0 },
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 0 },
        Instr::Mv { dst: 1, src: 5 },
        Instr::Call { name: id("Сообщить"), num_args: 1, reg_args: 1, var_arg: false, go: false },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    vm.wait_tasks();
    assert_eq!(out.text(), "15\n");
}

/// Channel capacity property, exercised on the value type directly: with
/// capacity c, the (c+1)-th send blocks; one receive unblocks one sender.
#[test]
fn test_capacity_property() {
    let c = 3;
    let chan = Arc::new(Channel::new(c));
    for i in 0..c {
        chan.send(Value::Int(i as i64)).unwrap();
    }

    let extra = {
        let chan = chan.clone();
        std::thread::spawn(move || chan.send(Value::Int(99)))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!extra.is_finished(), "(c+1)-th send must block");

    assert_eq!(chan.recv().unwrap(), Value::Int(0));
    extra.join().unwrap().unwrap();
    assert_eq!(chan.len(), c);
}
