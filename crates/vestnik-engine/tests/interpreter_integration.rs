//! End-to-end interpreter scenarios over hand-assembled bytecode.
//!
//! The programs mirror what the compiler emits for the surface language:
//! `Функция`, `Если`, `Попытка`, `Для Каждого` and friends.

use std::io::Write;
use std::sync::{Arc, Mutex};
use vestnik_bytecode::{Instr, Program};
use vestnik_core::names::{self, NameId};
use vestnik_core::{Op, Value, VmError};
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

fn call(name: &str, num_args: usize, reg_args: usize) -> Instr {
    Instr::Call {
        name: id(name),
        num_args,
        reg_args,
        var_arg: false,
        go: false,
    }
}

/// `Функция а(б,в,г) возврат б+в+г КонецФункции  Сообщить(а(1,2,3))`
#[test]
fn test_arithmetic_call_and_print() {
    let body = Program::link(vec![
        Instr::Get { reg: 0, name: id("б"), dotted: false },
        Instr::Get { reg: 1, name: id("в"), dotted: false },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Add },
        Instr::Get { reg: 1, name: id("г"), dotted: false },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Add },
        Instr::Ret,
    ])
    .unwrap();

    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("а"),
            args: vec![id("б"), id("в"), id("г")],
            var_arg: false,
            code: Arc::new(body),
        },
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::Load { reg: 2, val: Value::Int(2) },
        Instr::Load { reg: 3, val: Value::Int(3) },
        call("а", 3, 1),
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "6\n");
}

/// `б=10 в=20 если б<>в тогда д=б иначе д=0 конецЕсли Сообщить(д)`
#[test]
fn test_if_else_and_variable_capture() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(10) },
        Instr::Set { name: id("б"), reg: 0 },
        Instr::Load { reg: 0, val: Value::Int(20) },
        Instr::Set { name: id("в"), reg: 0 },
        Instr::Get { reg: 0, name: id("б"), dotted: false },
        Instr::Get { reg: 1, name: id("в"), dotted: false },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Neq },
        Instr::JFalse { reg: 0, label: 0 },
        Instr::Get { reg: 0, name: id("б"), dotted: false },
        Instr::Set { name: id("д"), reg: 0 },
        Instr::Jmp { label: 1 },
        Instr::Label { id: 0 },
        Instr::Load { reg: 0, val: Value::Int(0) },
        Instr::Set { name: id("д"), reg: 0 },
        Instr::Label { id: 1 },
        Instr::Get { reg: 1, name: id("д"), dotted: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "10\n");
}

/// `Попытка  в=1/0  Исключение  Сообщить("поймано") КонецПопытки`
#[test]
fn test_exception_handling() {
    let main = Program::link(vec![
        Instr::Try { reg: 5 },
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::Load { reg: 1, val: Value::Int(0) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Quo },
        Instr::Set { name: id("в"), reg: 0 },
        Instr::Catch { reg: 5, no_err_label: 0 },
        Instr::Load { reg: 1, val: Value::str("поймано") },
        call("Сообщить", 1, 1),
        Instr::Label { id: 0 },
        Instr::PopTry { reg: 5 },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "поймано\n");
}

#[test]
fn test_try_without_error_skips_catch() {
    let main = Program::link(vec![
        Instr::Try { reg: 5 },
        Instr::Load { reg: 1, val: Value::str("тело") },
        call("Сообщить", 1, 1),
        Instr::Catch { reg: 5, no_err_label: 0 },
        Instr::Load { reg: 1, val: Value::str("поймано") },
        call("Сообщить", 1, 1),
        Instr::Label { id: 0 },
        Instr::PopTry { reg: 5 },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "тело\n");
}

#[test]
fn test_uncaught_error_terminates_run() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::Load { reg: 1, val: Value::Int(0) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Quo },
    ])
    .unwrap();

    let (vm, _) = capture_vm();
    assert!(matches!(
        vm.run(&Arc::new(main)),
        Err(VmError::DivisionByZero)
    ));
}

#[test]
fn test_uncaught_error_carries_source_position() {
    use vestnik_bytecode::Pos;
    let code = vec![
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::Load { reg: 1, val: Value::Int(0) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Quo },
    ];
    let positions = vec![
        Pos { line: 1, col: 1 },
        Pos { line: 1, col: 5 },
        Pos { line: 2, col: 3 },
    ];
    let main = Program::link_with_positions(code, positions).unwrap();

    let (vm, _) = capture_vm();
    let err = vm.run(&Arc::new(main)).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("строка 2"), "{}", text);
    assert!(text.contains("Деление на ноль"), "{}", text);
}

#[test]
fn test_nested_try_routes_to_innermost() {
    let main = Program::link(vec![
        Instr::Try { reg: 8 },
        Instr::Try { reg: 9 },
        Instr::Load { reg: 0, val: Value::Int(1) },
        Instr::Load { reg: 1, val: Value::Int(0) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Rem },
        Instr::Catch { reg: 9, no_err_label: 0 },
        Instr::Load { reg: 1, val: Value::str("внутренний") },
        call("Сообщить", 1, 1),
        Instr::Label { id: 0 },
        Instr::PopTry { reg: 9 },
        Instr::Catch { reg: 8, no_err_label: 1 },
        Instr::Load { reg: 1, val: Value::str("внешний") },
        call("Сообщить", 1, 1),
        Instr::Label { id: 1 },
        Instr::PopTry { reg: 8 },
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "внутренний\n");
}

/// `t = "2024-03-09T15:04:05".ВЧислоВремяДату()  Сообщить(t.Формат("дд ММММ гггг"))`
#[test]
fn test_time_parse_and_format() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::str("2024-03-09T15:04:05") },
        Instr::Load { reg: 1, val: Value::str("Дата") },
        Instr::SetName { reg: 1 },
        Instr::CastType { reg: 0, type_reg: 1 },
        // bound method call: callable in r0, argument in r1
        Instr::GetMember { reg: 0, name: id("Формат") },
        Instr::Load { reg: 1, val: Value::str("дд ММММ гггг") },
        Instr::Call { name: names::ANON, num_args: 1, reg_args: 0, var_arg: false, go: false },
        Instr::Mv { dst: 1, src: 0 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "09 марта 2024\n");
}

/// `Для Каждого` over a slice loaded from JSON: sum is 6.
#[test]
fn test_foreach_slice_sum() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::str("[1,2,3]") },
        Instr::Load { reg: 1, val: Value::str("Массив") },
        Instr::SetName { reg: 1 },
        Instr::CastType { reg: 0, type_reg: 1 },
        Instr::Load { reg: 2, val: Value::Int(0) },
        Instr::Set { name: id("сумма"), reg: 2 },
        Instr::Foreach { reg: 0, iter_reg: 3, break_label: 1 },
        Instr::Label { id: 0 },
        Instr::Next { reg: 0, val_reg: 4, iter_reg: 3, end_label: 1 },
        Instr::Get { reg: 5, name: id("сумма"), dotted: false },
        Instr::Oper { reg_l: 5, reg_r: 4, op: Op::Add },
        Instr::Set { name: id("сумма"), reg: 5 },
        Instr::Jmp { label: 0 },
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 0 },
        Instr::Get { reg: 1, name: id("сумма"), dotted: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "6\n");
}

/// FOREACH over a closed channel yields exactly the sent values.
#[test]
fn test_foreach_channel_until_closed() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(2) },
        Instr::MakeChan { reg: 0 },
        Instr::Set { name: id("к"), reg: 0 },
        Instr::Load { reg: 1, val: Value::str("a") },
        Instr::ChanSend { reg: 0, val_reg: 1 },
        Instr::Load { reg: 1, val: Value::str("b") },
        Instr::ChanSend { reg: 0, val_reg: 1 },
        Instr::Get { reg: 1, name: id("к"), dotted: false },
        call("Закрыть", 1, 1),
        Instr::Load { reg: 2, val: Value::str("") },
        Instr::Set { name: id("итог"), reg: 2 },
        Instr::Get { reg: 0, name: id("к"), dotted: false },
        Instr::Foreach { reg: 0, iter_reg: 3, break_label: 1 },
        Instr::Label { id: 0 },
        Instr::Next { reg: 0, val_reg: 4, iter_reg: 3, end_label: 1 },
        Instr::Get { reg: 5, name: id("итог"), dotted: false },
        Instr::Oper { reg_l: 5, reg_r: 4, op: Op::Add },
        Instr::Set { name: id("итог"), reg: 5 },
        Instr::Jmp { label: 0 },
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 0 },
        Instr::Get { reg: 1, name: id("итог"), dotted: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "ab\n");
}

#[test]
fn test_fornum_counts_inclusive() {
    // Для н=1 По 5: sum = 15
    let main = Program::link(vec![
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::Load { reg: 2, val: Value::Int(5) },
        Instr::Load { reg: 3, val: Value::Int(0) },
        Instr::ForNum { reg: 0, from_reg: 1, to_reg: 2, break_label: 1 },
        Instr::Label { id: 0 },
        Instr::NextNum { reg: 0, end_label: 1 },
        Instr::Oper { reg_l: 3, reg_r: 0, op: Op::Add },
        Instr::Jmp { label: 0 },
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 0 },
        Instr::Mv { dst: 1, src: 3 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "15\n");
}

#[test]
fn test_while_with_break_and_continue() {
    // пока истина: н += 1; если н == 3 продолжить; если н >= 5 прервать; итог += н
    let main = Program::link(vec![
        Instr::Load { reg: 1, val: Value::Int(0) }, // н
        Instr::Load { reg: 2, val: Value::Int(0) }, // итог
        Instr::While { reg: 0, break_label: 1 },
        // continue target: the condition head right after WHILE
        Instr::Load { reg: 3, val: Value::Int(1) },
        Instr::Oper { reg_l: 1, reg_r: 3, op: Op::Add },
        Instr::Mv { dst: 4, src: 1 },
        Instr::Load { reg: 5, val: Value::Int(3) },
        Instr::Oper { reg_l: 4, reg_r: 5, op: Op::Eql },
        Instr::JFalse { reg: 4, label: 2 },
        Instr::Continue,
        Instr::Label { id: 2 },
        Instr::Mv { dst: 4, src: 1 },
        Instr::Load { reg: 5, val: Value::Int(5) },
        Instr::Oper { reg_l: 4, reg_r: 5, op: Op::Geq },
        Instr::JFalse { reg: 4, label: 3 },
        Instr::Break,
        Instr::Label { id: 3 },
        Instr::Oper { reg_l: 2, reg_r: 1, op: Op::Add },
        Instr::Continue,
        Instr::Label { id: 1 },
        Instr::PopFor { reg: 0 },
        Instr::Mv { dst: 1, src: 2 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    // iterations add 1, 2, 4 (3 skipped, 5 breaks): итог = 7
    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "7\n");
}

#[test]
fn test_arity_mismatch_on_plain_function() {
    let body = Program::link(vec![Instr::Ret]).unwrap();
    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("одиночка"),
            args: vec![id("x")],
            var_arg: false,
            code: Arc::new(body),
        },
        call("одиночка", 3, 1),
    ])
    .unwrap();

    let (vm, _) = capture_vm();
    assert!(matches!(
        vm.run(&Arc::new(main)),
        Err(VmError::ArityMismatch { got: 3, want: 1 })
    ));
}

#[test]
fn test_vararg_tail_packs_remaining_arguments() {
    // Функция хвост(первый, остальные...) возврат Длина(остальные)
    let body = Program::link(vec![
        Instr::Get { reg: 1, name: id("остальные"), dotted: false },
        call("Длина", 1, 1),
        Instr::Mv { dst: 0, src: 1 },
        Instr::Ret,
    ])
    .unwrap();
    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("хвост"),
            args: vec![id("первый"), id("остальные")],
            var_arg: true,
            code: Arc::new(body),
        },
        Instr::Load { reg: 1, val: Value::Int(10) },
        Instr::Load { reg: 2, val: Value::Int(20) },
        Instr::Load { reg: 3, val: Value::Int(30) },
        Instr::Load { reg: 4, val: Value::Int(40) },
        call("хвост", 4, 1),
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "3\n");
}

#[test]
fn test_more_than_seven_arguments_travel_packed() {
    // the caller packs 9 arguments into one slice at reg_args
    let body = Program::link(vec![
        Instr::Get { reg: 1, name: id("девятый"), dotted: false },
        Instr::Mv { dst: 0, src: 1 },
        Instr::Ret,
    ])
    .unwrap();
    let params: Vec<NameId> = [
        "первый", "второй", "третий", "четвёртый", "пятый", "шестой", "седьмой", "восьмой",
        "девятый",
    ]
    .iter()
    .map(|s| id(s))
    .collect();
    let packed: Vec<Value> = (1..=9).map(Value::Int).collect();
    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("широкая"),
            args: params,
            var_arg: false,
            code: Arc::new(body),
        },
        Instr::Load { reg: 1, val: Value::slice(packed) },
        Instr::Call { name: id("широкая"), num_args: 9, reg_args: 1, var_arg: false, go: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "9\n");
}

#[test]
fn test_callsite_vararg_spreads_last_slice() {
    let body = Program::link(vec![
        Instr::Get { reg: 0, name: id("а"), dotted: false },
        Instr::Get { reg: 1, name: id("б"), dotted: false },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Add },
        Instr::Ret,
    ])
    .unwrap();
    let main = Program::link(vec![
        Instr::Func {
            reg: 0,
            name: id("пара"),
            args: vec![id("а"), id("б")],
            var_arg: false,
            code: Arc::new(body),
        },
        Instr::Load {
            reg: 1,
            val: Value::slice(vec![Value::Int(4), Value::Int(38)]),
        },
        Instr::Call { name: id("пара"), num_args: 1, reg_args: 1, var_arg: true, go: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "42\n");
}

#[test]
fn test_indexing_and_subslice() {
    let main = Program::link(vec![
        Instr::Load {
            reg: 0,
            val: Value::slice(vec![
                Value::Int(10),
                Value::Int(20),
                Value::Int(30),
                Value::Int(40),
            ]),
        },
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::Load { reg: 2, val: Value::Int(3) },
        Instr::GetSubslice { reg: 0, begin_reg: 1, end_reg: 2 },
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::GetIdx { reg: 0, index_reg: 1 },
        Instr::Mv { dst: 1, src: 0 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "30\n");
}

#[test]
fn test_index_out_of_range() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::slice(vec![Value::Int(1)]) },
        Instr::Load { reg: 1, val: Value::Int(5) },
        Instr::GetIdx { reg: 0, index_reg: 1 },
    ])
    .unwrap();
    let (vm, _) = capture_vm();
    assert!(matches!(
        vm.run(&Arc::new(main)),
        Err(VmError::IndexOutOfRange)
    ));
}

#[test]
fn test_map_literal_member_and_missing_key() {
    let main = Program::link(vec![
        Instr::MakeMap { reg: 0, len: 2 },
        Instr::Load { reg: 1, val: Value::Int(99) },
        Instr::SetKey { reg: 0, key: "Код".into(), val_reg: 1 },
        Instr::Set { name: id("м"), reg: 0 },
        // member access resolves map keys case-insensitively
        Instr::Get { reg: 2, name: id("м.код"), dotted: true },
        Instr::Mv { dst: 1, src: 2 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "99\n");

    let missing = Program::link(vec![
        Instr::MakeMap { reg: 0, len: 0 },
        Instr::Load { reg: 1, val: Value::str("нет") },
        Instr::GetIdx { reg: 0, index_reg: 1 },
    ])
    .unwrap();
    let (vm, _) = capture_vm();
    assert!(matches!(
        vm.run(&Arc::new(missing)),
        Err(VmError::KeyNotFound(_))
    ));
}

#[test]
fn test_name_not_found() {
    let main = Program::link(vec![Instr::Get {
        reg: 0,
        name: id("несуществующая"),
        dotted: false,
    }])
    .unwrap();
    let (vm, _) = capture_vm();
    assert!(matches!(
        vm.run(&Arc::new(main)),
        Err(VmError::NameNotFound(_))
    ));
}

#[test]
fn test_make_and_unary() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::str("ЦелоеЧисло") },
        Instr::SetName { reg: 0 },
        Instr::Make { reg: 0 },
        Instr::Load { reg: 1, val: Value::Int(7) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Add },
        Instr::Unary { reg: 0, op: '-' },
        Instr::Mv { dst: 1, src: 0 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "-7\n");
}

#[test]
fn test_addr_unref_roundtrip() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(5) },
        Instr::Addr { reg: 0 },
        Instr::Unref { reg: 0 },
        Instr::Mv { dst: 1, src: 0 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "5\n");
}

#[test]
fn test_shared_slice_mutation_across_aliases() {
    // два имени на один массив: запись через одно видна через другое
    let main = Program::link(vec![
        Instr::MakeSlice { reg: 0, len: 1, cap: 1 },
        Instr::Set { name: id("первый"), reg: 0 },
        Instr::Set { name: id("второй"), reg: 0 },
        Instr::Get { reg: 0, name: id("первый"), dotted: false },
        Instr::Load { reg: 1, val: Value::Int(77) },
        Instr::SetIdx { reg: 0, index: 0, val_reg: 1 },
        Instr::Get { reg: 2, name: id("второй"), dotted: false },
        Instr::Load { reg: 3, val: Value::Int(0) },
        Instr::GetIdx { reg: 2, index_reg: 3 },
        Instr::Mv { dst: 1, src: 2 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "77\n");
}

#[test]
fn test_decimal_promotion_in_program() {
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::str("2.5") },
        Instr::CastNum { reg: 0 },
        Instr::Load { reg: 1, val: Value::Int(4) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Mul },
        Instr::Mv { dst: 1, src: 0 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "10\n");
}

#[test]
fn test_anonymous_function_indirect_call() {
    let body = Program::link(vec![
        Instr::Get { reg: 0, name: id("х"), dotted: false },
        Instr::Get { reg: 1, name: id("х"), dotted: false },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Mul },
        Instr::Ret,
    ])
    .unwrap();
    let main = Program::link(vec![
        Instr::Func {
            reg: 2,
            name: names::ANON,
            args: vec![id("х")],
            var_arg: false,
            code: Arc::new(body),
        },
        Instr::Load { reg: 3, val: Value::Int(6) },
        Instr::Call { name: names::ANON, num_args: 1, reg_args: 2, var_arg: false, go: false },
        Instr::Mv { dst: 1, src: 2 },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "36\n");
}

#[test]
fn test_closure_captures_defining_scope() {
    // счётчик в объемлющей области, функция его увеличивает
    let body = Program::link(vec![
        Instr::Get { reg: 0, name: id("счётчик"), dotted: false },
        Instr::Load { reg: 1, val: Value::Int(1) },
        Instr::Oper { reg_l: 0, reg_r: 1, op: Op::Add },
        Instr::Set { name: id("счётчик"), reg: 0 },
        Instr::Ret,
    ])
    .unwrap();
    let main = Program::link(vec![
        Instr::Load { reg: 0, val: Value::Int(0) },
        Instr::Set { name: id("счётчик"), reg: 0 },
        Instr::Func {
            reg: 0,
            name: id("тик"),
            args: vec![],
            var_arg: false,
            code: Arc::new(body),
        },
        call("тик", 0, 1),
        call("тик", 0, 1),
        call("тик", 0, 1),
        Instr::Get { reg: 1, name: id("счётчик"), dotted: false },
        call("Сообщить", 1, 1),
    ])
    .unwrap();

    let (vm, out) = capture_vm();
    vm.run(&Arc::new(main)).unwrap();
    assert_eq!(out.text(), "3\n");
}
