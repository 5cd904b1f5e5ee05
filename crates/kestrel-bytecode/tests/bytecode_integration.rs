//! Integration tests for unit construction, encoding and verification

use kestrel_bytecode::{
    verify_unit, BinaryOperator, BytecodeUnit, CompareOperator, Constant, Kind, Opcode,
    UnitBuilder, VerifyError,
};

fn build_max() -> BytecodeUnit {
    // def max(a, b): if a < b: return b; return a
    let mut b = UnitBuilder::new("max").args(2).param_kind(0, Kind::Integer);
    let else_branch = b.new_label();
    b.load_fast(0);
    b.load_fast(1);
    b.compare(CompareOperator::Lt);
    b.jump(Opcode::PopJumpIfFalse, else_branch);
    b.load_fast(1);
    b.return_value();
    b.bind(else_branch).unwrap();
    b.load_fast(0);
    b.return_value();
    b.build().unwrap()
}

#[test]
fn test_built_unit_verifies() {
    let unit = build_max();
    assert_eq!(unit.arg_count(), 2);
    assert_eq!(unit.param_kind(0), Some(Kind::Integer));
    assert_eq!(unit.param_kind(1), None);
    assert!(verify_unit(&unit).is_ok());
}

#[test]
fn test_binary_roundtrip_then_verify() {
    let unit = build_max();
    let bytes = unit.encode();
    let decoded = BytecodeUnit::decode(&bytes).expect("Failed to decode");

    assert_eq!(decoded.name(), "max");
    assert_eq!(decoded.len(), unit.len());
    assert_eq!(decoded.instruction(3).unwrap().opcode, Opcode::PopJumpIfFalse);
    assert_eq!(decoded.instruction(3).unwrap().arg, 6);
    assert!(verify_unit(&decoded).is_ok());
}

#[test]
fn test_json_roundtrip_keeps_tables() {
    let mut b = UnitBuilder::new("dispatch").args(1);
    let zero = b.new_label();
    let one = b.new_label();
    b.load_fast(0);
    b.switch(vec![zero, one]);
    b.load_none();
    b.return_value();
    b.bind(zero).unwrap();
    b.load_int(10);
    b.return_value();
    b.bind(one).unwrap();
    b.load_const(Constant::Str("one".into()));
    b.return_value();
    let unit = b.build().unwrap();

    let json = unit.to_json().unwrap();
    let reloaded = BytecodeUnit::from_json(&json).unwrap();
    assert_eq!(reloaded.jump_table(0), Some(&[4usize, 6][..]));
    assert_eq!(reloaded.to_def(), unit.to_def());
}

#[test]
fn test_truncated_input_is_rejected() {
    let bytes = build_max().encode();
    assert!(BytecodeUnit::decode(&bytes[..bytes.len() / 2]).is_err());
}

#[test]
fn test_verify_reports_bad_table_target() {
    let text = r#"{
        "name": "bad",
        "code": [{"op": "LOAD_CONST"}, {"op": "SWITCH"}],
        "constants": [0],
        "jump_tables": [[9]]
    }"#;
    let unit = BytecodeUnit::from_json(text).unwrap();
    assert_eq!(
        verify_unit(&unit),
        Err(VerifyError::InvalidJumpTableTarget { table: 0, target: 9 })
    );
}

#[test]
fn test_disassembly_lists_operands() {
    let mut b = UnitBuilder::new("show");
    b.load_global("print");
    b.load_int(7);
    b.binary(BinaryOperator::Add);
    b.return_value();
    let listing = b.build().unwrap().disassemble();
    assert!(listing.contains("LOAD_GLOBAL"));
    assert!(listing.contains("(print)"));
    assert!(listing.contains("(7)"));
}
