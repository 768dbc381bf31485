//! File-level round trips through the assembler and disassembler.

use buzz_asm::{assemble, assemble_file, disassemble, AsmError, BytecodeBlob, DebugInfo, Opcode};
use quickcheck_macros::quickcheck;
use rstest::rstest;

const PROGRAM: &str = "!2\n\
                       'hello\n\
                       'world\n\
                       @L0\n\
                       pushs 0\n\
                       pushs 1\n\
                       eq\n\
                       jumpz L1\n\
                       jump L0\n\
                       @L1\n\
                       pushf 2.5\t|4,1,main.bzz\n\
                       done\n";

#[test]
fn files_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let basm = dir.path().join("prog.basm");
    let bo = dir.path().join("prog.bo");
    let bdbg = dir.path().join("prog.bdbg");
    std::fs::write(&basm, PROGRAM).unwrap();

    let (blob, dbg) = assemble_file(&basm).unwrap();
    blob.to_file(&bo).unwrap();
    dbg.to_file(&bdbg).unwrap();

    let loaded = BytecodeBlob::from_file(&bo).unwrap();
    assert_eq!(loaded, blob);
    let loaded_dbg = DebugInfo::from_file(&bdbg).unwrap();
    assert_eq!(loaded_dbg, dbg);

    let listing = disassemble(&loaded, &loaded_dbg).unwrap();
    assert_eq!(listing, PROGRAM);
}

#[test]
fn reassembling_a_listing_is_byte_identical() {
    let (blob, dbg) = assemble(PROGRAM, "prog.basm").unwrap();
    let listing = disassemble(&blob, &dbg).unwrap();
    let (again, dbg_again) = assemble(&listing, "prog2.basm").unwrap();
    assert_eq!(again.bytes(), blob.bytes());
    assert_eq!(dbg_again, dbg);
}

#[quickcheck]
fn integer_immediates_round_trip(value: i32) -> bool {
    let src = format!("!0\npushi {value}\ndone\n");
    let (blob, dbg) = assemble(&src, "q.basm").unwrap();
    disassemble(&blob, &dbg).unwrap() == src
}

#[quickcheck]
fn finite_float_immediates_round_trip(value: f32) -> bool {
    if !value.is_finite() {
        return true;
    }
    let src = format!("!0\npushf {value:?}\ndone\n");
    let (blob, dbg) = assemble(&src, "q.basm").unwrap();
    disassemble(&blob, &dbg).unwrap() == src
}

#[quickcheck]
fn string_tables_round_trip(strings: Vec<String>) -> bool {
    let clean: Vec<String> = strings
        .iter()
        .map(|s| s.replace(['\0', '\n', '\r'], ""))
        .collect();
    let mut src = format!("!{}\n", clean.len());
    for s in &clean {
        src.push('\'');
        src.push_str(s);
        src.push('\n');
    }
    src.push_str("done\n");
    let (blob, _) = assemble(&src, "q.basm").unwrap();
    blob.strings() == clean
}

#[rstest]
#[case::missing_argument("!0\npushi\n", 2)]
#[case::unknown_opcode("!0\nfrobnicate\n", 2)]
#[case::unknown_label("!0\njump nowhere\ndone\n", 2)]
#[case::label_out_of_range("!0\njump end\ndone\n@end\n", 2)]
fn parse_errors_exit_with_code_2(#[case] src: &str, #[case] code: i32) {
    let err = assemble(src, "bad.basm").unwrap_err();
    assert_eq!(err.exit_code(), code);
}

#[test]
fn io_errors_exit_with_code_1() {
    let err = assemble_file("/nonexistent/prog.basm").unwrap_err();
    assert!(matches!(err.kind(), AsmError::Io(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn opcode_stream_offsets_are_stable() {
    let (blob, _) = assemble("!0\npushi 1\nnop\ndone\n", "t.basm").unwrap();
    let offsets: Vec<usize> = blob.instructions().map(|(off, _)| off).collect();
    let base = blob.code_start();
    assert_eq!(offsets, [base, base + Opcode::Pushi.len(), base + Opcode::Pushi.len() + 1]);
}
