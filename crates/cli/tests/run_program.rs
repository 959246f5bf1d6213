//! CLI end-to-end: assemble a source file, run it, and check the reports.

use std::io::Write;
use std::process::Command;

fn write_source(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write source");
    file
}

#[test]
fn runs_a_program_and_prints_statistics() {
    let source = write_source(
        ".code\n\
         addi r1, r0, 21\n\
         add r2, r1, r1\n\
         halt\n",
    );
    let output = Command::new(env!("CARGO_BIN_EXE_mipsim"))
        .args([
            "run",
            "-f",
            source.path().to_str().unwrap(),
            "--registers",
            "--forwarding",
        ])
        .output()
        .expect("binary should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sim_insts"));
    assert!(stdout.contains("stalls.raw"));
    // r2 = 42 in the register dump.
    assert!(stdout.contains("(42)"));
}

#[test]
fn parse_errors_exit_nonzero_and_list_every_error() {
    let source = write_source(
        ".code\n\
         frobnicate r1\n\
         addi r1, r0\n\
         halt\n",
    );
    let output = Command::new(env!("CARGO_BIN_EXE_mipsim"))
        .args(["run", "-f", source.path().to_str().unwrap()])
        .output()
        .expect("binary should run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown mnemonic 'frobnicate'"));
    assert!(stderr.contains("expected 3 operands, found 2"));
}

#[test]
fn missing_halt_reports_cycle_budget() {
    let source = write_source(
        ".code\n\
         loop: j loop\n",
    );
    let output = Command::new(env!("CARGO_BIN_EXE_mipsim"))
        .args([
            "run",
            "-f",
            source.path().to_str().unwrap(),
            "--max-cycles",
            "500",
        ])
        .output()
        .expect("binary should run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no halt within 500 cycles"));
}
