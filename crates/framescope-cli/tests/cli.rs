use std::path::{Path, PathBuf};

use assert_cmd::Command;
use etherparse::PacketBuilder;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("framescope"))
}

fn frame(type_code: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = type_code.to_le_bytes().to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn tcp_packet(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .tcp(src_port, dst_port, seq, 65535)
        .ack(1);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload).expect("build packet");
    packet
}

/// Legacy little-endian pcap holding one client-to-server direction that
/// carries frames 7 ("hello") and 300 ("world!").
fn sample_capture(dir: &Path, name: &str) -> PathBuf {
    capture_from_port(dir, name, 50000)
}

fn capture_from_port(dir: &Path, name: &str, port: u16) -> PathBuf {
    let stream = [frame(7, b"hello"), frame(300, b"world!")].concat();
    let (head, tail) = stream.split_at(6);
    let packets = [
        (1_700_000_000u32, tcp_packet(port, 3724, 1, head)),
        (1_700_000_001u32, tcp_packet(port, 3724, 7, tail)),
    ];

    let mut output = Vec::new();
    output.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());
    for (secs, data) in &packets {
        output.extend_from_slice(&secs.to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(data);
    }

    let path = dir.join(name);
    std::fs::write(&path, output).expect("write capture");
    path
}

fn stdout_lines(output: &std::process::Output) -> Vec<Value> {
    String::from_utf8(output.stdout.clone())
        .expect("utf8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("read").and(contains("frames")));
    cmd().arg("read").arg("--help").assert().success();
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    cmd()
        .arg("read")
        .arg(temp.path().join("missing.pcapng"))
        .assert()
        .code(2)
        .stderr(contains("error: input file not found").and(contains("hint:")));
}

#[test]
fn unsupported_extension_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let input = temp.path().join("capture.txt");
    std::fs::write(&input, b"not a capture").expect("write input");
    cmd()
        .arg("read")
        .arg(input)
        .assert()
        .failure()
        .stderr(contains("unsupported input format"));
}

#[test]
fn unmatched_pattern_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    cmd()
        .arg("read")
        .arg(temp.path().join("*.pcap"))
        .assert()
        .failure()
        .stderr(contains("no files match pattern"));
}

#[test]
fn bad_input_is_skipped_when_another_opens() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");

    let assert = cmd()
        .arg("read")
        .arg(temp.path().join("missing.pcap"))
        .arg(input)
        .assert()
        .success()
        .stderr(contains("skipping input").and(contains("input file not found")));
    assert_eq!(stdout_lines(assert.get_output()).len(), 2);
}

#[test]
fn every_input_bad_is_an_error() {
    let temp = TempDir::new().expect("tempdir");
    cmd()
        .arg("read")
        .arg(temp.path().join("one.pcap"))
        .arg(temp.path().join("two.pcap"))
        .assert()
        .code(2)
        .stderr(
            contains("no capture source available (2 failed to open)").and(contains("hint:")),
        );
}

#[test]
fn read_prints_json_lines_and_summary() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");

    let assert = cmd().arg("read").arg(input).assert().success();
    let output = assert.get_output();
    let lines = stdout_lines(output);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type_code"], 7);
    assert_eq!(lines[0]["payload_hex"], "68656c6c6f");
    assert_eq!(lines[0]["src"], "10.0.0.1:50000");
    assert_eq!(lines[1]["type_code"], 300);
    assert_eq!(lines[1]["captured_at"], "2023-11-14T22:13:21Z");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"frames_written\": 2"));
    assert!(stderr.contains("\"packets\": 2"));
}

#[test]
fn quiet_suppresses_summary() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    cmd()
        .arg("read")
        .arg(input)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("frames_written").not());
}

#[test]
fn raw_format_writes_wire_frames() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    cmd()
        .arg("read")
        .arg(input)
        .args(["--format", "raw", "--quiet"])
        .assert()
        .success()
        .stdout([frame(7, b"hello"), frame(300, b"world!")].concat());
}

#[test]
fn glob_reads_every_matching_capture() {
    let temp = TempDir::new().expect("tempdir");
    capture_from_port(temp.path(), "a.pcap", 50000);
    capture_from_port(temp.path(), "b.pcap", 50001);

    let assert = cmd()
        .arg("read")
        .arg(temp.path().join("*.pcap"))
        .arg("--quiet")
        .assert()
        .success();
    assert_eq!(stdout_lines(assert.get_output()).len(), 4);
}

#[test]
fn db_round_trip_through_frames_query() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    let db = temp.path().join("store").join("frames.sqlite3");

    cmd()
        .arg("read")
        .arg(&input)
        .arg("--db")
        .arg(&db)
        .arg("--quiet")
        .assert()
        .success()
        .stdout("");

    let assert = cmd()
        .arg("frames")
        .arg("--db")
        .arg(&db)
        .args(["--type", "300"])
        .assert()
        .success();
    let lines = stdout_lines(assert.get_output());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["payload_hex"], "776f726c6421");
    assert_eq!(lines[0]["dst"], "10.0.0.2:3724");
}

#[test]
fn frames_without_store_shows_hint() {
    let temp = TempDir::new().expect("tempdir");
    cmd()
        .arg("frames")
        .arg("--db")
        .arg(temp.path().join("none.sqlite3"))
        .assert()
        .code(2)
        .stderr(contains("frame store not found").and(contains("hint:")));
}

#[test]
fn db_and_format_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    cmd()
        .arg("read")
        .arg(input)
        .arg("--db")
        .arg(temp.path().join("frames.sqlite3"))
        .args(["--format", "raw"])
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn invalid_config_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    let config = temp.path().join("framescope.toml");
    std::fs::write(&config, "[framing]\nmin_type = 10\nmax_type = 5\n").expect("write config");

    cmd()
        .arg("read")
        .arg(input)
        .arg("--config")
        .arg(config)
        .assert()
        .code(2)
        .stderr(contains("framing.min_type").and(contains("hint:")));
}

#[test]
fn config_rules_apply_to_extraction() {
    let temp = TempDir::new().expect("tempdir");
    let input = sample_capture(temp.path(), "session.pcap");
    let config = temp.path().join("framescope.toml");
    std::fs::write(&config, "[framing]\nexcluded_types = [300]\n").expect("write config");

    let assert = cmd()
        .arg("read")
        .arg(input)
        .arg("--config")
        .arg(config)
        .args(["--tick-ms", "5", "--quiet"])
        .assert()
        .success();
    let lines = stdout_lines(assert.get_output());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["type_code"], 7);
}
