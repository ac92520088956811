//! デモバイナリをCGIとして起動するテスト
//!
//! 環境変数と標準入力を与えて子プロセスを実行し、標準出力を検証します。

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn run_cgi_with_env(env_vars: &[(&str, &str)], stdin_data: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cgibridge-demo"))
        .env_clear()
        .envs(env_vars.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn CGI process");

    if !stdin_data.is_empty() {
        let mut stdin = child.stdin.take().expect("Failed to open stdin");
        stdin.write_all(stdin_data).expect("Failed to write to stdin");
    }

    child.wait_with_output().expect("Failed to wait for CGI process")
}

#[test]
fn test_get_echoes_query_and_starts_session() {
    let output = run_cgi_with_env(
        &[("REQUEST_METHOD", "GET"), ("QUERY_STRING", "name=test&value=123"), ("HTTP_HOST", "example.com")],
        b"",
    );
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(stdout.contains("Set-Cookie: sess_id="));
    assert!(stdout.contains("; Domain=.example.com; Path=/; HttpOnly\r\n"));
    assert!(stdout.contains("visits: 1\n"));
    assert!(stdout.contains("name = test\n"));
    assert!(stdout.contains("value = 123\n"));
}

#[test]
fn test_post_form_is_echoed() {
    let body = b"msg=hello%20world&n=1";
    let length = body.len().to_string();
    let output = run_cgi_with_env(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("CONTENT_LENGTH", length.as_str()),
        ],
        body,
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("msg = hello world\n"));
    assert!(stdout.contains("n = 1\n"));
}

#[test]
fn test_post_binary_is_returned_verbatim() {
    let body: &[u8] = &[0x00, 0xff, 0x10, 0x80];
    let output = run_cgi_with_env(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/octet-stream"),
            ("CONTENT_LENGTH", "4"),
        ],
        body,
    );

    assert!(output.stdout.ends_with(&[b'\r', b'\n', b'\r', b'\n', 0x00, 0xff, 0x10, 0x80]));
    let head = String::from_utf8_lossy(&output.stdout[..output.stdout.len() - 4]).into_owned();
    assert!(head.contains("Content-Type: application/octet-stream\r\n"));
}

#[test]
fn test_oversized_body_is_rejected() {
    let output = run_cgi_with_env(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_LENGTH", "64"),
            ("CGI_MAX_BODY_SIZE", "16"),
        ],
        b"",
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Status: 413 Payload Too Large\r\n"));
}

#[test]
fn test_short_body_is_length_required() {
    let output = run_cgi_with_env(
        &[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "10")],
        b"a=b",
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Status: 411 Length Required\r\n"));
}
