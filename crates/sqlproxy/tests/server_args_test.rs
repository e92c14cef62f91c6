mod setup;

use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use setup::DEFAULT_TIMEOUT;

use crate::setup::make_cli;

#[test]
fn test_server_bind_addr() {
    let mut cmd = make_cli();

    let assert = cmd
        .timeout(DEFAULT_TIMEOUT)
        .arg("server")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .assert();

    assert.interrupted(/* We expect a timeout here */).stdout(
        contains("Listening on 127.0.0.1:").and(contains("Connect via: proxy://127.0.0.1:")),
    );
}

#[test]
fn test_server_bind_from_env() {
    let mut cmd = make_cli();

    let assert = cmd
        .timeout(DEFAULT_TIMEOUT)
        .env("SQLPROXY_BIND", "127.0.0.1:0")
        .arg("server")
        .assert();

    assert
        .interrupted()
        .stdout(contains("Listening on 127.0.0.1:"));
}

#[test]
/// Cipher keys must be exactly 16 bytes.
fn test_server_rejects_short_cipher_key() {
    let mut cmd = make_cli();

    let assert = cmd
        .timeout(DEFAULT_TIMEOUT)
        .arg("server")
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--cipher-key")
        .arg("short")
        .assert();

    assert
        .failure()
        .stderr(contains("cipher key must be 16 bytes, got 5"));
}

#[test]
fn test_server_rejects_bad_timeout() {
    let mut cmd = make_cli();

    let assert = cmd
        .timeout(DEFAULT_TIMEOUT)
        .arg("server")
        .arg("--idle-timeout-secs")
        .arg("soon")
        .assert();

    assert
        .failure()
        .stderr(contains("invalid value 'soon' for '--idle-timeout-secs"));
}
