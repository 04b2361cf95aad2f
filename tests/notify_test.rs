use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn notify_send_without_target_is_an_issue() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["notify", "send", "hello"])
        .assert()
        .code(2)
        .stdout(contains("no telegram botToken/chatId configured"));
}

#[test]
fn notify_send_rejects_empty_text() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["notify", "send", "  "])
        .assert()
        .code(2)
        .stdout(contains("message text is empty"));
}
