use std::fs;
use std::path::Path;
use tempfile::tempdir;

const USER: &str = r#"{"role":"user","message":{"content":[{"type":"text","text":"<user_query>rename the config loader</user_query>"}]}}"#;
const ASSISTANT: &str = r#"{"role":"assistant","message":{"content":[{"type":"text","text":"Renamed."},{"type":"tool_use","name":"Edit","input":{"path":"/work/webapp/src/config.rs"}}]}}"#;

fn daily_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .map(|p| fs::read_to_string(p).expect("read daily file"))
        .collect()
}

fn run_hook(home: &Path, stdin: String) {
    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(home)
        .env("CURSORMEMORY_HOME", home)
        .arg("_hook-save-memory")
        .write_stdin(stdin)
        .assert()
        .success()
        .stdout("");
}

#[test]
fn hook_appends_turn_to_project_daily_notes_once() {
    let tmp = tempdir().expect("tempdir");
    let transcript = tmp.path().join("session.jsonl");
    fs::write(&transcript, format!("{USER}\n{ASSISTANT}\n")).expect("write transcript");
    let input = serde_json::json!({
        "conversation_id": "c1",
        "transcript_path": transcript.display().to_string(),
        "workspace_roots": ["/work/webapp"],
    })
    .to_string();

    run_hook(tmp.path(), input.clone());
    run_hook(tmp.path(), input);

    let notes = daily_files(&tmp.path().join("projects").join("webapp").join("memory"));
    assert_eq!(notes.len(), 1);
    let note = &notes[0];
    assert!(note.starts_with("# "));
    assert!(note.contains("Daily Notes"));
    assert_eq!(note.matches("**Query:** rename the config loader").count(), 1);
    assert!(note.contains("**Response:** Renamed."));
    assert!(note.contains("**Files touched:** `config.rs`"));
    assert!(note.contains("**Tools:** Edit"));

    let offsets = fs::read_to_string(tmp.path().join(".hook-state.json")).expect("offsets");
    assert!(offsets.contains(":2}"));
}

#[test]
fn hook_uses_registered_project_name() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("config.json"),
        r#"{"projects":[{"name":"storefront","path":"/work/webapp"}]}"#,
    )
    .expect("write registry");
    let transcript = tmp.path().join("session.jsonl");
    fs::write(&transcript, format!("{USER}\n")).expect("write transcript");
    let input = serde_json::json!({
        "transcript_path": transcript.display().to_string(),
        "workspace_roots": ["/work/webapp"],
    })
    .to_string();

    run_hook(tmp.path(), input);

    let notes = daily_files(&tmp.path().join("projects").join("storefront").join("memory"));
    assert_eq!(notes.len(), 1);
    assert!(!tmp.path().join("projects").join("webapp").exists());
}

#[test]
fn hook_is_silent_on_garbage_input() {
    let tmp = tempdir().expect("tempdir");
    run_hook(tmp.path(), "this is not json".to_string());
    run_hook(tmp.path(), String::new());
    run_hook(
        tmp.path(),
        r#"{"transcript_path":"/definitely/missing.jsonl","workspace_roots":["/w"]}"#.to_string(),
    );
    assert!(!tmp.path().join("projects").exists());
    assert!(!tmp.path().join(".hook-state.json").exists());
}
