use agent_relay::manager::tool_display::{approval_fields, display_for, format_tool_use};
use serde_json::json;

#[test]
fn bash_renders_command_in_code_block() {
    let body = format_tool_use("Bash", &json!({"command": "ls -la"}));
    assert_eq!(body, "```\nls -la\n```");
}

#[test]
fn bash_prepends_description_when_present() {
    let body = format_tool_use(
        "Bash",
        &json!({"command": "cargo build", "description": "Build the project"}),
    );
    assert!(body.starts_with("Build the project\n"));
    assert!(body.contains("```\ncargo build\n```"));
}

#[test]
fn file_tools_render_the_path() {
    for tool in ["Read", "Write", "Edit"] {
        let body = format_tool_use(tool, &json!({"file_path": "src/main.rs"}));
        assert_eq!(body, "`src/main.rs`");
    }
}

#[test]
fn todo_list_renders_status_and_priority_markers() {
    let body = format_tool_use(
        "TodoWrite",
        &json!({"todos": [
            {"content": "ship it", "status": "completed", "priority": "high"},
            {"content": "test it", "status": "in_progress", "priority": "medium"},
            {"content": "doc it", "status": "pending"},
        ]}),
    );

    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("ship it"));
    assert!(lines[0].starts_with('\u{2705}'));
    assert!(lines[0].contains('\u{203c}'));
    assert!(lines[1].starts_with('\u{1f504}'));
    assert!(lines[2].starts_with('\u{2b1c}'));
}

#[test]
fn unknown_tool_falls_back_to_compact_json() {
    let body = format_tool_use("Mystery", &json!({"a": 1}));
    assert!(body.contains("\"a\":1"));
}

#[test]
fn long_fallback_is_truncated() {
    let long = "x".repeat(5000);
    let body = format_tool_use("Mystery", &json!({ "data": long }));
    assert!(body.chars().count() < 400);
    assert!(body.ends_with('\u{2026}'));
}

#[test]
fn display_identities_vary_by_tool() {
    assert_eq!(display_for("Bash").username, "Bash");
    assert_eq!(display_for("Bash").icon_emoji, ":computer:");
    assert_eq!(display_for("TodoWrite").username, "Todo");
    assert_eq!(display_for("Thinking").icon_emoji, ":thought_balloon:");
    assert_eq!(display_for("SomethingElse").icon_emoji, ":wrench:");
}

#[test]
fn approval_fields_extract_salient_keys() {
    let fields = approval_fields(&json!({
        "url": "https://x",
        "command": "curl https://x",
        "description": "fetch the page",
        "file_path": "notes.md",
    }));

    let labels: Vec<&str> = fields.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, vec!["URL", "Command", "Description", "File"]);
    assert!(fields[0].1.contains("https://x"));
}

#[test]
fn approval_fields_fall_back_to_raw_input() {
    let fields = approval_fields(&json!({"query": "rust codecs"}));
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].0, "Input");
    assert!(fields[0].1.contains("rust codecs"));
}

#[test]
fn approval_fields_empty_input_yields_no_fields() {
    let fields = approval_fields(&json!({}));
    assert!(fields.is_empty());
}
