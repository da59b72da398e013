//! Tool display dispatch table.
//!
//! Maps agent tool names to a chat display identity (pseudo-username and
//! icon) and an argument-formatting strategy: the shell tool shows its
//! command in a code block, file tools show the path, the todo tool renders
//! a styled list, and everything else falls back to compact JSON.

use serde_json::Value;

use crate::slack::gateway::Attribution;

/// Longest compact-JSON argument rendering before truncation.
const MAX_ARG_PREVIEW: usize = 300;

/// Display identity for a named tool.
#[must_use]
pub fn display_for(tool_name: &str) -> Attribution {
    let (username, icon_emoji) = match tool_name {
        "Bash" => ("Bash", ":computer:"),
        "Read" | "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => (tool_name, ":page_facing_up:"),
        "Glob" | "Grep" => (tool_name, ":mag:"),
        "TodoWrite" => ("Todo", ":memo:"),
        "WebFetch" | "WebSearch" => (tool_name, ":globe_with_meridians:"),
        "Task" => ("Task", ":robot_face:"),
        "Thinking" => ("Thinking", ":thought_balloon:"),
        _ => (tool_name, ":wrench:"),
    };
    Attribution {
        username: username.to_owned(),
        icon_emoji: icon_emoji.to_owned(),
    }
}

/// Format a tool invocation's input for posting to the thread.
#[must_use]
pub fn format_tool_use(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "Bash" => format_bash(input),
        "Read" | "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => input
            .get("file_path")
            .and_then(Value::as_str)
            .map_or_else(|| fallback(input), |path| format!("`{path}`")),
        "Glob" | "Grep" => format_search(input),
        "TodoWrite" => format_todos(input),
        "WebFetch" => input
            .get("url")
            .and_then(Value::as_str)
            .map_or_else(|| fallback(input), |url| format!("<{url}>")),
        "WebSearch" => input
            .get("query")
            .and_then(Value::as_str)
            .map_or_else(|| fallback(input), |q| format!("_{q}_")),
        "Task" => input
            .get("description")
            .or_else(|| input.get("prompt"))
            .and_then(Value::as_str)
            .map_or_else(|| fallback(input), |d| truncate(d, MAX_ARG_PREVIEW)),
        _ => fallback(input),
    }
}

fn format_bash(input: &Value) -> String {
    let command = input.get("command").and_then(Value::as_str).unwrap_or("");
    match input.get("description").and_then(Value::as_str) {
        Some(desc) if !desc.is_empty() => format!("{desc}\n```\n{command}\n```"),
        _ => format!("```\n{command}\n```"),
    }
}

fn format_search(input: &Value) -> String {
    let pattern = input.get("pattern").and_then(Value::as_str).unwrap_or("");
    match input.get("path").and_then(Value::as_str) {
        Some(path) if !path.is_empty() => format!("`{pattern}` in `{path}`"),
        _ => format!("`{pattern}`"),
    }
}

/// Render the todo list with status and priority markers.
fn format_todos(input: &Value) -> String {
    let Some(todos) = input.get("todos").and_then(Value::as_array) else {
        return fallback(input);
    };

    let mut lines = Vec::with_capacity(todos.len());
    for todo in todos {
        let content = todo.get("content").and_then(Value::as_str).unwrap_or("");
        let status = todo.get("status").and_then(Value::as_str).unwrap_or("");
        let marker = match status {
            "completed" => "\u{2705}",
            "in_progress" => "\u{1f504}",
            _ => "\u{2b1c}",
        };
        let priority = match todo.get("priority").and_then(Value::as_str) {
            Some("high") => " \u{203c}\u{fe0f}",
            _ => "",
        };
        lines.push(format!("{marker} {content}{priority}"));
    }
    lines.join("\n")
}

fn fallback(input: &Value) -> String {
    truncate(&input.to_string(), MAX_ARG_PREVIEW)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}\u{2026}")
    }
}

/// Extract the salient fields of an approval request for display:
/// URL, command and description, file path — falling back to a compact
/// rendering of the whole input.
#[must_use]
pub fn approval_fields(input: &Value) -> Vec<(String, String)> {
    let mut fields = Vec::new();

    if let Some(url) = input.get("url").and_then(Value::as_str) {
        fields.push(("URL".to_owned(), format!("<{url}>")));
    }
    if let Some(command) = input.get("command").and_then(Value::as_str) {
        fields.push(("Command".to_owned(), format!("```\n{command}\n```")));
    }
    if let Some(desc) = input.get("description").and_then(Value::as_str) {
        fields.push(("Description".to_owned(), desc.to_owned()));
    }
    if let Some(path) = input.get("file_path").and_then(Value::as_str) {
        fields.push(("File".to_owned(), format!("`{path}`")));
    }

    if fields.is_empty() {
        match input {
            Value::Object(map) if map.is_empty() => {}
            _ => fields.push((
                "Input".to_owned(),
                format!("```\n{}\n```", truncate(&input.to_string(), MAX_ARG_PREVIEW)),
            )),
        }
    }

    fields
}
