use agent_relay::agent::protocol::{self, AgentMessage, ContentBlock};

#[test]
fn init_message_parses_with_session_id() {
    let line = r#"{"type":"system","subtype":"init","session_id":"S-abc","cwd":"/w","model":"M","tools":["Bash"]}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    match parsed {
        AgentMessage::Init(init) => {
            assert_eq!(init.session_id, "S-abc");
            assert_eq!(init.cwd.as_deref(), Some("/w"));
            assert_eq!(init.model.as_deref(), Some("M"));
            assert_eq!(init.tools, vec!["Bash".to_owned()]);
        }
        other => panic!("expected Init, got {other:?}"),
    }
}

#[test]
fn non_init_system_message_is_skipped() {
    let line = r#"{"type":"system","subtype":"compact","session_id":"S-abc"}"#;
    assert!(protocol::parse_line(line).expect("parse").is_none());
}

#[test]
fn assistant_text_blocks_parse_in_order() {
    let line = r#"{"type":"assistant","session_id":"S-abc","message":{"content":[{"type":"text","text":"one"},{"type":"text","text":"two"}]}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    let AgentMessage::Assistant { content } = parsed else {
        panic!("expected Assistant");
    };
    assert_eq!(content.len(), 2);
    assert!(matches!(&content[0], ContentBlock::Text { text } if text == "one"));
    assert!(matches!(&content[1], ContentBlock::Text { text } if text == "two"));
}

#[test]
fn assistant_tool_use_block_carries_name_and_input() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu1","name":"Bash","input":{"command":"ls -la"}}]}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    let AgentMessage::Assistant { content } = parsed else {
        panic!("expected Assistant");
    };
    match &content[0] {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "tu1");
            assert_eq!(name, "Bash");
            assert_eq!(input["command"], "ls -la");
        }
        other => panic!("expected ToolUse, got {other:?}"),
    }
}

#[test]
fn assistant_thinking_block_parses() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"}]}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    let AgentMessage::Assistant { content } = parsed else {
        panic!("expected Assistant");
    };
    assert!(matches!(&content[0], ContentBlock::Thinking { thinking } if thinking == "hmm"));
}

#[test]
fn unknown_content_block_type_is_tolerated() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"server_tool_use","weird":true}]}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    let AgentMessage::Assistant { content } = parsed else {
        panic!("expected Assistant");
    };
    assert!(matches!(&content[0], ContentBlock::Other));
}

#[test]
fn user_message_is_tool_result_echo() {
    let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu1"}]}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");
    assert!(matches!(parsed, AgentMessage::ToolResultEcho));
}

#[test]
fn result_message_carries_usage() {
    let line = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":12345,"num_turns":5,"total_cost_usd":0.0123,"usage":{"input_tokens":1200,"output_tokens":3400}}"#;
    let parsed = protocol::parse_line(line).expect("parse").expect("message");

    let AgentMessage::Result(result) = parsed else {
        panic!("expected Result");
    };
    assert_eq!(result.subtype, "success");
    assert!(!result.is_error);
    assert_eq!(result.duration_ms, 12345);
    assert_eq!(result.num_turns, 5);
    assert!((result.total_cost_usd - 0.0123).abs() < f64::EPSILON);
    assert_eq!(result.usage.input_tokens, 1200);
    assert_eq!(result.usage.output_tokens, 3400);
}

#[test]
fn unknown_type_is_skipped_not_fatal() {
    let line = r#"{"type":"telemetry","payload":{}}"#;
    assert!(protocol::parse_line(line).expect("parse").is_none());
}

#[test]
fn malformed_json_is_a_recoverable_error() {
    let result = protocol::parse_line("{not json");
    assert!(result.is_err());
}

#[test]
fn blank_line_is_skipped() {
    assert!(protocol::parse_line("   ").expect("parse").is_none());
}

#[test]
fn outbound_user_message_has_exact_shape() {
    let value = protocol::user_message("hello there");
    assert_eq!(value["type"], "user");
    assert_eq!(value["message"]["role"], "user");
    assert_eq!(value["message"]["content"], "hello there");

    // One line on the wire: the serialized form contains no newline, the
    // writer appends exactly one.
    let serialized = serde_json::to_string(&value).expect("serialize");
    assert!(!serialized.contains('\n'));
}
