use super::*;

#[test]
fn code_strings_are_stable() {
    assert_eq!(PipelineError::schema_load("sales", "down").code_str(), "schema_load_error");
    assert_eq!(PipelineError::parse("bad json").code_str(), "parse_error");
    assert_eq!(PipelineError::execution("boom").code_str(), "execution_error");
    assert_eq!(PipelineError::rejected("DROP").code_str(), "rejected");
    assert_eq!(PipelineError::render("too big").code_str(), "render_error");
}

#[test]
fn display_carries_code_and_reason() {
    let e = PipelineError::schema_load("sales", "connection refused");
    let s = e.to_string();
    assert!(s.starts_with("schema_load_error"));
    assert!(s.contains("sales"));
    assert!(e.reason().contains("connection refused"));
}

#[test]
fn anyhow_maps_to_execution() {
    let err: PipelineError = anyhow::anyhow!("Table 'db.missing_table' doesn't exist").into();
    match &err {
        PipelineError::Execution { message } => assert!(message.contains("missing_table")),
        other => panic!("unexpected variant: {:?}", other),
    }
}

#[test]
fn serde_is_tagged() {
    let v = serde_json::to_value(PipelineError::rejected("DELETE")).unwrap();
    assert_eq!(v["type"], "rejected");
    assert_eq!(v["keyword"], "DELETE");
}

#[test]
fn classify_execution_messages() {
    assert_eq!(ErrorCategory::classify("Unknown column 'b.strategy' in 'field list'"), ErrorCategory::ColumnReference);
    assert_eq!(ErrorCategory::classify("You have an error in your SQL syntax"), ErrorCategory::Syntax);
    assert_eq!(ErrorCategory::classify("Lost connection to MySQL server"), ErrorCategory::Connection);
    assert_eq!(ErrorCategory::classify("Access denied for user"), ErrorCategory::Permission);
    assert_eq!(ErrorCategory::classify("query timed out after 30s"), ErrorCategory::Timeout);
    assert_eq!(ErrorCategory::classify("something odd"), ErrorCategory::General);
    assert!(!ErrorCategory::General.hints().is_empty());
}
