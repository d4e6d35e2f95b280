use std::io::Write;

use chatsql::pipeline::PipelineState;
use chatsql::{PipelineConfig, RenderMode, ReplayFixture};

const FIXTURE: &str = r#"{
  "database": "sales",
  "tables": {
    "orders": [
      {"table": "orders", "name": "id", "type": "bigint", "key": true},
      {"table": "orders", "name": "total_amount", "type": "decimal(12,2)"},
      {"table": "orders", "name": "credit_id", "type": "bigint"}
    ],
    "credit": [
      {"table": "credit", "name": "id", "type": "bigint", "key": true},
      {"table": "credit", "name": "strategy", "type": "varchar(32)"}
    ]
  },
  "results": {
    "SELECT b.total_amount, t1.strategy\n  FROM orders b JOIN credit t1 ON b.credit_id = t1.id": {
      "columns": ["total_amount", "strategy"],
      "rows": [[100.0, "A"], [250.5, "B"]]
    }
  },
  "default": {"error": "Table 'sales.unknown' doesn't exist"},
  "model_text": "```json\n{\"sql\": \"SELECT b.total_amount, b.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id\", \"thoughts\": \"join on credit\", \"display_type\": \"response_table\"}\n```",
  "user_input": "order amounts by strategy"
}"#;

fn write_fixture(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(body.as_bytes()).expect("write fixture");
    f
}

#[tokio::test]
async fn replays_recorded_turn_with_repair() {
    let file = write_fixture(FIXTURE);
    let fixture = ReplayFixture::load(file.path()).expect("load fixture");
    assert_eq!(fixture.tables.len(), 2);

    let out = fixture.replay(PipelineConfig::default()).await;
    assert_eq!(out.states.first(), Some(&PipelineState::ReceivedText));
    assert_eq!(out.states.last(), Some(&PipelineState::Rendered));
    assert_eq!(
        out.sql_executed.as_deref(),
        Some("SELECT b.total_amount, t1.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id")
    );
    assert!(out.text.contains("| 250.5 | B |"), "{}", out.text);
    assert!(out.text.contains("b.strategy -> t1.strategy"));
}

#[tokio::test]
async fn default_response_drives_failure_rendering() {
    let body = FIXTURE.replace("SELECT b.total_amount, b.strategy FROM orders b", "SELECT u.x FROM unknown u, orders b");
    let file = write_fixture(&body);
    let fixture = ReplayFixture::load(file.path()).expect("load fixture");
    let out = fixture.replay(PipelineConfig::default().with_render_mode(RenderMode::Enhanced)).await;
    assert_eq!(out.states.last(), Some(&PipelineState::Failed));
    assert!(out.text.contains("doesn't exist"));
    assert!(out.text.contains("<chart-view"));
}

#[test]
fn malformed_fixture_reports_path() {
    let file = write_fixture("{ not json");
    let err = ReplayFixture::load(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("parsing fixture"));
}
