//! Tests for the question-to-SQL path against a real table store.
//!
//! The completion service is scripted: feasibility requests get a fixed
//! verdict and SQL requests are answered from a list of replies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tablequery::chat::{SqlGenerator, SqlGeneratorConfig, SqlOutcome, TableChat};
use tablequery::llm::{CompletionRequest, CompletionResponse, CompletionService, LlmError};
use tablequery::models::RawTable;
use tablequery::repository::{RawResult, TableStore};
use tablequery::schema_processor::SchemaProcessor;

const FULFILLABLE: &str = r#"{"is_fulfillable": true, "confidence": 0.9, "reasoning": "orders table", "required_tables": ["orders_table_1"]}"#;
const NOT_FULFILLABLE: &str = r#"{"is_fulfillable": false, "confidence": 0.95, "reasoning": "unrelated"}"#;
const VALID_SQL: &str = "SELECT COUNT(*) FROM table_data WHERE table_id = 'orders_table_1'";

/// Completion service with scripted replies and call counters.
struct ScriptedLlm {
    verdict: &'static str,
    /// Replies to SQL requests in order; `None` is a transport error. The
    /// last reply repeats.
    sql_replies: Vec<Option<&'static str>>,
    calls: AtomicUsize,
    sql_calls: AtomicUsize,
    sql_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(verdict: &'static str, sql_replies: Vec<Option<&'static str>>) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            sql_replies,
            calls: AtomicUsize::new(0),
            sql_calls: AtomicUsize::new(0),
            sql_prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn sql_calls(&self) -> usize {
        self.sql_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.user_text().to_string();
        if prompt.contains("\"is_fulfillable\"") {
            return Ok(CompletionResponse::new(self.verdict));
        }

        let n = self.sql_calls.fetch_add(1, Ordering::SeqCst);
        self.sql_prompts.lock().unwrap().push(prompt);
        let reply = self
            .sql_replies
            .get(n)
            .or(self.sql_replies.last())
            .copied()
            .flatten();
        match reply {
            Some(text) => Ok(CompletionResponse::new(text)),
            None => Err(LlmError::Connection("connection refused".to_string())),
        }
    }
}

async fn setup_test_db() -> (TableStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = TableStore::open(&dir.path().join("test.db"))
        .await
        .expect("Failed to open store");
    (store, dir)
}

async fn store_orders(store: &TableStore) {
    let raw = RawTable {
        table_id: "orders_table_1".to_string(),
        index: 0,
        markup: "<table><tr><th>id</th><th>total</th></tr>\
                 <tr><td>1</td><td>10</td></tr>\
                 <tr><td>2</td><td>20.5</td></tr></table>"
            .to_string(),
        label: None,
    };
    let schema = SchemaProcessor::new().extract_schema(&raw);
    assert!(schema.success);
    store
        .upsert_table(&schema, Some("Order totals."), "orders.html", None)
        .await
        .expect("Failed to store table");
}

fn chat(store: &TableStore, llm: Arc<ScriptedLlm>, allow_mutations: bool) -> TableChat {
    let config = SqlGeneratorConfig {
        allow_mutations,
        ..Default::default()
    };
    TableChat::new(store.clone(), llm, config)
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn empty_store_is_impossible_without_completion_calls() {
    let (store, _dir) = setup_test_db().await;
    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some(VALID_SQL)]);

    let outcome = chat(&store, llm.clone(), false).ask("count all rows").await;

    assert_eq!(outcome, SqlOutcome::Impossible);
    assert_eq!(outcome.to_string(), "IMPOSSIBLE");
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn valid_sql_is_returned_on_first_attempt() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some(VALID_SQL)]);

    let outcome = chat(&store, llm.clone(), false).ask("how many orders?").await;

    assert_eq!(outcome, SqlOutcome::Statement(format!("{};", VALID_SQL)));
    assert_eq!(llm.sql_calls(), 1);
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn not_fulfillable_skips_generation() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(NOT_FULFILLABLE, vec![Some(VALID_SQL)]);

    let text = chat(&store, llm.clone(), false)
        .ask_text("what's the weather today?")
        .await;

    assert_eq!(text, "IMPOSSIBLE");
    assert_eq!(llm.calls(), 1);
    assert_eq!(llm.sql_calls(), 0);
}

#[tokio::test]
async fn unparseable_verdict_uses_keywords() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(
        "Yes, \"is_fulfillable\" would be true here.",
        vec![Some(VALID_SQL)],
    );

    let verdict = chat(&store, llm, false).analyze("how many orders?").await.unwrap();

    assert!(verdict.is_fulfillable);
    assert_eq!(verdict.confidence, 0.3);
}

// ============================================================================
// Generation loop
// ============================================================================

#[tokio::test]
async fn non_sql_replies_exhaust_exactly_five_attempts() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some("I would count the orders.")]);

    let generator = SqlGenerator::new(llm.clone(), SqlGeneratorConfig::default());
    let tables = store.list_tables().await.unwrap();
    let outcome = generator.generate("how many orders?", &tables, &store).await;

    assert!(outcome.statement.is_none());
    assert_eq!(outcome.attempts, 5);
    assert_eq!(outcome.failures.len(), 5);
    assert_eq!(llm.sql_calls(), 5);
}

#[tokio::test]
async fn exhausted_loop_is_impossible_through_chat() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some("no idea")]);

    let outcome = chat(&store, llm.clone(), false).ask("how many orders?").await;

    assert!(outcome.is_impossible());
    assert_eq!(llm.calls(), 6);
}

#[tokio::test]
async fn transport_errors_are_retried() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(FULFILLABLE, vec![None, None, Some(VALID_SQL)]);

    let outcome = chat(&store, llm.clone(), false).ask("how many orders?").await;

    assert!(!outcome.is_impossible());
    assert_eq!(llm.sql_calls(), 3);
}

#[tokio::test]
async fn failed_validation_is_quoted_in_next_prompt() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let llm = ScriptedLlm::new(
        FULFILLABLE,
        vec![Some("SELECT totl FROM tables"), Some(VALID_SQL)],
    );

    let generator = SqlGenerator::new(llm.clone(), SqlGeneratorConfig::default());
    let tables = store.list_tables().await.unwrap();
    let outcome = generator.generate("how many orders?", &tables, &store).await;

    assert_eq!(outcome.attempts, 2);
    let prompts = llm.sql_prompts.lock().unwrap();
    assert!(!prompts[0].contains("This is attempt"));
    assert!(prompts[1].contains("This is attempt 2"));
    assert!(prompts[1].contains("no such column"));
}

#[tokio::test]
async fn mutations_are_refused_unless_allowed() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let delete = "DELETE FROM table_data WHERE table_id = 'orders_table_1'";

    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some(delete)]);
    let outcome = chat(&store, llm.clone(), false).ask("remove the orders").await;
    assert!(outcome.is_impossible());
    assert_eq!(llm.sql_calls(), 5);

    let llm = ScriptedLlm::new(FULFILLABLE, vec![Some(delete)]);
    let outcome = chat(&store, llm, true).ask("remove the orders").await;
    assert_eq!(outcome.statement(), Some(format!("{};", delete).as_str()));

    // Validation never applies the statement.
    assert_eq!(store.count_rows("orders_table_1").await.unwrap(), 2);
}

// ============================================================================
// Statement execution
// ============================================================================

#[tokio::test]
async fn run_statement_returns_rows() {
    let (store, _dir) = setup_test_db().await;
    store_orders(&store).await;
    let chat = chat(&store, ScriptedLlm::new(FULFILLABLE, vec![]), false);

    let result = chat
        .run_statement(
            "SELECT CAST(json_extract(row_data, '$.\"total\"') AS REAL) AS total \
             FROM table_data WHERE table_id = 'orders_table_1' ORDER BY row_index",
        )
        .await
        .unwrap();

    match result {
        RawResult::Rows { columns, rows } => {
            assert_eq!(columns, vec!["total"]);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[1]["total"], serde_json::json!(20.5));
        }
        other => panic!("expected rows, got {:?}", other),
    }

    assert!(chat.run_statement("DELETE FROM tables").await.is_err());
    assert_eq!(chat.list_tables().await.unwrap().len(), 1);
    assert_eq!(chat.database_summary().await.unwrap().total_rows, 2);
}
