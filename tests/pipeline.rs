//! End-to-end document processing against a temporary store.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use tablequery::config::Settings;
use tablequery::context::AppContext;
use tablequery::extractors::ExtractorRouter;
use tablequery::llm::{CompletionRequest, CompletionResponse, CompletionService, LlmError};
use tablequery::models::ColumnType;
use tablequery::reconstruct::{table_references, PROVENANCE_MARKER};
use tablequery::repository::TableStore;
use tablequery::services::{DocumentPipeline, PipelineOptions};

const REPORT: &str = r#"<!DOCTYPE html>
<html>
<head><title>Annual report</title><style>td { color: red; }</style></head>
<body>
<h1>Annual report</h1>
<p>Headcount by region is listed first.</p>
<table>
  <thead>
    <tr><th colspan="2">Region</th><th>Staff</th></tr>
    <tr><th>Name</th><th>Code</th><th></th></tr>
  </thead>
  <tbody>
    <tr><td>North</td><td>N</td><td>12</td></tr>
    <tr><td>South</td><td>S</td><td>30</td></tr>
  </tbody>
</table>
<p>Revenue follows.</p>
<table>
  <tr><th>Quarter</th><th>Revenue</th><th>Audited</th></tr>
  <tr><td>Q1</td><td>1.5</td><td>yes</td></tr>
  <tr><td>Q2</td><td>2.25</td><td>no</td></tr>
</table>
<p>End of report.</p>
</body>
</html>"#;

/// Describes every table except the revenue table, which fails.
struct PartialLlm;

#[async_trait]
impl CompletionService for PartialLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if request.user_text().contains("Table ID: report_table_2") {
            return Err(LlmError::Api("HTTP 500".to_string()));
        }
        Ok(CompletionResponse::new("Staff numbers per region."))
    }
}

async fn setup_context(
    llm: Arc<dyn CompletionService>,
    llm_enabled: bool,
) -> (AppContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
    settings.llm.enabled = llm_enabled;
    let store = TableStore::open(&settings.database_path())
        .await
        .expect("Failed to open store");
    (AppContext::new(settings, store, llm), dir)
}

// ============================================================================
// HTML documents
// ============================================================================

#[tokio::test]
async fn failed_descriptions_leave_table_chunks_untouched() {
    let (ctx, dir) = setup_context(Arc::new(PartialLlm), true).await;
    let path = dir.path().join("report.html");
    fs::write(&path, REPORT).unwrap();

    let extraction = ExtractorRouter::new().extract(&path).unwrap();
    assert_eq!(extraction.tables.len(), 2);
    assert_eq!(extraction.table_positions.len(), 2);

    let report = DocumentPipeline::new(&ctx, PipelineOptions::default())
        .process(&path)
        .await
        .unwrap();

    assert_eq!(report.total_tables, 2);
    assert_eq!(report.successful_tables, 2);
    assert_eq!(report.replacement.successful_replacements, 1);
    assert_eq!(report.replacement.failed_replacements, 1);
    assert!(report.tables[0].description_ok);
    assert!(!report.tables[1].description_ok);

    let document = &report.processed_document;
    assert!(document.starts_with(PROVENANCE_MARKER));
    assert_eq!(
        table_references(document),
        vec![(
            "report_table_1".to_string(),
            "Staff numbers per region.".to_string()
        )]
    );
    let revenue_chunk = &extraction.chunks[extraction.table_positions[1]];
    assert!(document.contains(revenue_chunk.as_str()));
    assert!(document.contains("Revenue follows."));
    assert!(!document.contains("color: red"));

    // A failed description is not stored as the table's description.
    let revenue = ctx.store.get_table("report_table_2").await.unwrap().unwrap();
    assert!(revenue.description.is_none());
}

#[tokio::test]
async fn schemas_are_flattened_and_typed() {
    let (ctx, dir) = setup_context(Arc::new(PartialLlm), false).await;
    let path = dir.path().join("report.html");
    fs::write(&path, REPORT).unwrap();

    DocumentPipeline::new(&ctx, PipelineOptions::default())
        .process(&path)
        .await
        .unwrap();

    let headcount = ctx.store.get_table("report_table_1").await.unwrap().unwrap();
    assert_eq!(
        headcount.column_names,
        vec!["Region_Name", "Region_Code", "Staff"]
    );
    assert_eq!(headcount.column_types["Staff"], ColumnType::Integer);
    assert_eq!(headcount.row_count, 2);
    assert_eq!(
        headcount.description.as_deref(),
        Some("Table with 2 rows and 3 columns. Columns: Region_Name, Region_Code, Staff")
    );

    let revenue = ctx.store.get_table("report_table_2").await.unwrap().unwrap();
    assert_eq!(revenue.column_types["Revenue"], ColumnType::Float);
    assert_eq!(revenue.column_types["Audited"], ColumnType::Boolean);
    assert_eq!(revenue.column_types["Quarter"], ColumnType::String);

    let rows = ctx.store.get_rows("report_table_2", None, 0).await.unwrap();
    assert_eq!(rows[1].row_data["Revenue"], serde_json::json!(2.25));
    assert_eq!(rows[0].row_data["Audited"], serde_json::json!(true));
}

#[tokio::test]
async fn artifacts_are_written_to_output_dir() {
    let (ctx, dir) = setup_context(Arc::new(PartialLlm), true).await;
    let path = dir.path().join("report.html");
    fs::write(&path, REPORT).unwrap();
    let out = dir.path().join("artifacts");

    let options = PipelineOptions {
        output_dir: Some(out.clone()),
        context_hint: Some("annual report".to_string()),
        ..Default::default()
    };
    let report = DocumentPipeline::new(&ctx, options)
        .process(&path)
        .await
        .unwrap();

    for name in [
        "report_processed.md",
        "report_original.md",
        "report_schemas.json",
        "report_descriptions.json",
        "report_replacement_report.txt",
    ] {
        assert!(out.join(name).exists(), "missing {}", name);
    }
    assert_eq!(report.artifacts.len(), 5);

    let processed = fs::read_to_string(out.join("report_processed.md")).unwrap();
    assert_eq!(processed, report.processed_document);
    let descriptions: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("report_descriptions.json")).unwrap())
            .unwrap();
    assert_eq!(descriptions[1]["status"], "error");
}

// ============================================================================
// Store lifecycle
// ============================================================================

#[tokio::test]
async fn clear_on_start_removes_other_documents() {
    let (ctx, dir) = setup_context(Arc::new(PartialLlm), false).await;
    let first = dir.path().join("report.html");
    let second = dir.path().join("other.html");
    fs::write(&first, REPORT).unwrap();
    fs::write(
        &second,
        "<p>Only one.</p><table><tr><th>a</th></tr><tr><td>1</td></tr></table>",
    )
    .unwrap();

    let keep = PipelineOptions {
        save_outputs: false,
        ..Default::default()
    };
    DocumentPipeline::new(&ctx, keep).process(&first).await.unwrap();

    let clear = PipelineOptions {
        save_outputs: false,
        clear_store_on_start: true,
        ..Default::default()
    };
    DocumentPipeline::new(&ctx, clear).process(&second).await.unwrap();

    let tables = ctx.store.list_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_id, "other_table_1");
    assert_eq!(ctx.store.list_tables_by_source("report.html").await.unwrap().len(), 0);
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let (ctx, dir) = setup_context(Arc::new(PartialLlm), false).await;
    let path = dir.path().join("report.html");
    fs::write(&path, REPORT).unwrap();
    let options = PipelineOptions {
        save_outputs: false,
        ..Default::default()
    };
    DocumentPipeline::new(&ctx, options).process(&path).await.unwrap();

    let backup = dir.path().join("backup.db");
    ctx.store.backup(&backup).await.unwrap();
    ctx.store.clear().await.unwrap();
    assert_eq!(ctx.store.summary().await.unwrap().total_tables, 0);

    ctx.store.restore(&backup).await.unwrap();
    let summary = ctx.store.summary().await.unwrap();
    assert_eq!(summary.total_tables, 2);
    assert_eq!(summary.total_rows, 4);
}
