//! End-to-end pipeline runs against in-memory SQLite.
//!
//! This test suite covers:
//! - Rename and reorder applied before export
//! - Every export format written as `{task_id}.{ext}` with a `.done` marker
//! - Init-script and query failures tagged with the failing step
//! - Task status lookup after success and failure
//! - Raw fetch preview

#![cfg(feature = "sqlite")]

use std::fs;
use std::path::Path;

use fetchport_core::{
    ColumnInstruction, EmbeddedDatabase, ErrorKind, ExportFormat, ExportRequest, FetchportConfig,
    Pipeline, PipelineStep, SourceDescriptor, TaskStatus, parse_task_request, task_status,
};
use serde_json::{Value, json};

const SEED: &str = "
    CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, total REAL);
    INSERT INTO orders VALUES (1, 'ada', 12.5);
    INSERT INTO orders VALUES (2, 'grace', 7.0);
    INSERT INTO orders VALUES (3, 'linus', NULL);
";

fn orders_source(query: &str) -> SourceDescriptor {
    SourceDescriptor::Embedded(EmbeddedDatabase {
        path: ":memory:".to_string(),
        init_script: Some(SEED.to_string()),
        query: query.to_string(),
    })
}

fn pipeline(dir: &Path) -> Pipeline {
    Pipeline::new(FetchportConfig::default().with_temp_dir(dir))
}

#[tokio::test]
async fn test_csv_export_with_rename_and_reorder() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(orders_source("SELECT id, customer, total FROM orders ORDER BY id;"));
    let instructions = vec![
        ColumnInstruction::rename(1, "name"),
        ColumnInstruction::reposition(2, 0),
    ];

    let result = pipeline(dir.path())
        .run("orders-csv", &instructions, Some(&export))
        .await
        .unwrap();

    assert_eq!(result.task_id, "orders-csv");
    assert_eq!(result.file_type, ExportFormat::Csv);
    assert!(result.output_path.is_absolute());
    assert!(result.output_path.ends_with("orders-csv.csv"));
    assert_eq!(result.file_size, fs::metadata(&result.output_path).unwrap().len());

    let contents = fs::read_to_string(&result.output_path).unwrap();
    assert_eq!(contents, "total,id,name\n12.5,1,ada\n7.0,2,grace\n,3,linus\n");

    assert!(dir.path().join("orders-csv.done").exists());
    assert!(!dir.path().join("orders-csv.error").exists());
}

#[tokio::test]
async fn test_json_export_keeps_column_order() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(orders_source("SELECT customer, id FROM orders WHERE id = 1"))
        .with_file_type("JSON");

    let result = pipeline(dir.path())
        .run("orders-json", &[], Some(&export))
        .await
        .unwrap();

    let parsed: Value = serde_json::from_str(&fs::read_to_string(&result.output_path).unwrap()).unwrap();
    assert_eq!(parsed, json!([{"customer": "ada", "id": 1}]));
}

#[tokio::test]
async fn test_every_format_produces_named_artifact() {
    let dir = tempfile::tempdir().unwrap();
    for format in ExportFormat::ALL {
        let export = ExportRequest::new(orders_source("SELECT * FROM orders"))
            .with_file_type(format.extension());
        let task_id = format!("fmt-{}", format);

        let result = pipeline(dir.path())
            .run(&task_id, &[], Some(&export))
            .await
            .unwrap();

        assert_eq!(result.file_type, format);
        assert_eq!(
            result.output_path.file_name().unwrap().to_string_lossy(),
            format!("{}.{}", task_id, format.extension())
        );
        assert!(result.file_size > 0);
    }
}

#[tokio::test]
async fn test_zero_rows_still_exports_header() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(orders_source("SELECT id, customer FROM orders WHERE id < 0"));

    let result = pipeline(dir.path())
        .run("empty", &[ColumnInstruction::rename(0, "order_id")], Some(&export))
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(&result.output_path).unwrap(), "order_id,customer\n");
}

#[tokio::test]
async fn test_init_script_failure_tagged_as_fetch_step() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(SourceDescriptor::Embedded(EmbeddedDatabase {
        path: ":memory:".to_string(),
        init_script: Some("CREATE TABLE (".to_string()),
        query: "SELECT 1".to_string(),
    }));

    let error = pipeline(dir.path())
        .run("bad-init", &[], Some(&export))
        .await
        .unwrap_err();

    assert_eq!(error.step, PipelineStep::Fetch);
    assert_eq!(error.kind(), ErrorKind::InitScript);
    assert!(matches!(
        task_status(dir.path(), "bad-init").unwrap(),
        TaskStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn test_repeated_column_names_fail_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(orders_source(
        "SELECT o.id, p.id FROM orders o JOIN orders p ON p.id = o.id",
    ))
    .with_file_type("json");

    let error = pipeline(dir.path())
        .run("repeated", &[], Some(&export))
        .await
        .unwrap_err();

    assert_eq!(error.step, PipelineStep::Fetch);
    assert_eq!(error.kind(), ErrorKind::Fetch);
    assert!(!dir.path().join("repeated.json").exists());
}

#[tokio::test]
async fn test_export_failure_leaves_error_marker() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("blocked.zip")).unwrap();
    let export = ExportRequest::new(orders_source("SELECT * FROM orders")).with_file_type("zip");

    let error = pipeline(dir.path())
        .run("blocked", &[], Some(&export))
        .await
        .unwrap_err();

    assert_eq!(error.step, PipelineStep::Export);
    assert_eq!(error.kind(), ErrorKind::Export);

    let marker = fs::read_to_string(dir.path().join("blocked.error")).unwrap();
    assert_eq!(marker, error.source.to_string());
    assert!(!dir.path().join(".blocked.zip-staging.csv").exists());
}

#[tokio::test]
async fn test_status_after_success_points_at_output() {
    let dir = tempfile::tempdir().unwrap();
    let export = ExportRequest::new(orders_source("SELECT id FROM orders"));

    let result = pipeline(dir.path())
        .run("lookup", &[], Some(&export))
        .await
        .unwrap();

    assert_eq!(
        task_status(dir.path(), "lookup").unwrap(),
        TaskStatus::Completed {
            path: result.output_path
        }
    );
}

#[tokio::test]
async fn test_rerun_clears_stale_error_marker() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("again.error"), "previous failure").unwrap();
    let export = ExportRequest::new(orders_source("SELECT id FROM orders"));

    pipeline(dir.path())
        .run("again", &[], Some(&export))
        .await
        .unwrap();

    assert!(!dir.path().join("again.error").exists());
    assert!(matches!(
        task_status(dir.path(), "again").unwrap(),
        TaskStatus::Completed { .. }
    ));
}

#[tokio::test]
async fn test_request_payload_drives_run() {
    let dir = tempfile::tempdir().unwrap();
    let raw = json!({
        "task_id": "from-json",
        "inputs": [{"column": 0, "name": "order_id", "change_order": 1}],
        "configuration": {
            "file_type": "csv",
            "tmp_dir": dir.path(),
            "db_config": {
                "kind": "embedded",
                "initial_sql": SEED,
                "sql_query": "SELECT id, customer FROM orders ORDER BY id LIMIT 1"
            }
        }
    });

    let request = parse_task_request(&raw.to_string()).unwrap();
    let result = Pipeline::default().run_request(&request).await.unwrap();

    assert!(result.output_path.starts_with(dir.path().canonicalize().unwrap()));
    assert_eq!(
        fs::read_to_string(&result.output_path).unwrap(),
        "customer,order_id\nada,1\n"
    );
}

#[tokio::test]
async fn test_fetch_preview_truncates_without_exporting() {
    let dir = tempfile::tempdir().unwrap();
    let table = pipeline(dir.path())
        .fetch_preview(&orders_source("SELECT id FROM orders ORDER BY id"), Some(2))
        .await
        .unwrap();

    assert_eq!(table.columns(), ["id"]);
    assert_eq!(table.to_records().len(), 2);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
