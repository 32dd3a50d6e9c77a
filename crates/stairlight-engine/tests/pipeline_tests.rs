//! End-to-end builds over in-memory backends and the on-disk fixtures

use pretty_assertions::assert_eq;
use serde_json::json;
use stairlight_core::{
    BackendDescriptor, BackendKind, Config, DiagnosticCode, MappingConfig, RetryPolicy, Settings,
};
use stairlight_engine::{load_mapping, BuildError, Pipeline};
use stairlight_source::{Locator, MemoryBackend, SourceAccessError};
use stairlight_sql::UndefinedReason;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        timeout_secs: 5,
    }
}

fn locator(backend: MemoryBackend, descriptor: BackendDescriptor) -> Locator {
    Locator::new(Arc::new(backend), &descriptor, fast_retry()).unwrap()
}

fn settings(concurrency: usize) -> Settings {
    Settings {
        concurrency,
        ..Settings::default()
    }
}

fn count(report: &stairlight_core::Report, code: DiagnosticCode) -> usize {
    report.diagnostics.iter().filter(|d| d.code == code).count()
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn fixture_pipeline() -> Pipeline {
    let config = Config::from_file(Path::new("../../fixtures/stairlight.toml")).unwrap();
    let mapping = load_mapping(&config, None).unwrap();
    Pipeline::from_config(&config, mapping).unwrap()
}

#[tokio::test]
async fn fixture_project_builds() {
    let output = fixture_pipeline().build().await.unwrap();
    let graph = &output.graph;

    let edge = graph.annotations("proj.ds.downstream", "proj.ds.upstream");
    assert_eq!(edge.len(), 1);
    assert_eq!(edge[0].kind, BackendKind::Fs);
    assert_eq!(edge[0].file, "main/test_e.sql");
    assert_eq!(edge[0].line, 1);
    assert_eq!(edge[0].line_str, "SELECT * FROM proj.ds.upstream WHERE 1 = 1");
    assert_eq!(edge[0].labels, labels(&[("Source", "external"), ("Team", "core")]));

    // One unit per parameter set
    assert_eq!(graph.annotations("proj.ds.a_daily", "proj.ds_global.events_daily")[0].line, 4);
    assert_eq!(
        graph.annotations("proj.ds.a_hourly", "proj.ds_global.events_hourly")[0].labels,
        labels(&[("Team", "growth")])
    );

    // Override and declared upstream
    assert_eq!(graph.annotations("proj.ds.b", "proj.ds.source_snapshot")[0].line, 6);
    assert_eq!(graph.annotations("proj.ds.b", "proj.ds.users")[0].line, 7);
    assert!(graph.annotations("proj.ds.b", "tmp_source").is_empty());

    // `${name}` placeholders filled from global parameters
    assert_eq!(graph.annotations("proj.ds.c", "proj.ds.orders")[0].line, 4);
    assert_eq!(graph.annotations("proj.ds.c", "proj.ds.b")[0].line, 5);

    assert_eq!(output.report.summary.sources_located, 5);
    assert_eq!(output.report.summary.units_built, 5);
    assert_eq!(count(&output.report, DiagnosticCode::MappingDeadEntry), 1);
}

#[tokio::test]
async fn fixture_unmapped_file_goes_to_check() {
    let output = fixture_pipeline().build().await.unwrap();

    assert!(!output.graph.contains("cte_multi_line"));

    let entry = output
        .check
        .mapping
        .iter()
        .find(|entry| entry.file_suffix.as_deref() == Some("cte/cte_multi_line.sql"))
        .unwrap();
    assert_eq!(entry.kind, Some(BackendKind::Fs));
    assert_eq!(entry.tables[0].table_name, "cte_multi_line");
    assert!(entry.tables[0].parameters.is_empty());

    let undefined: Vec<(&str, Option<usize>, UndefinedReason)> = output
        .check
        .undefined
        .iter()
        .filter(|u| u.file == "cte/cte_multi_line.sql")
        .map(|u| (u.table.as_str(), u.line, u.reason))
        .collect();
    assert_eq!(
        undefined,
        vec![
            ("proj.ds.downstream", Some(5), UndefinedReason::NoMappingEntry),
            ("proj.ds.b", Some(14), UndefinedReason::NoMappingEntry),
        ]
    );
}

#[tokio::test]
async fn rebuild_is_byte_identical() {
    let pipeline = fixture_pipeline();
    let first = pipeline.build().await.unwrap().graph.to_json().unwrap();
    let second = pipeline.build().await.unwrap().graph.to_json().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn mapped_implicit_and_incomplete_references() {
    let backend = MemoryBackend::from_sources(
        "sql",
        [("main/a.sql", "SELECT *\nFROM p.d.x\nJOIN orders USING (id)\n")],
    );
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: main/a.sql\n    tables:\n      - table_name: p.d.a\n",
    )
    .unwrap();
    let pipeline = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(2),
    );

    let output = pipeline.build().await.unwrap();
    assert_eq!(output.graph.annotations("p.d.a", "p.d.x")[0].line, 2);
    assert_eq!(output.graph.upstreams("p.d.a").map(|ups| ups.len()), Some(1));

    assert_eq!(output.check.undefined.len(), 1);
    let orders = &output.check.undefined[0];
    assert_eq!(orders.table, "orders");
    assert_eq!(orders.table_name.as_deref(), Some("p.d.a"));
    assert_eq!(orders.line, Some(3));
    assert_eq!(orders.reason, UndefinedReason::IncompleteIdentifier);
    assert_eq!(count(&output.report, DiagnosticCode::MappingUndefinedReference), 1);
}

#[tokio::test]
async fn default_prefix_completes_short_names() {
    let backend = MemoryBackend::from_sources("sql", [("a.sql", "SELECT *\nFROM orders\n")]);
    let mut descriptor = BackendDescriptor::filesystem("sql");
    descriptor.default_table_prefix = Some("p.d".to_string());
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: a.sql\n    tables:\n      - table_name: p.d.a\n",
    )
    .unwrap();

    let output = Pipeline::new(vec![locator(backend, descriptor)], mapping, settings(1))
        .build()
        .await
        .unwrap();
    assert_eq!(output.graph.annotations("p.d.a", "p.d.orders").len(), 1);
    assert!(output.check.undefined.is_empty());
}

#[tokio::test]
async fn incomplete_mapped_names_stay_out_of_the_graph() {
    let backend = MemoryBackend::from_sources(
        "sql",
        [
            ("a.sql", "SELECT *\nFROM p.d.src\n"),
            ("b.sql", "SELECT *\nFROM p.d.src\n"),
        ],
    );
    let mapping = MappingConfig::from_yaml(
        r#"
mapping:
  - file_suffix: a.sql
    tables:
      - table_name: out
  - file_suffix: b.sql
    tables:
      - table_name: p.d.b
        overrides:
          p.d.src: src
"#,
    )
    .unwrap();

    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(2),
    )
    .build()
    .await
    .unwrap();

    assert!(!output.graph.contains("out"));
    assert!(!output.graph.contains("src"));
    assert!(output.graph.upstreams("p.d.b").map_or(true, |ups| ups.is_empty()));
    assert_eq!(count(&output.report, DiagnosticCode::MappingIncompleteTable), 1);
    assert_eq!(count(&output.report, DiagnosticCode::MappingDeadEntry), 0);

    let undefined: Vec<(&str, UndefinedReason)> = output
        .check
        .undefined
        .iter()
        .filter(|u| u.file == "b.sql")
        .map(|u| (u.table.as_str(), u.reason))
        .collect();
    assert_eq!(undefined, vec![("p.d.src", UndefinedReason::IncompleteIdentifier)]);
}

#[tokio::test]
async fn invalid_utf8_source_does_not_abort_the_build() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sql")).unwrap();
    std::fs::write(dir.path().join("sql/a.sql"), b"SELECT * FROM p.d.caf\xe9\n").unwrap();
    std::fs::write(dir.path().join("sql/b.sql"), "SELECT *\nFROM p.d.orders\n").unwrap();

    let config = Config {
        project_root: dir.path().to_path_buf(),
        include: vec![BackendDescriptor::filesystem("sql")],
        ..Config::default()
    };
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: b.sql\n    tables:\n      - table_name: p.d.b\n",
    )
    .unwrap();

    let output = Pipeline::from_config(&config, mapping).unwrap().build().await.unwrap();
    assert_eq!(output.graph.annotations("p.d.b", "p.d.orders").len(), 1);
    assert_eq!(output.report.summary.sources_located, 2);
}

#[tokio::test]
async fn assembly_order_does_not_depend_on_completion_order() {
    let sources = (0..12).map(|i| (format!("f{:02}.sql", i), format!("SELECT *\nFROM p.d.y{}\n", i % 3)));
    let backend = MemoryBackend::from_sources("sql", sources).with_latency(2);
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: .sql\n    tables:\n      - table_name: p.d.x\n",
    )
    .unwrap();

    let sequential = Pipeline::new(
        vec![locator(backend.clone(), BackendDescriptor::filesystem("sql"))],
        mapping.clone(),
        settings(1),
    )
    .build()
    .await
    .unwrap();
    let concurrent = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(8),
    )
    .build()
    .await
    .unwrap();

    assert_eq!(
        sequential.graph.to_json().unwrap(),
        concurrent.graph.to_json().unwrap()
    );
    let files: Vec<&str> = concurrent
        .graph
        .annotations("p.d.x", "p.d.y0")
        .iter()
        .map(|a| a.file.as_str())
        .collect();
    assert_eq!(files, vec!["f00.sql", "f03.sql", "f06.sql", "f09.sql"]);
}

#[tokio::test]
async fn object_storage_annotations_carry_bucket() {
    let backend = MemoryBackend::from_sources("lineage", [("sql/a.sql", "SELECT * FROM p.d.src")]).as_object_storage();
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - type: gcs\n    file_suffix: sql/a.sql\n    tables:\n      - table_name: p.d.a\n        labels:\n          Source: gcs\n",
    )
    .unwrap();

    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::gcs("lineage"))],
        mapping,
        settings(1),
    )
    .build()
    .await
    .unwrap();

    let annotation = &output.graph.annotations("p.d.a", "p.d.src")[0];
    assert_eq!(annotation.kind, BackendKind::Gcs);
    assert_eq!(annotation.uri, "gs://lineage/sql/a.sql");
    assert_eq!(annotation.bucket.as_deref(), Some("lineage"));
    assert_eq!(annotation.labels, labels(&[("Source", "gcs")]));
}

#[tokio::test]
async fn unmapped_template_becomes_a_skeleton() {
    let backend = MemoryBackend::from_sources(
        "sql",
        [("main/daily.sql", "SELECT * FROM {{ params.PROJECT }}.ds.events\n")],
    );
    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        MappingConfig::default(),
        settings(1),
    )
    .build()
    .await
    .unwrap();

    assert!(output.graph.is_empty());
    assert_eq!(count(&output.report, DiagnosticCode::TemplateUnmapped), 1);

    let entry = &output.check.mapping[0];
    assert_eq!(entry.file_suffix.as_deref(), Some("main/daily.sql"));
    assert_eq!(entry.tables[0].table_name, "daily");
    assert_eq!(entry.tables[0].parameters["params"], json!({"PROJECT": null}));
}

#[tokio::test]
async fn missing_parameters_skip_only_that_set() {
    let backend = MemoryBackend::from_sources(
        "sql",
        [("a.sql", "SELECT * FROM {{ params.PROJECT }}.ds.{{ params.TABLE }}\n")],
    );
    let mapping = MappingConfig::from_yaml(
        r#"
mapping:
  - file_suffix: a.sql
    tables:
      - table_name: p.ds.complete
        parameters:
          params:
            PROJECT: p
            TABLE: events
      - table_name: p.ds.partial
        parameters:
          params:
            PROJECT: p
"#,
    )
    .unwrap();

    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(1),
    )
    .build()
    .await
    .unwrap();

    assert_eq!(output.graph.annotations("p.ds.complete", "p.ds.events").len(), 1);
    assert!(!output.graph.contains("p.ds.partial"));
    assert_eq!(count(&output.report, DiagnosticCode::TemplateMissingParameters), 1);
    assert_eq!(count(&output.report, DiagnosticCode::MappingDeadEntry), 1);

    let skeleton = &output.check.mapping[0].tables[0];
    assert_eq!(skeleton.table_name, "p.ds.partial");
    assert_eq!(skeleton.parameters["params"], json!({"TABLE": null}));
}

#[tokio::test]
async fn unparseable_unit_is_reported_and_kept_as_node() {
    let backend = MemoryBackend::from_sources("sql", [("a.sql", "-- nothing here\n")]);
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: a.sql\n    tables:\n      - table_name: p.d.a\n",
    )
    .unwrap();

    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(1),
    )
    .build()
    .await
    .unwrap();

    assert_eq!(count(&output.report, DiagnosticCode::SqlParseWarning), 1);
    assert!(output.graph.upstreams("p.d.a").is_some_and(|ups| ups.is_empty()));
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let healthy = MemoryBackend::from_sources("sql", [("a.sql", "SELECT * FROM p.d.x")]);
    let broken = MemoryBackend::new("other").with_listing_failure();
    let pipeline = Pipeline::new(
        vec![
            locator(healthy, BackendDescriptor::filesystem("sql")),
            locator(broken, BackendDescriptor::filesystem("other")),
        ],
        MappingConfig::default(),
        settings(2),
    );

    let error = pipeline.build().await.unwrap_err();
    match &error {
        BuildError::Source(SourceAccessError::PermissionDenied { backend, .. }) => {
            assert_eq!(backend, "fs:other");
        }
        other => panic!("expected a permission error, got {:?}", other),
    }
    assert_eq!(error.to_diagnostic().code, DiagnosticCode::SourceAccessFailed);
}

#[tokio::test]
async fn fetch_failure_aborts_the_run() {
    let backend = MemoryBackend::from_sources("sql", [("a.sql", "SELECT * FROM p.d.x"), ("b.sql", "SELECT 1")]);
    backend
        .add_error_for_key(
            "b.sql",
            SourceAccessError::PermissionDenied {
                backend: "fs:sql".to_string(),
                path: "b.sql".to_string(),
                message: "denied".to_string(),
            },
        )
        .await;

    let result = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        MappingConfig::default(),
        settings(2),
    )
    .build()
    .await;
    assert!(matches!(result, Err(BuildError::Source(_))));
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let backend = MemoryBackend::from_sources("sql", [("a.sql", "SELECT * FROM p.d.x")]).with_transient_failures(2);
    let counter = backend.clone();
    let mapping = MappingConfig::from_yaml(
        "mapping:\n  - file_suffix: a.sql\n    tables:\n      - table_name: p.d.a\n",
    )
    .unwrap();

    let output = Pipeline::new(
        vec![locator(backend, BackendDescriptor::filesystem("sql"))],
        mapping,
        settings(1),
    )
    .build()
    .await
    .unwrap();

    assert_eq!(counter.fetch_count(), 3);
    assert_eq!(output.graph.annotations("p.d.a", "p.d.x").len(), 1);
}
