//! Integration tests: build, persist, reload and query

use pretty_assertions::assert_eq;
use stairlight_core::BackendKind;
use stairlight_graph::{
    DependencyGraph, Direction, GraphBuilder, GraphSerializationError, LineageQuery, OutputType,
    Provenance, QueryRequest, QueryResult, UpstreamInput,
};
use std::collections::BTreeMap;

fn fs(file: &str) -> Provenance {
    Provenance {
        kind: BackendKind::Fs,
        file: file.to_string(),
        uri: format!("/repo/{}", file),
        bucket: None,
    }
}

fn input(table: &str, line: usize, line_str: &str) -> UpstreamInput {
    UpstreamInput {
        table: table.to_string(),
        line,
        line_str: line_str.to_string(),
        labels: BTreeMap::new(),
    }
}

fn sample_graph() -> DependencyGraph {
    let mut builder = GraphBuilder::new();
    builder.add_unit(
        "proj.ds.downstream",
        &fs("sql/main/test_e.sql"),
        &[input("proj.ds.upstream", 1, "SELECT * FROM proj.ds.upstream WHERE 1 = 1")],
    );
    builder.add_unit(
        "proj.ds.report",
        &fs("sql/main/report.sql"),
        &[
            input("proj.ds.downstream", 3, "FROM proj.ds.downstream"),
            input("proj.ds.calendar", 4, "JOIN proj.ds.calendar USING (day)"),
        ],
    );
    builder.finish()
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let graph = sample_graph();

    graph.save_to_file(&path).unwrap();
    let loaded = DependencyGraph::from_file(&path).unwrap();

    assert!(loaded.equivalent(&graph));
    assert_eq!(loaded.to_json().unwrap(), graph.to_json().unwrap());
}

#[test]
fn two_files_establishing_the_same_edge() {
    let mut builder = GraphBuilder::new();
    builder.add_unit("X", &fs("one.sql"), &[input("Y", 2, "FROM Y")]);
    builder.add_unit("X", &fs("two.sql"), &[input("Y", 5, "JOIN Y ON TRUE")]);
    let graph = builder.finish();

    let annotations = graph.annotations("X", "Y");
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0].file, "one.sql");
    assert_eq!(annotations[1].line, 5);
}

#[test]
fn loading_several_graphs_merges_them() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");

    sample_graph().save_to_file(&first).unwrap();
    let mut other = GraphBuilder::new();
    other.add_unit("proj.ds.calendar", &fs("sql/main/calendar.sql"), &[input("proj.raw.days", 2, "FROM proj.raw.days")]);
    other.finish().save_to_file(&second).unwrap();

    let mut merged = DependencyGraph::new();
    for path in [&first, &second, &first] {
        merged.merge(DependencyGraph::from_file(path).unwrap());
    }

    let query = LineageQuery::new(&merged);
    let request = QueryRequest::new(vec!["proj.ds.report".to_string()], Direction::Up).recursive(true);
    assert_eq!(
        query.run("proj.ds.report", &request),
        QueryResult::Tables(vec![
            "proj.ds.calendar".to_string(),
            "proj.ds.downstream".to_string(),
            "proj.raw.days".to_string(),
            "proj.ds.upstream".to_string(),
        ])
    );
    assert_eq!(merged.annotations("proj.ds.downstream", "proj.ds.upstream").len(), 1);
}

#[test]
fn downstream_files() {
    let graph = sample_graph();
    let query = LineageQuery::new(&graph);
    let request = QueryRequest::new(vec![], Direction::Down)
        .recursive(true)
        .output(OutputType::File);

    assert_eq!(
        query.run("proj.ds.upstream", &request),
        QueryResult::Files(vec![
            "sql/main/report.sql".to_string(),
            "sql/main/test_e.sql".to_string(),
        ])
    );
}

#[test]
fn missing_graph_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = DependencyGraph::from_file(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(GraphSerializationError::Io { .. })));
}
