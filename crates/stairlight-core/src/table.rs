//! Table identifier helpers

/// A fully-qualified identifier has two or three non-empty parts
/// (`dataset.table` or `project.dataset.table`).
pub fn is_fully_qualified(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    (2..=3).contains(&parts.len()) && parts.iter().all(|p| !p.trim().is_empty())
}
