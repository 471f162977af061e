// src/deploy/analysis.rs

//! Change-set classification
//!
//! Decides whether the pending change set touches schema/API surface or is
//! documentation-only. Inputs: the pending-migration registry and an
//! optional changed-path listing file (one path per line, produced by the
//! release tooling). Documentation-only change sets short-circuit the
//! pipeline: nothing to migrate, nothing to trigger.

use crate::error::Result;
use crate::store::migrations;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Classification of the pending change set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// Pending migrations exist; schema or data changes
    Schema,
    /// Non-doc paths changed but no migrations pending
    Api,
    /// Only documentation changed (or nothing at all)
    DocsOnly,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Api => "api",
            Self::DocsOnly => "docs-only",
        }
    }

    /// Whether this change set requires the migrate step
    pub fn requires_migration(&self) -> bool {
        matches!(self, Self::Schema)
    }
}

/// Result of change analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    pub kind: ChangeKind,
    pub pending_migrations: Vec<String>,
    pub changed_paths: Vec<String>,
}

/// Classify the pending change set
pub fn analyze(conn: &Connection, change_listing: Option<&Path>) -> Result<ChangeAnalysis> {
    let pending_migrations = migrations::pending_ids(conn)?;
    let changed_paths = read_listing(change_listing)?;

    let kind = if !pending_migrations.is_empty() {
        ChangeKind::Schema
    } else if changed_paths.is_empty() || changed_paths.iter().all(|p| is_doc_path(p)) {
        ChangeKind::DocsOnly
    } else {
        ChangeKind::Api
    };

    debug!(
        "Change analysis: {} ({} pending migrations, {} changed paths)",
        kind.as_str(),
        pending_migrations.len(),
        changed_paths.len()
    );

    Ok(ChangeAnalysis {
        kind,
        pending_migrations,
        changed_paths,
    })
}

fn read_listing(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Documentation-only paths: markdown, plain text, and the docs tree
fn is_doc_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".md")
        || lower.ends_with(".txt")
        || lower.ends_with(".rst")
        || lower.starts_with("docs/")
        || lower.contains("/docs/")
        || lower.ends_with("license")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn listing(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_pending_migrations_force_schema() {
        let store = Store::open_in_memory().unwrap();
        // Fresh store: all registered migrations are pending
        let file = listing(&["README.md"]);

        let analysis = analyze(store.conn(), Some(file.path())).unwrap();
        assert_eq!(analysis.kind, ChangeKind::Schema);
        assert!(!analysis.pending_migrations.is_empty());
        assert!(analysis.kind.requires_migration());
    }

    #[test]
    fn test_docs_only_listing() {
        let store = Store::open_in_memory().unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        let file = listing(&["README.md", "docs/guide.txt", "# comment", ""]);

        let analysis = analyze(store.conn(), Some(file.path())).unwrap();
        assert_eq!(analysis.kind, ChangeKind::DocsOnly);
        assert_eq!(analysis.changed_paths.len(), 2);
        assert!(!analysis.kind.requires_migration());
    }

    #[test]
    fn test_code_path_is_api() {
        let store = Store::open_in_memory().unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        let file = listing(&["README.md", "src/handlers/loans.js"]);

        let analysis = analyze(store.conn(), Some(file.path())).unwrap();
        assert_eq!(analysis.kind, ChangeKind::Api);
    }

    #[test]
    fn test_no_listing_and_no_migrations_is_docs_only() {
        let store = Store::open_in_memory().unwrap();
        migrations::apply_pending(store.conn()).unwrap();

        let analysis = analyze(store.conn(), None).unwrap();
        assert_eq!(analysis.kind, ChangeKind::DocsOnly);
        assert!(analysis.changed_paths.is_empty());
    }

    #[test]
    fn test_missing_listing_file_is_tolerated() {
        let store = Store::open_in_memory().unwrap();
        migrations::apply_pending(store.conn()).unwrap();

        let analysis =
            analyze(store.conn(), Some(Path::new("/nonexistent/changes.txt"))).unwrap();
        assert_eq!(analysis.kind, ChangeKind::DocsOnly);
    }

    #[test]
    fn test_is_doc_path() {
        assert!(is_doc_path("README.md"));
        assert!(is_doc_path("docs/setup.rst"));
        assert!(is_doc_path("guides/docs/api.txt"));
        assert!(is_doc_path("LICENSE"));
        assert!(!is_doc_path("src/main.js"));
        assert!(!is_doc_path("migrations/0004_new.sql"));
    }
}
