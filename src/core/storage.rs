//! Durable-unit directory layout helpers.
//!
//! Modeled on the teacher's `core::storage::AppStorage`, but scoped to the
//! on-disk layout spec.md §6 describes: one directory per durable unit
//! (queue name, `topic/<name>/partition/<id>`) under whichever root the
//! owning engine was configured with.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Create (if missing) and return the directory for a single durable unit
/// under `root`. `unit` may contain `/` to express nested layout (stream
/// partitions use `topic/<name>/partition/<id>`).
pub async fn ensure_unit_dir(root: &Path, unit: &str) -> Result<PathBuf> {
    let path = root.join(unit);
    tokio::fs::create_dir_all(&path)
        .await
        .with_context(|| format!("failed to create durable-unit directory: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_nested_unit_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = ensure_unit_dir(tmp.path(), "topic/orders/partition/3")
            .await
            .unwrap();
        assert!(path.is_dir());
        assert!(path.ends_with("topic/orders/partition/3"));
    }
}
