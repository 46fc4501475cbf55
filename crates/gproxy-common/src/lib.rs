//! Small shared utilities used across the workspace: trace identifiers and
//! the atomic-file-write discipline that every persisted credential/mirror
//! file relies on.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A per-request identifier threaded through logs and downstream/upstream
/// contexts. Not a security token; purely for correlating log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(uuid::Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the current unix timestamp in whole seconds.
///
/// Centralized so call sites don't each reach for `SystemTime::now()`.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Writes `contents` to `path` by first writing a sibling temp file and
/// renaming it into place, so concurrent readers (or a crash mid-write)
/// never observe a partially-written file.
///
/// Every credential file and the system-prompt mirror file in this
/// workspace goes through this helper; see `gproxy-provider-impl`'s
/// OAuth persistence and `gproxy-core`'s system-prompt manager.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("gproxy"),
        uuid::Uuid::now_v7()
    );
    let tmp_path = dir.join(tmp_name);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = tempdir();
        let path = dir.join("creds.json");
        atomic_write(&path, b"{\"a\":1}").await.unwrap();
        atomic_write(&path, b"{\"a\":2}").await.unwrap();
        let read = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(read, "{\"a\":2}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("gproxy-common-test-{}", uuid::Uuid::now_v7()));
        dir
    }
}
