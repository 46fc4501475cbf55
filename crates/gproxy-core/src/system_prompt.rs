//! §4.5: inject a configured system prompt into outbound requests, and
//! best-effort mirror the caller-supplied system text back to disk.

use std::path::PathBuf;

use gproxy_common::atomic_write;
use gproxy_transform::CanonicalRequest;
use tokio::sync::Mutex;

use crate::config::SystemPromptMode;

pub struct SystemPromptManager {
    file: Option<PathBuf>,
    mode: SystemPromptMode,
    mirror_file: Option<PathBuf>,
    mirror_lock: Mutex<()>,
}

impl SystemPromptManager {
    pub fn new(file: Option<PathBuf>, mode: SystemPromptMode, mirror_file: Option<PathBuf>) -> Self {
        Self {
            file,
            mode,
            mirror_file,
            mirror_lock: Mutex::new(()),
        }
    }

    /// Overwrites or appends the configured system-prompt file's contents
    /// onto `request.system`, applied after family normalization so the
    /// caller's request shape is already settled.
    pub async fn apply(&self, request: &mut CanonicalRequest) {
        let Some(path) = &self.file else { return };
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) if !contents.trim().is_empty() => contents,
            Ok(_) => return,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read system prompt file");
                return;
            }
        };

        request.system = Some(match (&self.mode, request.system.take()) {
            (SystemPromptMode::Overwrite, _) => contents,
            (SystemPromptMode::Append, Some(existing)) if !existing.is_empty() => {
                format!("{existing}\n{contents}")
            }
            (SystemPromptMode::Append, _) => contents,
        });
    }

    /// Best-effort: if the request's system text differs from what's on
    /// disk, atomically rewrite the mirror file (or clear it). I/O errors
    /// are logged, never surfaced to the caller.
    pub async fn mirror(&self, request: &CanonicalRequest) {
        let Some(path) = &self.mirror_file else { return };
        let _guard = self.mirror_lock.lock().await;

        let new_text = request.system.clone().unwrap_or_default();
        let current = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if current == new_text {
            return;
        }
        if let Err(err) = atomic_write(path, new_text.as_bytes()).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to mirror system prompt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_transform::CanonicalRequest;

    #[tokio::test]
    async fn overwrite_mode_replaces_existing_system_text() {
        let dir = tempdir();
        let path = dir.join("prompt.txt");
        tokio::fs::write(&path, "You are Neko.").await.unwrap();

        let manager = SystemPromptManager::new(Some(path), SystemPromptMode::Overwrite, None);
        let mut request = CanonicalRequest { system: Some("old".to_string()), ..Default::default() };
        manager.apply(&mut request).await;
        assert_eq!(request.system.as_deref(), Some("You are Neko."));
    }

    #[tokio::test]
    async fn append_mode_keeps_existing_text() {
        let dir = tempdir();
        let path = dir.join("prompt.txt");
        tokio::fs::write(&path, "addendum").await.unwrap();

        let manager = SystemPromptManager::new(Some(path), SystemPromptMode::Append, None);
        let mut request = CanonicalRequest { system: Some("base".to_string()), ..Default::default() };
        manager.apply(&mut request).await;
        assert_eq!(request.system.as_deref(), Some("base\naddendum"));
    }

    #[tokio::test]
    async fn mirror_writes_new_system_text() {
        let dir = tempdir();
        let path = dir.join("mirror.txt");
        let manager = SystemPromptManager::new(None, SystemPromptMode::Overwrite, Some(path.clone()));
        let request = CanonicalRequest { system: Some("hi".to_string()), ..Default::default() };
        manager.mirror(&request).await;
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hi");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gproxy-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
