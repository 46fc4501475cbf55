//! spec's `log-prompts` setting: besides the always-on `tracing` dispatch
//! line (a truncated preview), `console` and `file` modes dump the full
//! last-user-turn text — `file` into one dated log file per process
//! lifetime, appended to under a lock so concurrent requests don't
//! interleave lines.

use std::path::PathBuf;

use gproxy_transform::{canonical_last_user_text, CanonicalRequest};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::LogPromptsMode;

pub struct PromptLogger {
    mode: LogPromptsMode,
    file_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl PromptLogger {
    /// `base_name` becomes `<base_name>-YYYYMMDD-hhmmss.log`, timestamped
    /// once at construction so every request within this process appends
    /// to the same file.
    pub fn new(mode: LogPromptsMode, base_name: Option<String>) -> Self {
        let file_path = match mode {
            LogPromptsMode::File => {
                let base = base_name.unwrap_or_else(|| "gproxy-prompts".to_string());
                Some(PathBuf::from(format!("{base}-{}.log", timestamp_suffix())))
            }
            LogPromptsMode::None | LogPromptsMode::Console => None,
        };
        Self { mode, file_path, write_lock: Mutex::new(()) }
    }

    pub async fn log(&self, request: &CanonicalRequest) {
        match self.mode {
            LogPromptsMode::None => {}
            LogPromptsMode::Console => {
                tracing::info!(
                    target: "gproxy::prompts",
                    model = %request.model,
                    prompt = %canonical_last_user_text(request),
                    "prompt"
                );
            }
            LogPromptsMode::File => self.append_to_file(request).await,
        }
    }

    async fn append_to_file(&self, request: &CanonicalRequest) {
        let Some(path) = &self.file_path else { return };
        let line = format!(
            "[{}] model={} prompt={}\n",
            timestamp_suffix(),
            request.model,
            canonical_last_user_text(request).replace('\n', "\\n")
        );

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to create prompt log directory");
                return;
            }
        }
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await;
        match file {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()).await {
                    tracing::warn!(path = %path.display(), error = %err, "failed to append prompt log");
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to open prompt log file");
            }
        }
    }
}

fn timestamp_suffix() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_transform::{CanonicalPart, CanonicalRole, CanonicalTurn};

    fn request_with_text(model: &str, text: &str) -> CanonicalRequest {
        CanonicalRequest {
            model: model.to_string(),
            turns: vec![CanonicalTurn { role: CanonicalRole::User, parts: vec![CanonicalPart::Text(text.to_string())] }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn none_mode_never_creates_a_file() {
        let logger = PromptLogger::new(LogPromptsMode::None, None);
        logger.log(&request_with_text("gpt-4o", "hi")).await;
        assert!(logger.file_path.is_none());
    }

    #[tokio::test]
    async fn file_mode_appends_each_logged_prompt() {
        let dir = std::env::temp_dir().join(format!("gproxy-prompt-log-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let base = dir.join("session").to_string_lossy().into_owned();

        let logger = PromptLogger::new(LogPromptsMode::File, Some(base));
        logger.log(&request_with_text("gpt-4o", "first")).await;
        logger.log(&request_with_text("gpt-4o", "second")).await;

        let path = logger.file_path.clone().unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
