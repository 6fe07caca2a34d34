//! Append-only text log tool.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::{json, Map, Value};

use super::{str_arg, ParamKind, ParamSpec, Tool, ToolError};

pub const DEFAULT_LOG_FILE: &str = "research_output.txt";
const BLOCK_HEADER: &str = "--- Research Output ---";

/// Save research notes to a text file, one timestamped block per call.
pub struct SaveText {
    base_dir: PathBuf,
    /// One lock per target path with a writer in flight.
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl SaveText {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_path(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_table()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Drop our handle and forget the path once no other writer holds it.
    fn release(&self, path: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.lock_table();
        drop(lock);
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
    }
}

/// Format one log block.
pub fn format_block(data: &str, timestamp: &str) -> String {
    format!("{BLOCK_HEADER}\nTimestamp: {timestamp}\n\n{data}\n\n")
}

/// Append `contents` with a single write while holding an exclusive file lock.
fn append_locked(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    file.lock_exclusive()?;
    let written = file.write_all(contents.as_bytes()).and_then(|_| file.flush());
    let unlocked = FileExt::unlock(&file);
    written.and(unlocked)
}

#[async_trait]
impl Tool for SaveText {
    fn name(&self) -> &str {
        "save_text_to_file"
    }

    fn description(&self) -> &str {
        "Saves structured research data to a text file."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("data", ParamKind::String, "The text to save"),
            ParamSpec::optional(
                "filename",
                ParamKind::String,
                "Target file name",
                json!(DEFAULT_LOG_FILE),
            ),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let data = str_arg(args, "data")?;
        let filename = args
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();

        let path = self.resolve_path(&filename);
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let block = format_block(data, &timestamp);

        let lock = self.lock_for(&path);
        let written = {
            let _guard = lock.lock().await;
            let target = path.clone();
            tokio::task::spawn_blocking(move || append_locked(&target, &block)).await
        };
        self.release(&path, lock);
        written.map_err(|e| ToolError::Execution(format!("Write task failed: {}", e)))??;

        tracing::info!("Appended {} bytes of notes to {}", data.len(), path.display());
        Ok(format!("Data successfully saved to {}", filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: Value) -> Map<String, Value> {
        pairs.as_object().cloned().unwrap()
    }

    #[test]
    fn block_layout() {
        assert_eq!(
            format_block("hello", "2024-01-02 03:04:05"),
            "--- Research Output ---\nTimestamp: 2024-01-02 03:04:05\n\nhello\n\n"
        );
    }

    #[tokio::test]
    async fn appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SaveText::new(dir.path().to_path_buf());

        let first = tool
            .execute(&args(json!({"data": "one", "filename": "notes.txt"})))
            .await
            .unwrap();
        assert_eq!(first, "Data successfully saved to notes.txt");
        tool.execute(&args(json!({"data": "two", "filename": "notes.txt"})))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(contents.matches(BLOCK_HEADER).count(), 2);
        assert!(contents.find("one").unwrap() < contents.find("two").unwrap());
        assert!(contents.ends_with("two\n\n"));
        assert!(tool.lock_table().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_produce_intact_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(SaveText::new(dir.path().to_path_buf()));
        let n = 32;

        let tasks = (0..n).map(|i| {
            let tool = tool.clone();
            tokio::spawn(async move {
                let payload = format!("payload-{i}\n{}", "x".repeat(4096));
                tool.execute(&args(json!({"data": payload})))
                    .await
                    .unwrap();
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert!(tool.lock_table().is_empty());

        let contents = std::fs::read_to_string(dir.path().join(DEFAULT_LOG_FILE)).unwrap();
        let blocks: Vec<&str> = contents
            .split(BLOCK_HEADER)
            .filter(|b| !b.is_empty())
            .collect();
        assert_eq!(blocks.len(), n);

        let expected_tail = format!("\n{}\n\n", "x".repeat(4096));
        for block in blocks {
            let mut lines = block.trim_start_matches('\n').lines();
            assert!(lines.next().unwrap().starts_with("Timestamp: "));
            assert_eq!(lines.next(), Some(""));
            assert!(lines.next().unwrap().starts_with("payload-"));
            assert!(block.ends_with(&expected_tail));
        }
    }
}
