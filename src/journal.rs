//! Append-only trade journal (daily JSONL files).
//!
//! One line per fill: the signal that triggered it plus the execution
//! result, flushed per write. Journal I/O failures are logged and
//! swallowed — trading never halts on a journaling error.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::json;
use tracing::error;

use crate::types::{ExecutionResult, TradeSignal};
use crate::util::now_ts;

pub struct TradeLogger {
    data_dir: PathBuf,
}

impl TradeLogger {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            error!("🧾 Failed to create journal directory {}: {e}", data_dir.display());
        }
        Self { data_dir }
    }

    fn daily_filepath(&self) -> PathBuf {
        self.data_dir
            .join(format!("trades_{}.jsonl", Local::now().format("%Y-%m-%d")))
    }

    /// Append one record. Errors are logged, never propagated.
    pub fn log_execution(&self, signal: &TradeSignal, result: &ExecutionResult) {
        let record = json!({
            "logged_at": now_ts(),
            "signal": signal,
            "result": result,
        });
        let path = self.daily_filepath();
        if let Err(e) = Self::append_line(&path, &record.to_string()) {
            error!("🧾 Failed to persist trade to {}: {e}", path.display());
        }
    }

    fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, Side};

    fn signal() -> TradeSignal {
        TradeSignal::new("tok", Side::Buy, 100.0, "dip below 0.3")
    }

    fn result(n: u32) -> ExecutionResult {
        ExecutionResult {
            order_id: format!("dry_run_{n:08x}"),
            status: OrderStatus::Filled,
            filled_price: 0.5,
            filled_size: 200.0,
            fees_paid: 0.0,
            executed_at: now_ts(),
            error_message: None,
        }
    }

    #[test]
    fn test_one_parseable_line_per_fill() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TradeLogger::new(dir.path());

        for n in 0..3 {
            logger.log_execution(&signal(), &result(n));
        }

        let file = dir
            .path()
            .join(format!("trades_{}.jsonl", Local::now().format("%Y-%m-%d")));
        let content = std::fs::read_to_string(file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["logged_at"].as_f64().is_some());
            assert_eq!(v["signal"]["token_id"], "tok");
            assert_eq!(v["signal"]["side"], "BUY");
            assert_eq!(v["result"]["status"], "FILLED");
            assert!(v["result"]["order_id"].as_str().unwrap().starts_with("dry_run_"));
        }
    }

    #[test]
    fn test_unwritable_directory_does_not_panic() {
        // Journal points at a path that cannot exist as a directory.
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("occupied");
        std::fs::write(&file_path, b"plain file").unwrap();

        let logger = TradeLogger::new(file_path.join("nested"));
        // Swallowed: no panic, no Err surface.
        logger.log_execution(&signal(), &result(0));
    }
}
