//! Human-readable transfer log
//!
//! Every executed action writes a begin line when it starts and an end line
//! when it finishes, success or failure. Lines go to the observer, to
//! `tracing`, and optionally to an append-only log file.

use chrono::Local;
use ferrosync_types::{IoResultExt, PropagationObserver, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Transfer log for one propagation call
pub struct TransferLog<'a> {
    observer: &'a dyn PropagationObserver,
    file: Option<Mutex<File>>,
    sequence: AtomicU64,
    run_id: Uuid,
}

impl<'a> TransferLog<'a> {
    /// Open the log, appending to `log_file` if one is given
    pub fn open(
        observer: &'a dyn PropagationObserver,
        log_file: Option<&Path>,
        run_id: Uuid,
    ) -> Result<Self> {
        let file = match log_file {
            Some(path) => Some(Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .fatal(format!("opening log file {}", path.display()))?,
            )),
            None => None,
        };

        Ok(Self {
            observer,
            file,
            sequence: AtomicU64::new(0),
            run_id,
        })
    }

    /// Append one line to every sink
    pub fn line(&self, text: &str) {
        info!(run_id = %self.run_id, "{}", text);
        self.observer.log_line(text);

        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = writeln!(file, "{}", text) {
                warn!("Failed to write transfer log: {}", e);
            }
        }
    }

    /// Log the start of a call
    pub fn start_banner(&self) {
        self.line(&format!(
            "===== Propagation {} started at {} =====",
            self.run_id,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
    }

    /// Log the end of a call
    pub fn finish_banner(&self, summary: &str) {
        self.line(&format!(
            "===== Propagation {} finished at {}: {} =====",
            self.run_id,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            summary
        ));
    }

    /// Log the start of an action; returns its sequence number
    pub fn begin(&self, description: &str) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(sequence, "Action started");
        self.line(&format!("[BGN] {}", description));
        sequence
    }

    /// Log the end of the action started as `sequence`
    pub fn end(&self, sequence: u64, description: &str) {
        tracing::debug!(sequence, "Action finished");
        self.line(&format!("[END] {}", description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrosync_types::NoopObserver;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Lines(StdMutex<Vec<String>>);

    impl PropagationObserver for Lines {
        fn log_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_begin_end_lines() {
        let observer = Lines::default();
        let log = TransferLog::open(&observer, None, Uuid::new_v4()).unwrap();

        let first = log.begin("Copying a from /l to /r");
        let second = log.begin("Deleting b from /r");
        log.end(first, "Copying a");
        log.end(second, "Deleting b");

        assert!(second > first);
        let lines = observer.0.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                "[BGN] Copying a from /l to /r",
                "[BGN] Deleting b from /r",
                "[END] Copying a",
                "[END] Deleting b",
            ]
        );
    }

    #[test]
    fn test_log_file_is_appended() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("transfer.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let run_id = Uuid::new_v4();
        let observer = NoopObserver;
        let log = TransferLog::open(&observer, Some(&path), run_id).unwrap();
        log.start_banner();
        log.finish_banner("1 succeeded");
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "previous run");
        assert!(lines[1].contains(&run_id.to_string()));
        assert!(lines[2].ends_with("1 succeeded ====="));
    }

    #[test]
    fn test_unopenable_log_file_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let observer = NoopObserver;
        let result = TransferLog::open(
            &observer,
            Some(&temp_dir.path().join("missing/dir/transfer.log")),
            Uuid::new_v4(),
        );
        assert!(!result.err().unwrap().is_transient());
    }
}
