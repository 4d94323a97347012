//! Narration history and daily reporting.
//!
//! Stores one JSON record per narration in daily JSONL files,
//! `{dir}/{date}-narration.jsonl`.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, error};

const FILE_SUFFIX: &str = "-narration.jsonl";

/// Which pipeline produced the narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationPath {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationRecord {
    pub timestamp: String,
    pub title: String,
    pub path: NarrationPath,
    pub fragments: usize,
    pub input_chars: usize,
    pub voice: String,
    /// `completed`, `stopped`, `failed` or `fallback`.
    pub outcome: String,
    pub duration_ms: i64,
}

impl NarrationRecord {
    pub fn now(path: NarrationPath, title: impl Into<String>, input: &str) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            title: title.into(),
            path,
            fragments: 0,
            input_chars: input.chars().count(),
            voice: String::new(),
            outcome: String::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrationHistory {
    dir: PathBuf,
}

impl NarrationHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".story-narrator-history")
    }

    fn file_for(&self, date: &str) -> PathBuf {
        let date_str = if date == "today" {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };
        self.dir.join(format!("{date_str}{FILE_SUFFIX}"))
    }

    /// Append a record to today's file. Failures are logged, never raised.
    pub fn save_record(&self, record: &NarrationRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            error!("Failed to create history dir: {e}");
            return;
        }

        let path = self.file_for("today");
        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open history file: {e}");
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write history record: {e}");
                } else {
                    debug!("Saved narration record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to serialize record: {e}"),
        }
    }

    pub fn load_records(&self, date: &str) -> Vec<NarrationRecord> {
        let Ok(file) = fs::File::open(self.file_for(date)) else {
            return Vec::new();
        };

        std::io::BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(&line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed history line: {e}");
                    None
                }
            })
            .collect()
    }

    /// Dates with history, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().to_string();
                name.strip_suffix(FILE_SUFFIX).map(str::to_string)
            })
            .collect();

        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    /// Markdown report for `date` (`today` accepted).
    pub fn generate_report(&self, date: &str) -> String {
        let records = self.load_records(date);
        let display_date = if date == "today" {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };

        if records.is_empty() {
            return format!("# Narration Report - {display_date}\n\nNo narrations recorded.");
        }

        let total = records.len();
        let local = records.iter().filter(|r| r.path == NarrationPath::Local).count();
        let completed = records.iter().filter(|r| r.outcome == "completed").count();
        let total_fragments: usize = records.iter().map(|r| r.fragments).sum();
        let total_chars: usize = records.iter().map(|r| r.input_chars).sum();
        let avg_ms = records.iter().map(|r| r.duration_ms as f64).sum::<f64>() / total as f64;

        let mut lines = vec![
            format!("# Narration Report - {display_date}"),
            String::new(),
            "## Summary".to_string(),
            format!("- **Narrations**: {total} ({local} local, {} remote)", total - local),
            format!("- **Completed**: {completed}"),
            format!("- **Fragments**: {total_fragments}"),
            format!("- **Characters**: {total_chars}"),
            format!("- **Average duration**: {avg_ms:.0}ms"),
            String::new(),
            "## Log".to_string(),
            String::new(),
            "| Time | Title | Path | Fragments | Outcome |".to_string(),
            "|------|-------|------|-----------|---------|".to_string(),
        ];

        for r in &records {
            let time_str = r.timestamp.get(11..19).unwrap_or(&r.timestamp);
            let path = match r.path {
                NarrationPath::Local => "local",
                NarrationPath::Remote => "remote",
            };
            lines.push(format!(
                "| {time_str} | {} | {path} | {} | {} |",
                truncate(&r.title, 30),
                r.fragments,
                r.outcome
            ));
        }

        lines.join("\n")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: NarrationPath, outcome: &str) -> NarrationRecord {
        NarrationRecord {
            fragments: 3,
            voice: "hi".into(),
            outcome: outcome.into(),
            duration_ms: 1200,
            ..NarrationRecord::now(path, "चतुर लोमड़ी", "एक बार की बात है।")
        }
    }

    #[test]
    fn records_round_trip_through_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let history = NarrationHistory::new(dir.path());

        history.save_record(&record(NarrationPath::Local, "completed"));
        history.save_record(&record(NarrationPath::Remote, "failed"));

        let records = history.load_records("today");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "चतुर लोमड़ी");
        assert_eq!(records[0].input_chars, 17);
        assert_eq!(records[1].path, NarrationPath::Remote);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let history = NarrationHistory::new(dir.path());
        history.save_record(&record(NarrationPath::Local, "completed"));

        let path = history.file_for("today");
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(history.load_records("today").len(), 1);
    }

    #[test]
    fn dates_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for date in ["2026-01-02", "2026-03-01", "2025-12-31"] {
            fs::write(dir.path().join(format!("{date}{FILE_SUFFIX}")), "").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let history = NarrationHistory::new(dir.path());
        assert_eq!(
            history.list_dates(),
            vec!["2026-03-01", "2026-01-02", "2025-12-31"]
        );
    }

    #[test]
    fn report_summarizes_day() {
        let dir = tempfile::tempdir().unwrap();
        let history = NarrationHistory::new(dir.path());
        history.save_record(&record(NarrationPath::Local, "completed"));
        history.save_record(&record(NarrationPath::Remote, "completed"));
        history.save_record(&record(NarrationPath::Local, "stopped"));

        let report = history.generate_report("today");
        assert!(report.contains("**Narrations**: 3 (2 local, 1 remote)"));
        assert!(report.contains("**Completed**: 2"));
        assert!(report.contains("**Fragments**: 9"));
        assert!(report.contains("| stopped |"));
    }

    #[test]
    fn empty_day_report() {
        let dir = tempfile::tempdir().unwrap();
        let history = NarrationHistory::new(dir.path());
        let report = history.generate_report("2020-01-01");
        assert!(report.contains("No narrations recorded."));
    }
}
