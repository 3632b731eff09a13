//! Indexing progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use policy_index_core::index::{IndexProgress, NoProgress};

/// Human-friendly progress: "index manifesto  1,234 / 5,000 records".
pub struct StderrProgress {
    dataset: String,
}

impl IndexProgress for StderrProgress {
    fn report(&self, done: u64, total: u64) {
        let line = format!(
            "index {}  {} / {} records\n",
            self.dataset,
            format_number(done),
            format_number(total)
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress {
    dataset: String,
}

impl IndexProgress for JsonProgress {
    fn report(&self, done: u64, total: u64) {
        let obj = serde_json::json!({
            "event": "progress",
            "dataset": self.dataset,
            "n": done,
            "total": total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self, dataset: &str) -> Box<dyn IndexProgress> {
        let dataset = dataset.to_string();
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress { dataset }),
            ProgressMode::Json => Box::new(JsonProgress { dataset }),
        }
    }
}
