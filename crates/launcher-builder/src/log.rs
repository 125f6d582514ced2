//! Per-build log sink.
//!
//! Every stage receives `&mut BuildLog` and appends human-readable lines.
//! The pipeline persists the accumulated lines into the build record once,
//! when the run reaches a terminal state.

use uuid::Uuid;

/// Cap on a single subprocess output block copied into the log.
const MAX_OUTPUT_LINES: usize = 200;

#[derive(Debug, Clone)]
pub struct BuildLog {
    build_id: Uuid,
    lines: Vec<String>,
}

impl BuildLog {
    pub fn new(build_id: Uuid) -> Self {
        Self {
            build_id,
            lines: Vec::new(),
        }
    }

    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    /// Append one line; also mirrored to tracing at debug level.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(build_id = %self.build_id, "{line}");
        self.lines.push(line);
    }

    /// Append a warning line, prefixed so it stands out in the UI.
    pub fn warn(&mut self, line: impl AsRef<str>) {
        let line = format!("WARNING: {}", line.as_ref());
        tracing::warn!(build_id = %self.build_id, "{line}");
        self.lines.push(line);
    }

    /// Append subprocess output, one log line per output line. Long output
    /// keeps only its tail.
    pub fn push_output(&mut self, label: &str, output: &str) {
        let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return;
        }
        let skipped = lines.len().saturating_sub(MAX_OUTPUT_LINES);
        if skipped > 0 {
            self.lines
                .push(format!("[{label}] ... {skipped} earlier lines omitted"));
        }
        for line in &lines[skipped..] {
            self.lines.push(format!("[{label}] {line}"));
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}
