use std::path::Path;

use anyhow::{Context, Result};
use relay_orchestrator::InboundEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// Line-delimited JSON source of `InboundEvent`s.
pub struct InboundEventReader {
    lines: Lines<Box<dyn AsyncBufRead + Unpin + Send>>,
    line_number: usize,
    skipped: usize,
}

impl InboundEventReader {
    /// Opens `path`, or stdin when the path is `-`.
    pub async fn open(path: &Path) -> Result<Self> {
        let source: Box<dyn AsyncBufRead + Unpin + Send> = if path.as_os_str() == "-" {
            Box::new(BufReader::new(tokio::io::stdin()))
        } else {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open inbound events {}", path.display()))?;
            Box::new(BufReader::new(file))
        };
        Ok(Self::from_reader(source))
    }

    pub fn from_reader(source: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self {
            lines: source.lines(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Next well-formed event; blank lines are skipped silently and malformed
    /// ones with a warning. `None` at end of input.
    pub async fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("failed to read inbound events")?
        {
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundEvent>(trimmed) {
                Ok(event) => return Ok(Some(event)),
                Err(error) => {
                    self.skipped += 1;
                    tracing::warn!(line = self.line_number, %error, "skipping malformed inbound event");
                }
            }
        }
        Ok(None)
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
