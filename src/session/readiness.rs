use super::types::ReadinessScore;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

/// Source of readiness samples, one per poll tick
#[async_trait]
pub trait ReadinessSource: Send {
    /// Next sample, or `None` once the feed is exhausted
    async fn next_score(&mut self) -> Result<Option<ReadinessScore>>;
}

/// Newline-delimited JSON feed: `{"framing":..,"lighting":..,"motion":..}` per line
pub struct JsonLinesReadiness<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesReadiness<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ReadinessSource for JsonLinesReadiness<R> {
    async fn next_score(&mut self) -> Result<Option<ReadinessScore>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let score: ReadinessScore =
                serde_json::from_str(line).map_err(|e| SessionError::InvalidReadiness {
                    details: format!("line {}: {}", self.line_number, e),
                })?;
            score.validate()?;
            return Ok(Some(score));
        }

        debug!("Readiness feed exhausted after {} lines", self.line_number);
        Ok(None)
    }
}

/// In-memory queue of samples
pub struct ScriptedReadiness {
    scores: VecDeque<ReadinessScore>,
    repeat_last: bool,
    last: Option<ReadinessScore>,
}

impl ScriptedReadiness {
    pub fn new<I: IntoIterator<Item = ReadinessScore>>(scores: I) -> Self {
        Self {
            scores: scores.into_iter().collect(),
            repeat_last: false,
            last: None,
        }
    }

    /// Keep yielding the final sample once the queue drains
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }
}

#[async_trait]
impl ReadinessSource for ScriptedReadiness {
    async fn next_score(&mut self) -> Result<Option<ReadinessScore>> {
        match self.scores.pop_front() {
            Some(score) => {
                self.last = Some(score);
                Ok(Some(score))
            }
            None if self.repeat_last => Ok(self.last),
            None => Ok(None),
        }
    }
}
