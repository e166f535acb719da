//! Newline-delimited JSON dispatch front.
//!
//! Each input line is one message, each produces one response line. Lines are
//! processed concurrently, so responses come back in completion order and carry
//! the line number they answer.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use super::{InboundMessage, Response, Summary};
use crate::core::EventProcessor;
use crate::domain::Outcome;

/// Feeds JSONL messages through an [`EventProcessor`]
pub struct LineDispatcher {
    processor: EventProcessor,
    assign_missing_ids: bool,
    parallelism: usize,
}

impl LineDispatcher {
    /// Dispatch with as many lines in progress as the processor can hold
    /// without turning any away
    pub fn new(processor: EventProcessor) -> Self {
        let config = processor.config();
        let parallelism = config.max_in_flight.saturating_add(config.max_queued).max(1);

        Self {
            processor,
            assign_missing_ids: false,
            parallelism,
        }
    }

    /// Give messages without an id a fresh one instead of rejecting them
    pub fn assign_missing_ids(mut self, assign: bool) -> Self {
        self.assign_missing_ids = assign;
        self
    }

    /// Cap on lines dispatched but not yet answered
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    /// Read messages until EOF, writing one response per non-empty line.
    ///
    /// If writing a response fails, reading stops and the write error is
    /// returned. Lines already dispatched still run to completion.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<Summary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::channel::<Response>(self.parallelism);
        let limit = Arc::new(Semaphore::new(self.parallelism));

        let read = async move {
            let mut lines = reader.lines();
            let mut line_no = 0usize;

            while let Some(line) = lines.next_line().await.context("Failed to read input")? {
                line_no += 1;
                if tx.is_closed() {
                    warn!(line = line_no, "Response output closed, no longer reading input");
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }

                let message: InboundMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(line = line_no, error = %e, "Unparseable message");
                        let response = Response::new(line_no, None, Outcome::RejectedInvalid);
                        if tx.send(response).await.is_err() {
                            warn!(line = line_no, "Response output closed, no longer reading input");
                            break;
                        }
                        continue;
                    }
                };

                let permit = Arc::clone(&limit)
                    .acquire_owned()
                    .await
                    .context("Dispatch limiter closed")?;
                let event = message.into_event(self.assign_missing_ids);
                let id = (!event.id().is_blank()).then(|| event.id().to_string());
                let processor = self.processor.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let outcome = processor.process(event).await;
                    drop(permit);
                    if tx.send(Response::new(line_no, id, outcome)).await.is_err() {
                        debug!(line = line_no, %outcome, "Response dropped, output closed");
                    }
                });
            }

            debug!(lines = line_no, "Input exhausted");
            Ok::<(), anyhow::Error>(())
        };

        // Owns the receiver so a failed write closes the channel
        let write = async move {
            let mut summary = Summary::default();
            while let Some(response) = rx.recv().await {
                summary.add(response.outcome);
                let json = serde_json::to_string(&response).context("Failed to serialize response")?;
                writer
                    .write_all(format!("{}\n", json).as_bytes())
                    .await
                    .context("Failed to write response")?;
            }
            writer.flush().await.context("Failed to flush responses")?;
            Ok::<Summary, anyhow::Error>(summary)
        };

        let (read_result, summary) = tokio::join!(read, write);
        read_result?;
        summary
    }
}
