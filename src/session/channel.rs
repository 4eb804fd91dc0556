// Copyright 2026 PM25 Link Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line-delimited command channel over an open stream.

use futures::FutureExt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bluetooth::BoxedStream;
use crate::config::SessionConfig;
use crate::error::{LinkError, Result};

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Resolves once the interrupt flag is raised.
pub(crate) async fn interrupted(flag: &mut watch::Receiver<bool>) {
    if flag.wait_for(|raised| *raised).await.is_err() {
        // Sender gone: nobody can interrupt us any more.
        std::future::pending::<()>().await;
    }
}

/// Writes `\r\n`-terminated commands and reads `\r\n`-terminated responses.
///
/// Reads are bounded by `max_line_len`. Bytes of a line that has not been
/// completed when a read times out stay buffered for the next read.
pub struct CommandChannel {
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: WriteHalf<BoxedStream>,
    pending: Vec<u8>,
    discarding: bool,
    interrupt: watch::Receiver<bool>,
    read_timeout: Duration,
    write_timeout: Duration,
    max_line_len: usize,
}

impl CommandChannel {
    /// Wrap an open stream.
    pub fn new(stream: BoxedStream, config: &SessionConfig, interrupt: watch::Receiver<bool>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::with_capacity(config.max_line_len),
            discarding: false,
            interrupt,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            max_line_len: config.max_line_len,
        }
    }

    /// Send one command line. `text` must not contain a line terminator.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        if text.contains(&['\r', '\n'][..]) {
            return Err(LinkError::InvalidCommand(text.to_string()));
        }

        let payload = format!("{}{}", text, LINE_TERMINATOR);
        let write_timeout = self.write_timeout;
        let mut interrupt = self.interrupt.clone();

        tokio::select! {
            biased;
            _ = interrupted(&mut interrupt) => Err(LinkError::Interrupted),
            result = tokio::time::timeout(write_timeout, self.write_payload(payload.as_bytes())) => {
                match result {
                    Ok(Ok(())) => {
                        debug!("Sent: {}", text);
                        Ok(())
                    }
                    Ok(Err(e)) => Err(LinkError::Io(e)),
                    Err(_) => {
                        warn!("Write of {:?} timed out", text);
                        Err(LinkError::Timeout {
                            operation: "write",
                            timeout_ms: write_timeout.as_millis() as u64,
                        })
                    }
                }
            }
        }
    }

    async fn write_payload(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(payload).await?;
        self.writer.flush().await
    }

    /// Read one response line with the terminator stripped.
    pub async fn read_line(&mut self) -> Result<String> {
        let read_timeout = self.read_timeout;
        let mut interrupt = self.interrupt.clone();

        tokio::select! {
            biased;
            _ = interrupted(&mut interrupt) => Err(LinkError::Interrupted),
            result = tokio::time::timeout(read_timeout, self.fill_line()) => {
                match result {
                    Ok(line) => line,
                    Err(_) => {
                        warn!("Read timed out after {}ms", read_timeout.as_millis());
                        Err(LinkError::Timeout {
                            operation: "read",
                            timeout_ms: read_timeout.as_millis() as u64,
                        })
                    }
                }
            }
        }
    }

    /// Accumulate bytes until a newline. Safe to cancel between polls.
    async fn fill_line(&mut self) -> Result<String> {
        let max = self.max_line_len;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Err(LinkError::Closed);
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    if !self.discarding {
                        self.pending.extend_from_slice(&available[..end]);
                    }
                    self.reader.consume(end + 1);

                    if self.discarding {
                        debug!("Skipped remainder of over-long line");
                        self.discarding = false;
                        self.pending.clear();
                        continue;
                    }

                    let line = std::mem::take(&mut self.pending);
                    return decode_line(line, max);
                }
                None => {
                    let len = available.len();
                    if !self.discarding {
                        self.pending.extend_from_slice(available);
                    }
                    self.reader.consume(len);
                }
            }

            // One extra byte for a '\r' whose '\n' has not arrived yet.
            if self.pending.len() > max + 1 {
                warn!("Response exceeds {} bytes, discarding line", max);
                self.pending.clear();
                self.discarding = true;
                return Err(LinkError::LineTooLong { max });
            }
        }
    }

    /// Drop input left over from earlier exchanges without waiting for more.
    ///
    /// A reply that arrives after its read timed out would otherwise be
    /// taken as the answer to the next command. Returns the bytes dropped.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = std::mem::take(&mut self.pending).len();
        self.discarding = false;

        loop {
            let len = match self.reader.fill_buf().now_or_never() {
                Some(Ok(available)) if !available.is_empty() => available.len(),
                _ => break,
            };
            self.reader.consume(len);
            discarded += len;
        }

        if discarded > 0 {
            warn!("Discarded {} bytes of stale input", discarded);
        }
        discarded
    }

    /// Flush and close output, then input, then the connection.
    ///
    /// Each step runs even if an earlier one failed; failures are only logged.
    pub async fn close(self) {
        let Self {
            reader,
            mut writer,
            write_timeout,
            ..
        } = self;

        match tokio::time::timeout(write_timeout, writer.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Flush on close failed: {}", e),
            Err(_) => warn!("Flush on close timed out"),
        }
        match tokio::time::timeout(write_timeout, writer.shutdown()).await {
            Ok(Ok(())) => debug!("Output closed"),
            Ok(Err(e)) => warn!("Closing output failed: {}", e),
            Err(_) => warn!("Closing output timed out"),
        }

        let reader = reader.into_inner();
        debug!("Input closed");

        drop(reader.unsplit(writer));
        debug!("Connection closed");
    }
}

fn decode_line(mut line: Vec<u8>, max: usize) -> Result<String> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.len() > max {
        return Err(LinkError::LineTooLong { max });
    }
    let text = String::from_utf8_lossy(&line).into_owned();
    debug!("Received: {}", text);
    Ok(text)
}
