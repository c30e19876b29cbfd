//! DAP server loop
//!
//! Reads one request, runs its handler to completion, writes the response and
//! its events, then reads the next. Nothing runs concurrently with a handler.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::common::Result;
use crate::dap::{
    codec, EventMessage, OutputEventBody, ProtocolMessage, RequestMessage, ResponseMessage,
};

use super::capture;
use super::handler::Adapter;

/// One client connection
pub struct Server<R, W> {
    reader: R,
    writer: W,
    /// Shared by responses and events, starts at 1
    seq: AtomicI64,
    adapter: Adapter,
}

impl<R, W> Server<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, adapter: Adapter) -> Self {
        Self {
            reader,
            writer,
            seq: AtomicI64::new(1),
            adapter,
        }
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Serve until the client disconnects or the stream ends
    pub async fn run(mut self) -> Result<()> {
        loop {
            let body = match codec::read_message(&mut self.reader).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    tracing::info!("Client closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::error!("Stopping: {}", e);
                    break;
                }
            };

            let request = match serde_json::from_str::<ProtocolMessage>(&body) {
                Ok(ProtocolMessage::Request(request)) => request,
                Ok(_) => {
                    tracing::warn!("Ignoring non-request message");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed message: {}", e);
                    continue;
                }
            };

            if self.dispatch(&request).await? {
                break;
            }
        }
        Ok(())
    }

    /// Handle one request; true when the session should end
    async fn dispatch(&mut self, request: &RequestMessage) -> Result<bool> {
        tracing::debug!(seq = request.seq, "<- {}", request.command);
        let result = self.adapter.handle(request).await;

        if let Some(output) = self.adapter.take_output() {
            let body = OutputEventBody {
                output,
                category: capture::CATEGORY.to_string(),
            };
            self.send_event("output", serde_json::to_value(body)?).await?;
        }

        match result {
            Ok(reply) => {
                self.send_response(request, true, reply.body, None).await?;
                for event in reply.events {
                    self.send_event(&event.event, event.body).await?;
                }
                Ok(reply.terminate)
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", request.command, e);
                self.send_response(request, false, None, Some(e.to_string()))
                    .await?;
                Ok(false)
            }
        }
    }

    pub async fn send_event(&mut self, event: &str, body: Value) -> Result<()> {
        let message = ProtocolMessage::Event(EventMessage {
            seq: self.next_seq(),
            event: event.to_string(),
            body,
        });
        tracing::debug!("-> event {}", event);
        self.send(&message).await
    }

    /// `message` is only attached to failures
    pub async fn send_response(
        &mut self,
        request: &RequestMessage,
        success: bool,
        body: Option<Value>,
        message: Option<String>,
    ) -> Result<()> {
        let message = ProtocolMessage::Response(ResponseMessage {
            seq: self.next_seq(),
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message: message.filter(|_| !success),
            body,
        });
        self.send(&message).await
    }

    async fn send(&mut self, message: &ProtocolMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        codec::write_message(&mut self.writer, &json).await
    }
}
