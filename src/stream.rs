//! WebSocket stream from the controller
//!
//! Each connection attempt is a spawned reader task that forwards decoded
//! JSON frames over an mpsc channel as [`StreamEvent`]s. Events carry the
//! generation number of the connection that produced them; the consumer
//! drops events from superseded generations, so a slow old reader can never
//! interleave stale fragments into the current session.
//!
//! The task ends on socket close, protocol error, or handle drop. It never
//! reconnects by itself; reconnect policy lives in the scheduler.

use crate::error::{Result, VoltbridgeError};
use crate::logging::get_logger;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Event emitted by a stream reader task
#[derive(Debug)]
pub enum StreamEvent {
    /// Handshake completed, frames will follow
    Connected { generation: u64 },
    /// One decoded JSON frame
    Message { generation: u64, payload: Value },
    /// The connection ended, cleanly or not
    Closed { generation: u64 },
}

impl StreamEvent {
    pub fn generation(&self) -> u64 {
        match self {
            StreamEvent::Connected { generation }
            | StreamEvent::Message { generation, .. }
            | StreamEvent::Closed { generation } => *generation,
        }
    }
}

/// Handle to a live (or dying) stream reader task
pub struct StreamHandle {
    generation: u64,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tear the connection down. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to the controller's stream endpoint and spawn a reader task.
///
/// Fails if the handshake does not complete within `connect_timeout`; the
/// returned handle's generation tags every event the task emits.
pub async fn connect(
    url: &str,
    generation: u64,
    connect_timeout: Duration,
    events: mpsc::Sender<StreamEvent>,
) -> Result<StreamHandle> {
    let logger = get_logger("stream");

    let (ws, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| {
            VoltbridgeError::timeout(format!(
                "Stream handshake did not complete within {}s",
                connect_timeout.as_secs()
            ))
        })?
        .map_err(|e| VoltbridgeError::transport(format!("Stream connect failed: {e}")))?;

    logger.info(&format!("Stream connected (generation {generation})"));

    if events
        .send(StreamEvent::Connected { generation })
        .await
        .is_err()
    {
        return Err(VoltbridgeError::transport("Stream consumer already gone"));
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(async move {
        let (_write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(payload) => {
                                    if events
                                        .send(StreamEvent::Message { generation, payload })
                                        .await
                                        .is_err()
                                    {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    logger.warn(&format!("Dropping undecodable frame: {e}"));
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            logger.info(&format!("Stream closed (generation {generation})"));
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            logger.warn(&format!("Stream error (generation {generation}): {e}"));
                            break;
                        }
                    }
                }
            }
        }

        let _ = events.send(StreamEvent::Closed { generation }).await;
    });

    Ok(StreamHandle {
        generation,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_generation() {
        let connected = StreamEvent::Connected { generation: 3 };
        let message = StreamEvent::Message {
            generation: 4,
            payload: serde_json::json!({}),
        };
        let closed = StreamEvent::Closed { generation: 5 };
        assert_eq!(connected.generation(), 3);
        assert_eq!(message.generation(), 4);
        assert_eq!(closed.generation(), 5);
    }

    #[tokio::test]
    async fn connect_times_out_against_unreachable_host() {
        let (tx, _rx) = mpsc::channel(8);
        // Non-routable address, handshake can never complete.
        let result = connect(
            "ws://10.255.255.1:7070/ws",
            1,
            Duration::from_millis(50),
            tx,
        )
        .await;
        assert!(result.is_err());
    }
}
