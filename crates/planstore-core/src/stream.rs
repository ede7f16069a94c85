//! Streaming sessions.
//!
//! A session emits a `connection_established` event first, then at most
//! one invocation result (or error), then a heartbeat on every tick until
//! the cancellation token fires or the consumer drops the stream. The
//! transport is responsible for framing and flushing each event.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::dispatch::{DispatchError, Dispatcher, ErrorBody};

/// Heartbeat period when none is configured.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// One event on a streaming connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ConnectionEstablished {
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    Result {
        request_id: String,
        function: String,
        result: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorBody,
    },
    Heartbeat {
        count: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Request envelope: `{"name": ..., "parameters": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// What the client asked for when opening the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Opening {
    /// Handshake and heartbeats only.
    Listen,
    Invoke(Invocation),
    /// The opening body could not be decoded; reported as an error event.
    Malformed(String),
}

impl Opening {
    /// Decode an opening request body. An empty body means [`Opening::Listen`].
    pub fn from_body(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Listen;
        }
        match serde_json::from_slice::<Invocation>(body) {
            Ok(call) => Self::Invoke(call),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }
}

/// Run one streaming session.
pub fn session(
    dispatcher: Arc<Dispatcher>,
    opening: Opening,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    stream! {
        let connection_id = Uuid::new_v4().to_string();
        info!(connection_id = %connection_id, "stream opened");
        yield StreamEvent::ConnectionEstablished {
            connection_id: connection_id.clone(),
            timestamp: Utc::now(),
        };

        match opening {
            Opening::Listen => {}
            Opening::Invoke(call) => {
                let request_id = Uuid::new_v4().to_string();
                let span = info_span!(
                    "stream_invoke",
                    request_id = %request_id,
                    connection_id = %connection_id
                );
                let outcome = dispatcher
                    .invoke(&call.name, call.parameters)
                    .instrument(span)
                    .await;
                yield match outcome {
                    Ok(result) => StreamEvent::Result {
                        request_id,
                        function: call.name,
                        result,
                    },
                    Err(e) => StreamEvent::Error {
                        request_id: Some(request_id),
                        error: e.body(),
                    },
                };
            }
            Opening::Malformed(reason) => {
                debug!(
                    connection_id = %connection_id,
                    reason = %reason,
                    "malformed opening request"
                );
                yield StreamEvent::Error {
                    request_id: None,
                    error: DispatchError::Decode(reason).body(),
                };
            }
        }

        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut count: u64 = 0;
        loop {
            let tick = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = ticker.tick() => true,
            };
            if !tick {
                break;
            }
            count += 1;
            yield StreamEvent::Heartbeat {
                count,
                timestamp: Utc::now(),
            };
        }
        info!(connection_id = %connection_id, heartbeats = count, "stream closed");
    }
}
