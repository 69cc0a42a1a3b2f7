//! The stream sink handed to streaming handlers.
//!
//! A sink is two channels: values flow out (handler to the connection's
//! pumper task, which turns each one into a non-terminal response frame) and
//! interrupts flow in (the pumper telling the handler the peer cancelled,
//! the connection is going away, or a write failed). When the pumper exits
//! it drops its receiving end, so an in-progress [`StreamSink::send`] fails
//! fast instead of blocking on a stream nobody is draining.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::wire::Body;

/// Why the pumper stopped consuming the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInterrupt {
    /// The client cancelled this stream or the connection reached end of
    /// input. The handler should return promptly; returning an error after
    /// this overrides the cancellation in the terminal frame.
    Eof,
    /// A response write failed. The connection is likely gone.
    WriteError(String),
}

/// Error from [`StreamSink::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The stream was cancelled or the connection closed; the value was not
    /// sent. Check [`StreamSink::try_interrupt`] for the reason.
    Closed,
    /// The value could not be encoded.
    Encode(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "stream closed"),
            SinkError::Encode(e) => write!(f, "cannot encode stream value: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Handle through which a streaming handler emits values and observes
/// cancellation.
///
/// Values are delivered to the client in the order they are sent. The sink
/// is consumed with the handler: dropping it (by returning) tells the
/// framework the stream is complete.
pub struct StreamSink<R> {
    values: mpsc::Sender<Body>,
    interrupts: mpsc::Receiver<StreamInterrupt>,
    _marker: PhantomData<fn(R)>,
}

impl<R: Serialize> StreamSink<R> {
    pub(crate) fn new(
        values: mpsc::Sender<Body>,
        interrupts: mpsc::Receiver<StreamInterrupt>,
    ) -> Self {
        StreamSink {
            values,
            interrupts,
            _marker: PhantomData,
        }
    }

    /// Emit one value as a non-terminal response frame.
    pub async fn send(&mut self, value: R) -> Result<(), SinkError> {
        let body = serde_json::to_value(&value).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.values
            .send(body)
            .await
            .map_err(|_| SinkError::Closed)
    }

    /// Check for an interrupt without blocking.
    pub fn try_interrupt(&mut self) -> Option<StreamInterrupt> {
        self.interrupts.try_recv().ok()
    }

    /// Wait until the stream is interrupted. Useful for handlers that block
    /// on an external source between sends.
    pub async fn interrupted(&mut self) -> StreamInterrupt {
        self.interrupts.recv().await.unwrap_or(StreamInterrupt::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_encoded_values_in_order() {
        let (value_tx, mut value_rx) = mpsc::channel(8);
        let (_interrupt_tx, interrupt_rx) = mpsc::channel(1);
        let mut sink: StreamSink<u64> = StreamSink::new(value_tx, interrupt_rx);

        sink.send(1).await.unwrap();
        sink.send(2).await.unwrap();
        assert_eq!(value_rx.recv().await.unwrap(), serde_json::json!(1));
        assert_eq!(value_rx.recv().await.unwrap(), serde_json::json!(2));
    }

    #[tokio::test]
    async fn send_fails_fast_once_the_pumper_is_gone() {
        let (value_tx, value_rx) = mpsc::channel(8);
        let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
        let mut sink: StreamSink<u64> = StreamSink::new(value_tx, interrupt_rx);

        interrupt_tx
            .try_send(StreamInterrupt::Eof)
            .unwrap();
        drop(value_rx);

        assert_eq!(sink.send(1).await, Err(SinkError::Closed));
        assert_eq!(sink.try_interrupt(), Some(StreamInterrupt::Eof));
    }

    #[tokio::test]
    async fn interrupted_maps_a_closed_channel_to_eof() {
        let (value_tx, _value_rx) = mpsc::channel(8);
        let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
        let mut sink: StreamSink<u64> = StreamSink::new(value_tx, interrupt_rx);
        drop(interrupt_tx);
        assert_eq!(sink.interrupted().await, StreamInterrupt::Eof);
    }
}
