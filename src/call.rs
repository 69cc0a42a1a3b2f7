//! Per-call execution: invoke the target method and write response frames.
//!
//! The dispatcher hands every accepted request to one of the two paths here
//! on its own task. The unary path writes exactly one terminal frame. The
//! streaming path spawns a pumper that turns sink values into non-terminal
//! frames until the handler finishes, the peer cancels, or a write fails,
//! then writes the terminal frame. Both paths raise *done* exactly once, and
//! exactly one terminal frame precedes each *done*.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::codec::ErasedWrite;
use crate::error::HandlerError;
use crate::pool::FreeList;
use crate::stream::{StreamInterrupt, StreamSink};
use crate::wire::{Body, RequestHeader, ResponseHeader, EOS};

/// Writes response frames for one connection: the shared codec writer, the
/// send lock serializing frame writes, and the response header free list.
#[derive(Clone)]
pub(crate) struct ResponseSender {
    codec: Arc<dyn ErasedWrite>,
    sending: Arc<Mutex<()>>,
    resp_pool: Arc<FreeList<ResponseHeader>>,
}

impl ResponseSender {
    pub(crate) fn new(
        codec: Arc<dyn ErasedWrite>,
        resp_pool: Arc<FreeList<ResponseHeader>>,
    ) -> Self {
        ResponseSender {
            codec,
            sending: Arc::new(Mutex::new(())),
            resp_pool,
        }
    }

    /// Write one response frame under the send lock. A non-empty `errmsg`
    /// replaces the body with a placeholder the client must not decode.
    pub(crate) async fn send(
        &self,
        service_method: &str,
        seq: u64,
        body: &Body,
        errmsg: &str,
        last: bool,
    ) -> std::io::Result<()> {
        let mut resp = self.resp_pool.get();
        resp.service_method.push_str(service_method);
        resp.seq = seq;
        let placeholder = Body::Null;
        let body = if errmsg.is_empty() {
            body
        } else {
            resp.error.push_str(errmsg);
            &placeholder
        };
        let result = {
            let _sending = self.sending.lock().await;
            self.codec.write_response(&resp, body, last).await
        };
        self.resp_pool.put(resp);
        result
    }
}

/// Everything an executor needs for one request.
pub(crate) struct ServiceCall<C> {
    pub(crate) req: RequestHeader,
    pub(crate) arg: Body,
    pub(crate) sender: ResponseSender,
    pub(crate) context: C,
    /// Closed when the connection's read loop exits.
    pub(crate) eof: CancellationToken,
    /// Cancelled when the client sends `CloseStream` for this seq.
    pub(crate) stop: CancellationToken,
    /// Raised when the executor is fully done.
    pub(crate) done: oneshot::Sender<()>,
    pub(crate) req_pool: Arc<FreeList<RequestHeader>>,
}

/// Decode the erased body into the handler's argument type. An absent body
/// yields the type's zero value.
fn decode_arg<A>(body: Body) -> Result<A, serde_json::Error>
where
    A: DeserializeOwned + Default,
{
    if body.is_null() {
        Ok(A::default())
    } else {
        serde_json::from_value(body)
    }
}

/// Write the terminal frame, return the request header to its free list,
/// and raise *done*.
async fn finish(
    sender: &ResponseSender,
    req: RequestHeader,
    body: &Body,
    errmsg: &str,
    req_pool: &FreeList<RequestHeader>,
    done: oneshot::Sender<()>,
) {
    if let Err(e) = sender
        .send(&req.service_method, req.seq, body, errmsg, true)
        .await
    {
        warn!(seq = req.seq, error = %e, "failed to write response");
    }
    req_pool.put(req);
    let _ = done.send(());
}

/// Unary path: invoke the handler and write its reply (or error) as the one
/// terminal frame. Unary handlers cannot be cancelled; they run to
/// completion and their response is still written.
pub(crate) async fn unary<S, C, A, R, Fut, F>(rcvr: Arc<S>, f: Arc<F>, call: ServiceCall<C>)
where
    S: Send + Sync + 'static,
    C: Send + 'static,
    A: DeserializeOwned + Default + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    F: Fn(Arc<S>, C, A) -> Fut + Send + Sync + 'static,
{
    let ServiceCall {
        req,
        arg,
        sender,
        context,
        done,
        req_pool,
        ..
    } = call;

    let arg: A = match decode_arg(arg) {
        Ok(arg) => arg,
        Err(e) => {
            let errmsg = format!("cannot decode request body: {e}");
            finish(&sender, req, &Body::Null, &errmsg, &req_pool, done).await;
            return;
        }
    };

    let (body, errmsg) = match (*f)(rcvr, context, arg).await {
        Ok(reply) => match serde_json::to_value(&reply) {
            Ok(body) => (body, String::new()),
            Err(e) => (Body::Null, format!("cannot encode reply: {e}")),
        },
        Err(e) => (Body::Null, e.to_string()),
    };
    finish(&sender, req, &body, &errmsg, &req_pool, done).await;
}

/// Streaming path: pump sink values to the wire while the handler runs, then
/// write the terminal frame. Terminal error precedence: the handler's error,
/// else a captured write error, else the end-of-stream sentinel.
pub(crate) async fn streaming<S, C, A, R, Fut, F>(rcvr: Arc<S>, f: Arc<F>, call: ServiceCall<C>)
where
    S: Send + Sync + 'static,
    C: Send + 'static,
    A: DeserializeOwned + Default + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    F: Fn(Arc<S>, C, A, StreamSink<R>) -> Fut + Send + Sync + 'static,
{
    let ServiceCall {
        req,
        arg,
        sender,
        context,
        eof,
        stop,
        done,
        req_pool,
    } = call;

    let arg: A = match decode_arg(arg) {
        Ok(arg) => arg,
        Err(e) => {
            let errmsg = format!("cannot decode request body: {e}");
            finish(&sender, req, &Body::Null, &errmsg, &req_pool, done).await;
            return;
        }
    };

    let (value_tx, mut value_rx) = mpsc::channel(crate::SINK_BUFFER);
    let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
    let sink = StreamSink::new(value_tx, interrupt_rx);

    // One pumper per streaming call. It exits when the handler drops the
    // sink, on cancellation, or on the first write failure; either way it
    // drops value_rx so pending sends in the handler fail fast.
    let pumper = tokio::spawn({
        let sender = sender.clone();
        let service_method = req.service_method.clone();
        let seq = req.seq;
        async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        let _ = interrupt_tx.try_send(StreamInterrupt::Eof);
                        return None;
                    }
                    _ = eof.cancelled() => {
                        let _ = interrupt_tx.try_send(StreamInterrupt::Eof);
                        return None;
                    }
                    value = value_rx.recv() => match value {
                        Some(body) => {
                            if let Err(e) = sender
                                .send(&service_method, seq, &body, "", false)
                                .await
                            {
                                let msg = e.to_string();
                                let _ = interrupt_tx
                                    .try_send(StreamInterrupt::WriteError(msg.clone()));
                                return Some(msg);
                            }
                        }
                        None => return None,
                    },
                }
            }
        }
    });

    let handler_result = (*f)(rcvr, context, arg, sink).await;
    let write_error = pumper.await.unwrap_or(None);

    let errmsg = match handler_result {
        Err(e) => e.to_string(),
        Ok(()) => write_error.unwrap_or_else(|| EOS.to_string()),
    };
    finish(&sender, req, &Body::Null, &errmsg, &req_pool, done).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_body_decodes_to_zero_value() {
        #[derive(serde::Deserialize, Default, PartialEq, Debug)]
        struct Args {
            a: i64,
            b: i64,
        }
        let args: Args = decode_arg(Body::Null).unwrap();
        assert_eq!(args, Args::default());

        let args: Args = decode_arg(json!({"a": 7, "b": 8})).unwrap();
        assert_eq!(args, Args { a: 7, b: 8 });
    }

    #[test]
    fn mismatched_body_is_a_decode_error() {
        let result: Result<u64, _> = decode_arg(json!("not a number"));
        assert!(result.is_err());
    }
}
