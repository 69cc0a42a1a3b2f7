//! Expose in-memory objects as remotely callable services over any
//! bidirectional byte stream.
//!
//! A [`Server`] holds a registry of named services. A client sends a
//! sequence of requests identifying a `Service.Method`; for each request
//! the server decodes an argument value, dispatches to the registered
//! handler, and writes back either a single reply or a finite sequence of
//! streamed replies. Many requests can be in flight on one connection:
//! headers are read in wire order by a single reader task, handlers run
//! concurrently on their own tasks, and response writes are serialized so
//! frames never interleave.
//!
//! Receivers declare their callable surface by implementing [`Service`]:
//! each method is unary (one terminal reply) or streaming (zero or more
//! replies through a [`StreamSink`], then a terminal frame carrying the
//! [`EOS`] sentinel or the handler's error), optionally taking a
//! per-connection context value first. A client cancels a streaming call by
//! sending the reserved [`CLOSE_STREAM`] method with the call's `seq`; the
//! handler observes the cancellation through its sink and is expected to
//! return promptly.
//!
//! The wire encoding is pluggable through [`ServerCodec`]; the default
//! [`JsonFramed`] codec writes length-prefixed self-describing frames over
//! a buffered stream.
//!
//! # Example
//!
//! ```no_run
//! use serde::Deserialize;
//! use wander::{HandlerError, MethodTable, Server, Service};
//!
//! #[derive(Deserialize, Default)]
//! struct Args {
//!     a: i64,
//!     b: i64,
//! }
//!
//! struct Arith;
//!
//! impl Service for Arith {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.unary("Multiply", |_arith, args: Args| async move { Ok(args.a * args.b) });
//!         table.unary("Divide", |_arith, args: Args| async move {
//!             if args.b == 0 {
//!                 return Err(HandlerError::from("divide by zero"));
//!             }
//!             Ok(args.a / args.b)
//!         });
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new();
//!     server.register(Arith)?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4321").await?;
//!     server.accept(listener).await?;
//!     Ok(())
//! }
//! ```

mod call;
mod codec;
mod error;
mod observe;
mod pool;
mod registry;
mod server;
mod stream;
mod wire;

pub use codec::{JsonFramed, ServerCodec, MAX_FRAME_LEN};
pub use error::{CodecError, HandlerError, RegisterError};
pub use observe::{RequestLogEntry, RequestLogger};
pub use registry::{MethodTable, Service};
pub use server::{default_server, Server};
pub use stream::{SinkError, StreamInterrupt, StreamSink};
pub use wire::{Body, RequestHeader, ResponseHeader, CLOSE_STREAM, EOS};

/// Buffered capacity of a streaming call's value channel.
pub(crate) const SINK_BUFFER: usize = 16;
