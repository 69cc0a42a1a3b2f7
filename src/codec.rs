//! Codec contract and the default length-prefixed JSON codec.
//!
//! A codec owns one byte stream and exposes four operations: read a request
//! header, read a request body, write a response (header plus body plus an
//! advisory *last* flag), and close. The dispatcher calls the two reads in
//! strict alternation from a single reader task and serializes writes under
//! the connection send lock, but codecs must stay memory-safe under one
//! concurrent reader and writer, so both halves sit behind their own lock.
//!
//! [`JsonFramed`] is the default: every header and body becomes one
//! `[u32 LE length][JSON bytes]` frame over a buffered stream, flushed at
//! each response frame boundary. A zero-length body frame decodes to
//! [`Body::Null`].

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;

use crate::error::CodecError;
use crate::wire::{Body, RequestHeader, ResponseHeader};

/// Upper bound on a single frame. A length prefix past this is treated as a
/// corrupt stream rather than an allocation request.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Server-side wire protocol: decodes request frames and encodes response
/// frames on one bidirectional stream.
///
/// Reads are serialized among themselves (a single reader task calls
/// `read_request_header` and `read_request_body` in strict alternation) and
/// writes are serialized among themselves (the connection send lock), but a
/// read and a write may be in flight at the same time.
pub trait ServerCodec: Send + Sync + 'static {
    /// Decode the next request header into `req`.
    fn read_request_header(
        &self,
        req: &mut RequestHeader,
    ) -> impl Future<Output = Result<(), CodecError>> + Send;

    /// Decode the request body that follows a header. With `discard` set the
    /// bytes are consumed without decoding, for requests that cannot be
    /// routed.
    fn read_request_body(
        &self,
        discard: bool,
    ) -> impl Future<Output = Result<Body, CodecError>> + Send;

    /// Encode one response frame: header then body, back to back. `last`
    /// marks the terminal frame of a call; codecs may use it to flush or
    /// mark frames, and may ignore it.
    fn write_response(
        &self,
        resp: &ResponseHeader,
        body: &Body,
        last: bool,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the underlying stream.
    fn close(&self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Object-safe view of the write side of a [`ServerCodec`], so executors can
/// share one codec without being generic over its concrete type.
pub(crate) trait ErasedWrite: Send + Sync {
    fn write_response<'a>(
        &'a self,
        resp: &'a ResponseHeader,
        body: &'a Body,
        last: bool,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;
}

impl<C: ServerCodec> ErasedWrite for C {
    fn write_response<'a>(
        &'a self,
        resp: &'a ResponseHeader,
        body: &'a Body,
        last: bool,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
        Box::pin(ServerCodec::write_response(self, resp, body, last))
    }
}

/// Read one `[u32 LE length][bytes]` frame.
async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await.map_err(CodecError::from_read)?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds {MAX_FRAME_LEN}"),
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(CodecError::from_read)?;
    Ok(buf)
}

/// The default codec: length-prefixed JSON frames over any
/// `AsyncRead + AsyncWrite` stream (TCP, Unix sockets, in-memory duplex).
pub struct JsonFramed<S> {
    reader: Mutex<BufReader<ReadHalf<S>>>,
    writer: Mutex<BufWriter<WriteHalf<S>>>,
}

impl<S> JsonFramed<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split the stream and buffer both halves.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        JsonFramed {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

impl<S> ServerCodec for JsonFramed<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_request_header(&self, req: &mut RequestHeader) -> Result<(), CodecError> {
        let mut reader = self.reader.lock().await;
        let frame = read_frame(&mut *reader).await?;
        *req = serde_json::from_slice(&frame).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(())
    }

    async fn read_request_body(&self, discard: bool) -> Result<Body, CodecError> {
        let mut reader = self.reader.lock().await;
        let frame = read_frame(&mut *reader).await?;
        if discard || frame.is_empty() {
            return Ok(Body::Null);
        }
        serde_json::from_slice(&frame).map_err(|e| CodecError::Decode(e.to_string()))
    }

    async fn write_response(
        &self,
        resp: &ResponseHeader,
        body: &Body,
        _last: bool,
    ) -> io::Result<()> {
        let header_bytes = serde_json::to_vec(resp)?;
        let body_bytes = serde_json::to_vec(body)?;
        let mut writer = self.writer.lock().await;
        writer.write_u32_le(header_bytes.len() as u32).await?;
        writer.write_all(&header_bytes).await?;
        writer.write_u32_le(body_bytes.len() as u32).await?;
        writer.write_all(&body_bytes).await?;
        writer.flush().await
    }

    async fn close(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    async fn write_raw_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) {
        writer.write_u32_le(bytes.len() as u32).await.unwrap();
        writer.write_all(bytes).await.unwrap();
        writer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn reads_header_and_body_in_alternation() {
        let (mut client, server) = duplex(4096);
        let codec = JsonFramed::new(server);

        write_raw_frame(&mut client, br#"{"service_method":"Arith.Multiply","seq":1}"#).await;
        write_raw_frame(&mut client, br#"{"a":7,"b":8}"#).await;

        let mut req = RequestHeader::default();
        codec.read_request_header(&mut req).await.unwrap();
        assert_eq!(req.service_method, "Arith.Multiply");
        assert_eq!(req.seq, 1);

        let body = codec.read_request_body(false).await.unwrap();
        assert_eq!(body, json!({"a": 7, "b": 8}));
    }

    #[tokio::test]
    async fn empty_body_frame_decodes_to_null() {
        let (mut client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        write_raw_frame(&mut client, b"").await;
        assert_eq!(codec.read_request_body(false).await.unwrap(), Body::Null);
    }

    #[tokio::test]
    async fn discard_consumes_without_decoding() {
        let (mut client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        write_raw_frame(&mut client, b"this is not json").await;
        assert_eq!(codec.read_request_body(true).await.unwrap(), Body::Null);
    }

    #[tokio::test]
    async fn garbled_header_is_a_recoverable_decode_error() {
        let (mut client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        write_raw_frame(&mut client, b"{not json").await;
        let mut req = RequestHeader::default();
        let err = codec.read_request_header(&mut req).await.unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[tokio::test]
    async fn peer_close_reads_as_eof() {
        let (client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        drop(client);
        let mut req = RequestHeader::default();
        let err = codec.read_request_header(&mut req).await.unwrap_err();
        assert!(matches!(err, CodecError::Eof));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_fatal() {
        let (mut client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        client.write_u32_le(u32::MAX).await.unwrap();
        let mut req = RequestHeader::default();
        let err = codec.read_request_header(&mut req).await.unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[tokio::test]
    async fn write_response_frames_header_then_body() {
        let (client, server) = duplex(4096);
        let codec = JsonFramed::new(server);
        let resp = ResponseHeader {
            service_method: "Arith.Multiply".into(),
            seq: 1,
            error: String::new(),
        };
        ServerCodec::write_response(&codec, &resp, &json!(56), true)
            .await
            .unwrap();

        let (mut reader, _writer) = tokio::io::split(client);
        let header_frame = read_frame(&mut reader).await.unwrap();
        let decoded: ResponseHeader = serde_json::from_slice(&header_frame).unwrap();
        assert_eq!(decoded, resp);

        let body_frame = read_frame(&mut reader).await.unwrap();
        let body: Body = serde_json::from_slice(&body_frame).unwrap();
        assert_eq!(body, json!(56));
    }
}
