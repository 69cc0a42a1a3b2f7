//! Wire-level headers shared by every codec.
//!
//! A connection carries a sequence of request frames from the client and a
//! sequence of response frames from the server. Each frame is a header
//! followed by a body; the header types below are what codecs decode into
//! and encode from. Bodies cross the codec boundary as [`Body`], a
//! self-describing value that typed handlers decode on their side of the
//! dispatch seam.

use serde::{Deserialize, Serialize};

use crate::pool::Clear;

/// Erased body value exchanged with codecs.
///
/// The stand-in for "any encodable value": codecs turn wire bytes into a
/// `Body` and back, while method registration supplies the typed
/// encode/decode thunks.
pub type Body = serde_json::Value;

/// Error string carried by the terminal frame of a successful stream.
pub const EOS: &str = "EOS";

/// Reserved method name a client sends to cancel the streaming call whose
/// `seq` matches. It is never routed to a registered service and produces
/// no response frame; its body is ignored.
pub const CLOSE_STREAM: &str = "CloseStream";

/// Header written before every call, decoded by the server for each frame
/// read off the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Target of the call, in the form `"Service.Method"`.
    pub service_method: String,
    /// Sequence number chosen by the client. Opaque to the server: it is
    /// echoed back for correlation and doubles as the cancellation key.
    pub seq: u64,
}

/// Header written before every reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Echoes the request's `service_method`.
    pub service_method: String,
    /// Echoes the request's `seq`.
    pub seq: u64,
    /// Empty on success. A terminal stream frame carries either the
    /// handler's error or the [`EOS`] sentinel. When non-empty, the body is
    /// a placeholder the client must not decode.
    #[serde(default)]
    pub error: String,
}

impl Clear for RequestHeader {
    fn clear(&mut self) {
        self.service_method.clear();
        self.seq = 0;
    }
}

impl Clear for ResponseHeader {
    fn clear(&mut self) {
        self.service_method.clear();
        self.seq = 0;
        self.error.clear();
    }
}
