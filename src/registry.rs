//! Service registration: the method table DSL and validated descriptors.
//!
//! Rust cannot enumerate methods on a receiver at runtime, so receivers
//! declare their callable surface through [`Service::methods`], adding each
//! handler to a [`MethodTable`] under one of the four canonical shapes
//! (unary or streaming, with or without a connection context parameter).
//! The table validates names the same way regardless of shape; argument and
//! reply types are pinned by the handler's signature. Each accepted method
//! becomes an immutable descriptor wrapping a type-erased invoke thunk, so
//! dispatch never needs to know concrete handler types.

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::call::{self, ServiceCall};
use crate::error::HandlerError;
use crate::stream::StreamSink;
use crate::wire::CLOSE_STREAM;

pub(crate) type InvokeFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub(crate) type InvokeFn<C> = Box<dyn Fn(ServiceCall<C>) -> InvokeFuture + Send + Sync>;

/// A receiver exposable as a named service.
///
/// `C` is the server-wide connection context type (default `String`); a
/// receiver registered on a `Server<C>` must implement `Service<C>`, which
/// pins what context parameter its handlers may declare.
pub trait Service<C = String>: Send + Sync + Sized + 'static {
    /// Declare the receiver's callable methods.
    fn methods(table: &mut MethodTable<Self, C>);
}

/// One callable method: its shape and its invocation thunk. Immutable after
/// registration except for the call counter.
pub(crate) struct MethodDescriptor<C> {
    pub(crate) streaming: bool,
    calls: Mutex<u64>,
    pub(crate) invoke: InvokeFn<C>,
}

impl<C> MethodDescriptor<C> {
    pub(crate) fn record_call(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    pub(crate) fn num_calls(&self) -> u64 {
        *self.calls.lock().unwrap()
    }
}

/// A registered service: its name, the receiver's concrete type name, and
/// its accepted methods. Never mutated after insertion.
pub(crate) struct ServiceEntry<C> {
    pub(crate) type_name: &'static str,
    pub(crate) methods: HashMap<String, Arc<MethodDescriptor<C>>>,
}

/// Builder a receiver fills in from [`Service::methods`].
///
/// A method name is accepted iff it is non-empty, starts with an uppercase
/// letter, is not the reserved cancellation name, and was not already added.
/// Rejected names are logged and skipped; the registration as a whole fails
/// only if no method survives.
pub struct MethodTable<S, C = String> {
    rcvr: Arc<S>,
    methods: HashMap<String, Arc<MethodDescriptor<C>>>,
}

impl<S, C> MethodTable<S, C>
where
    S: Send + Sync + 'static,
    C: Send + 'static,
{
    pub(crate) fn new(rcvr: Arc<S>) -> Self {
        MethodTable {
            rcvr,
            methods: HashMap::new(),
        }
    }

    pub(crate) fn into_methods(self) -> HashMap<String, Arc<MethodDescriptor<C>>> {
        self.methods
    }

    fn accept_name(&self, name: &str) -> bool {
        if name.is_empty() {
            warn!("empty method name, skipping");
            return false;
        }
        if name == CLOSE_STREAM {
            warn!(method = name, "method name is reserved, skipping");
            return false;
        }
        if !name.chars().next().is_some_and(char::is_uppercase) {
            warn!(method = name, "method name is not exported, skipping");
            return false;
        }
        if self.methods.contains_key(name) {
            warn!(method = name, "method already added, skipping");
            return false;
        }
        true
    }

    fn insert(&mut self, name: &str, streaming: bool, invoke: InvokeFn<C>) -> &mut Self {
        self.methods.insert(
            name.to_string(),
            Arc::new(MethodDescriptor {
                streaming,
                calls: Mutex::new(0),
                invoke,
            }),
        );
        self
    }

    /// Add a unary method: the handler consumes the decoded argument and
    /// returns the reply, or an error that suppresses the reply body.
    pub fn unary<A, R, Fut, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
    {
        self.unary_with_context(name, move |rcvr, _context: C, arg| f(rcvr, arg))
    }

    /// Like [`unary`](Self::unary), with the per-connection context value
    /// passed first.
    pub fn unary_with_context<A, R, Fut, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        F: Fn(Arc<S>, C, A) -> Fut + Send + Sync + 'static,
    {
        if !self.accept_name(name) {
            return self;
        }
        let rcvr = self.rcvr.clone();
        let f = Arc::new(f);
        let invoke: InvokeFn<C> = Box::new(move |serv_call| {
            let rcvr = rcvr.clone();
            let f = f.clone();
            Box::pin(call::unary(rcvr, f, serv_call))
        });
        self.insert(name, false, invoke)
    }

    /// Add a streaming method: the handler emits values through the sink and
    /// returning `Ok` triggers the end-of-stream terminal frame.
    pub fn streaming<A, R, Fut, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        F: Fn(Arc<S>, A, StreamSink<R>) -> Fut + Send + Sync + 'static,
    {
        self.streaming_with_context(name, move |rcvr, _context: C, arg, sink| {
            f(rcvr, arg, sink)
        })
    }

    /// Like [`streaming`](Self::streaming), with the per-connection context
    /// value passed first.
    pub fn streaming_with_context<A, R, Fut, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
        F: Fn(Arc<S>, C, A, StreamSink<R>) -> Fut + Send + Sync + 'static,
    {
        if !self.accept_name(name) {
            return self;
        }
        let rcvr = self.rcvr.clone();
        let f = Arc::new(f);
        let invoke: InvokeFn<C> = Box::new(move |serv_call| {
            let rcvr = rcvr.clone();
            let f = f.clone();
            Box::pin(call::streaming(rcvr, f, serv_call))
        });
        self.insert(name, true, invoke)
    }
}

/// The receiver's concrete type name with module path and generic
/// parameters stripped: the default service name.
pub(crate) fn short_type_name<S>() -> &'static str {
    let full = type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    fn table() -> MethodTable<Probe, String> {
        MethodTable::new(Arc::new(Probe))
    }

    #[test]
    fn accepts_exported_names_only() {
        let mut t = table();
        t.unary("Multiply", |_p, n: u64| async move { Ok(n) });
        t.unary("multiply", |_p, n: u64| async move { Ok(n) });
        t.unary("", |_p, n: u64| async move { Ok(n) });
        t.unary(CLOSE_STREAM, |_p, n: u64| async move { Ok(n) });

        let methods = t.into_methods();
        assert_eq!(methods.len(), 1);
        assert!(methods.contains_key("Multiply"));
    }

    #[test]
    fn duplicate_names_are_skipped_not_replaced() {
        let mut t = table();
        t.unary("Echo", |_p, n: u64| async move { Ok(n) });
        t.streaming("Echo", |_p, _n: u64, _sink: StreamSink<u64>| async move { Ok(()) });

        let methods = t.into_methods();
        assert_eq!(methods.len(), 1);
        assert!(!methods["Echo"].streaming);
    }

    #[test]
    fn descriptors_carry_the_streaming_flag() {
        let mut t = table();
        t.unary("One", |_p, n: u64| async move { Ok(n) });
        t.streaming("Many", |_p, _n: u64, _sink: StreamSink<u64>| async move { Ok(()) });

        let methods = t.into_methods();
        assert!(!methods["One"].streaming);
        assert!(methods["Many"].streaming);
    }

    #[test]
    fn call_counter_starts_at_zero() {
        let mut t = table();
        t.unary("Ping", |_p, n: u64| async move { Ok(n) });
        let methods = t.into_methods();
        assert_eq!(methods["Ping"].num_calls(), 0);
        methods["Ping"].record_call();
        assert_eq!(methods["Ping"].num_calls(), 1);
    }

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<Probe>(), "Probe");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
        assert_eq!(short_type_name::<String>(), "String");
    }
}
