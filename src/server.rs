//! The server facade and the per-connection dispatcher loop.
//!
//! A [`Server`] bundles the service registry, the header free lists, and
//! the registered request loggers. Serving a connection runs one reader
//! task: it decodes request headers and bodies in strict alternation,
//! spawns an executor per request, tracks live calls for cancellation, and
//! tears down by closing the *eof* signal and the codec when the read side
//! ends. Response writes from executors are serialized by the connection
//! send lock; the reader never blocks on a handler.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::call::{ResponseSender, ServiceCall};
use crate::codec::{ErasedWrite, JsonFramed, ServerCodec};
use crate::error::{CodecError, RegisterError};
use crate::observe::{RequestLog, RequestLogEntry, RequestLogger};
use crate::pool::FreeList;
use crate::registry::{short_type_name, MethodTable, Service, ServiceEntry};
use crate::wire::{Body, RequestHeader, ResponseHeader, CLOSE_STREAM};

struct ServerInner<C> {
    services: RwLock<HashMap<String, Arc<ServiceEntry<C>>>>,
    req_pool: Arc<FreeList<RequestHeader>>,
    resp_pool: Arc<FreeList<ResponseHeader>>,
    loggers: RwLock<Vec<RequestLogger>>,
}

/// An RPC server: a registry of named services plus connection serving
/// entry points.
///
/// `C` is the per-connection context type handlers may declare (default
/// `String`); it is fixed at the type level, before any registration.
/// Cloning is cheap and clones share the registry.
pub struct Server<C = String> {
    inner: Arc<ServerInner<C>>,
}

impl<C> Clone for Server<C> {
    fn clone(&self) -> Self {
        Server {
            inner: self.inner.clone(),
        }
    }
}

impl<C> Default for Server<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Server<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Server {
            inner: Arc::new(ServerInner {
                services: RwLock::new(HashMap::new()),
                req_pool: Arc::new(FreeList::new()),
                resp_pool: Arc::new(FreeList::new()),
                loggers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Publish the receiver's methods under its concrete type name.
    ///
    /// Fails if the name is already taken, the type name does not start
    /// with an uppercase letter, or no method of suitable shape was
    /// declared.
    pub fn register<S: Service<C>>(&self, rcvr: S) -> Result<(), RegisterError> {
        self.install(rcvr, None)
    }

    /// Like [`register`](Self::register) but under an explicit name, with
    /// the exported-name check bypassed for this path only.
    pub fn register_name<S: Service<C>>(&self, name: &str, rcvr: S) -> Result<(), RegisterError> {
        self.install(rcvr, Some(name))
    }

    fn install<S: Service<C>>(&self, rcvr: S, name: Option<&str>) -> Result<(), RegisterError> {
        let type_name = short_type_name::<S>();
        let name = match name {
            Some(name) => {
                if name.is_empty() {
                    return Err(RegisterError::EmptyServiceName);
                }
                name.to_string()
            }
            None => {
                if !type_name.chars().next().is_some_and(char::is_uppercase) {
                    warn!(type_name, "cannot register unexported service type");
                    return Err(RegisterError::UnexportedServiceName(type_name.to_string()));
                }
                type_name.to_string()
            }
        };

        let mut services = self.inner.services.write().unwrap();
        if services.contains_key(&name) {
            return Err(RegisterError::DuplicateService(name));
        }

        let mut table = MethodTable::new(Arc::new(rcvr));
        S::methods(&mut table);
        let methods = table.into_methods();
        if methods.is_empty() {
            warn!(service = %name, "service has no methods of suitable shape");
            return Err(RegisterError::NoMethods(name));
        }

        debug!(service = %name, type_name, methods = methods.len(), "registered service");
        services.insert(name, Arc::new(ServiceEntry { type_name, methods }));
        Ok(())
    }

    /// Register a callback invoked with a timing record for every completed
    /// request on connections served after this call.
    pub fn on_request(&self, logger: impl Fn(&RequestLogEntry) + Send + Sync + 'static) {
        self.inner.loggers.write().unwrap().push(Arc::new(logger));
    }

    /// How many times `"Service.Method"` has been dispatched, or `None` if
    /// it is not registered.
    pub fn num_calls(&self, service_method: &str) -> Option<u64> {
        let (service, method) = service_method.split_once('.')?;
        let entry = self.inner.services.read().unwrap().get(service).cloned()?;
        entry.methods.get(method).map(|m| m.num_calls())
    }

    /// Serve one connection with the default codec and a default context
    /// value, until the peer hangs up. Typically spawned.
    pub async fn serve_conn<S>(&self, conn: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        C: Default,
    {
        self.serve_codec_with_context(JsonFramed::new(conn), C::default())
            .await
    }

    /// Like [`serve_conn`](Self::serve_conn) with an explicit per-connection
    /// context value, passed to handlers that declare a context parameter.
    pub async fn serve_conn_with_context<S>(&self, conn: S, context: C)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.serve_codec_with_context(JsonFramed::new(conn), context)
            .await
    }

    /// Serve one connection through the given codec and a default context.
    pub async fn serve_codec<K>(&self, codec: K)
    where
        K: ServerCodec,
        C: Default,
    {
        self.serve_codec_with_context(codec, C::default()).await
    }

    /// Serve one connection through the given codec. The heart of the
    /// dispatcher: one iteration per request frame.
    pub async fn serve_codec_with_context<K>(&self, codec: K, context: C)
    where
        K: ServerCodec,
    {
        let codec = Arc::new(codec);
        let erased: Arc<dyn ErasedWrite> = codec.clone();
        let sender = ResponseSender::new(erased, self.inner.resp_pool.clone());
        let eof = CancellationToken::new();
        let live: Arc<Mutex<HashMap<u64, CancellationToken>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let log = Arc::new(RequestLog::new(self.inner.loggers.read().unwrap().clone()));

        loop {
            let mut req = self.inner.req_pool.get();
            if let Err(e) = codec.read_request_header(&mut req).await {
                self.inner.req_pool.put(req);
                match e {
                    CodecError::Decode(err) => {
                        warn!(error = %err, "cannot decode request header");
                        // a body frame follows every header; consume it so the
                        // next read starts on a header boundary
                        if codec.read_request_body(true).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    CodecError::Eof => break,
                    CodecError::Io(err) => {
                        debug!(error = %err, "connection read failed");
                        break;
                    }
                }
            }

            if req.service_method == CLOSE_STREAM {
                if codec.read_request_body(true).await.is_err() {
                    self.inner.req_pool.put(req);
                    break;
                }
                let stop = live.lock().unwrap().remove(&req.seq);
                log.finish(req.seq);
                if let Some(stop) = stop {
                    trace!(seq = req.seq, "cancelling stream");
                    stop.cancel();
                }
                self.inner.req_pool.put(req);
                continue;
            }

            let target = req
                .service_method
                .split_once('.')
                .map(|(service, method)| (service.to_string(), method.to_string()));
            let Some((service_name, method_name)) = target else {
                if codec.read_request_body(true).await.is_err() {
                    self.inner.req_pool.put(req);
                    break;
                }
                let errmsg = format!("service/method request ill-formed: {}", req.service_method);
                self.respond_error(&sender, &req, &errmsg).await;
                self.inner.req_pool.put(req);
                continue;
            };

            let entry = self
                .inner
                .services
                .read()
                .unwrap()
                .get(&service_name)
                .cloned();
            let Some(entry) = entry else {
                if codec.read_request_body(true).await.is_err() {
                    self.inner.req_pool.put(req);
                    break;
                }
                let errmsg = format!("can't find service {}", req.service_method);
                self.respond_error(&sender, &req, &errmsg).await;
                self.inner.req_pool.put(req);
                continue;
            };
            let Some(desc) = entry.methods.get(&method_name).cloned() else {
                if codec.read_request_body(true).await.is_err() {
                    self.inner.req_pool.put(req);
                    break;
                }
                let errmsg = format!("can't find method {}", req.service_method);
                self.respond_error(&sender, &req, &errmsg).await;
                self.inner.req_pool.put(req);
                continue;
            };

            let arg = match codec.read_request_body(false).await {
                Ok(body) => body,
                Err(CodecError::Decode(err)) => {
                    let errmsg = format!("cannot decode request body: {err}");
                    self.respond_error(&sender, &req, &errmsg).await;
                    self.inner.req_pool.put(req);
                    continue;
                }
                Err(_) => {
                    self.inner.req_pool.put(req);
                    break;
                }
            };

            let seq = req.seq;
            let stop = CancellationToken::new();
            live.lock().unwrap().insert(seq, stop.clone());
            log.start(seq, &req.service_method);

            let (done_tx, done_rx) = oneshot::channel();
            tokio::spawn({
                let live = live.clone();
                let log = log.clone();
                async move {
                    let _ = done_rx.await;
                    live.lock().unwrap().remove(&seq);
                    log.finish(seq);
                }
            });

            desc.record_call();
            trace!(
                seq,
                method = %req.service_method,
                service_type = entry.type_name,
                streaming = desc.streaming,
                "dispatching request"
            );
            tokio::spawn((desc.invoke)(ServiceCall {
                req,
                arg,
                sender: sender.clone(),
                context: context.clone(),
                eof: eof.clone(),
                stop,
                done: done_tx,
                req_pool: self.inner.req_pool.clone(),
            }));
        }

        eof.cancel();
        if let Err(e) = codec.close().await {
            debug!(error = %e, "failed to close codec");
        }
    }

    async fn respond_error(&self, sender: &ResponseSender, req: &RequestHeader, errmsg: &str) {
        let placeholder = Body::Null;
        if let Err(e) = sender
            .send(&req.service_method, req.seq, &placeholder, errmsg, true)
            .await
        {
            warn!(seq = req.seq, error = %e, "failed to write error response");
        }
    }

    /// Accept connections on the listener and serve each on its own task.
    /// Returns the first accept error.
    pub async fn accept(&self, listener: TcpListener) -> io::Result<()>
    where
        C: Default,
    {
        loop {
            let (conn, addr) = listener.accept().await?;
            debug!(peer = %addr, "accepted connection");
            let server = self.clone();
            tokio::spawn(async move { server.serve_conn(conn).await });
        }
    }
}

static DEFAULT_SERVER: OnceLock<Server> = OnceLock::new();

/// The lazily-initialized process-wide [`Server`], for callers that do not
/// need their own instance.
pub fn default_server() -> &'static Server {
    DEFAULT_SERVER.get_or_init(Server::new)
}
