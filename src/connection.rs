//! The connection engine: TLS bootstrap, the generic command-submission
//! algorithm, the re-entrant command lock, and named-connection
//! pooling. The resilient IDLE loop built on top of this lives in
//! `idle_session`.

use crate::buffer::PersistentBuffer;
use crate::codec::{quote, Decoder, Response, Status, TagGenerator};
use crate::config::{CommandTimeouts, ImapConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::handlers::{self, Selection};
use crate::ident::{IdSet, Namespace};
use crate::pipeline::{Pipeline, Position, Stage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Mirrors the connection lifecycle: a fresh socket moves forward
/// through these states and never skips one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Greeted,
    Authenticated,
    Selected,
    Idling,
}

/// Identifies a logical caller for the re-entrant command lock. A
/// caller holding the lock (e.g. a multi-step operation that issues
/// several commands back to back) can call `submit` again with the
/// same token without deadlocking on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerToken(u64);

impl CallerToken {
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts any certificate. Mirrors the local-bridge deployment model
/// this client was built against; operators connecting to a public
/// server over an untrusted network should supply their own
/// `rustls::ClientConfig` instead.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

fn insecure_tls_connector() -> TlsConnector {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Whether an error observed during command submission should cause
/// the connection to be recycled. Cancellation is the caller giving
/// up, not the transport failing, so it never triggers a recycle.
fn is_recycle_error(err: &Error) -> bool {
    !matches!(err, Error::Cancelled) && err.is_transport_class()
}

struct LockState {
    holder: Option<CallerToken>,
}

/// RAII guard for the re-entrant command lock. Releases the underlying
/// mutex (if this call actually acquired it, rather than re-entering)
/// when dropped.
pub struct CommandLockGuard<'a> {
    state: &'a Mutex<LockState>,
    _guard: Option<OwnedMutexGuard<()>>,
    reentrant: bool,
}

impl Drop for CommandLockGuard<'_> {
    fn drop(&mut self) {
        if !self.reentrant {
            self.state.lock().expect("lock state poisoned").holder = None;
        }
    }
}

/// A single IMAP connection: socket, wire codec, pipeline, and the
/// bookkeeping the command-submission algorithm needs.
pub struct Connection {
    config: ImapConfig,
    timeouts: CommandTimeouts,
    pipeline: Pipeline,
    buffer: Arc<PersistentBuffer>,
    tags: TagGenerator,
    write_half: AsyncMutex<Option<WriteHalf<TlsStream>>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    state: Mutex<ConnectionState>,
    command_lock: Arc<AsyncMutex<()>>,
    lock_state: Mutex<LockState>,
    capabilities: Mutex<Vec<String>>,
    selected_mailbox: Mutex<Option<String>>,
    needs_recycle: AtomicBool,
}

impl Connection {
    /// Open a TCP+TLS connection, wait for the greeting, and fetch the
    /// server's capability list. Does not log in.
    pub async fn connect(
        config: ImapConfig,
        pipeline_cfg: PipelineConfig,
        timeouts: CommandTimeouts,
    ) -> Result<Arc<Self>> {
        pipeline_cfg.validate()?;
        timeouts.validate()?;

        let addr = format!("{}:{}", config.host, config.port);
        debug!(%addr, "opening IMAP connection");

        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let connector = insecure_tls_connector();
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| Error::Tls(e.to_string()))?
            .to_owned();
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(tls_stream);

        let buffer = Arc::new(PersistentBuffer::new());
        let pipeline = Pipeline::new();
        pipeline.add(buffer.clone(), Position::Last);

        let conn = Arc::new(Self {
            config,
            timeouts,
            pipeline: pipeline.clone(),
            buffer,
            tags: TagGenerator::new(),
            write_half: AsyncMutex::new(Some(write_half)),
            reader_task: Mutex::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            command_lock: Arc::new(AsyncMutex::new(())),
            lock_state: Mutex::new(LockState { holder: None }),
            capabilities: Mutex::new(Vec::new()),
            selected_mailbox: Mutex::new(None),
            needs_recycle: AtomicBool::new(false),
        });

        let reader_handle = spawn_reader(read_half, pipeline, pipeline_cfg.max_literal_bytes, Arc::clone(&conn));
        *conn.reader_task.lock().expect("reader task lock poisoned") = Some(reader_handle);

        let (greeting_tx, greeting_rx) = oneshot::channel();
        let greeting_stage = handlers::greeting(greeting_tx);
        conn.pipeline.add(greeting_stage, Position::Before("persistent-buffer"));
        let outcome = conn.await_reply(greeting_rx, conn.timeouts.default).await?;
        if !matches!(outcome.status, Status::Ok) {
            return Err(Error::GreetingFailed(outcome.text));
        }
        *conn.state.lock().expect("state lock poisoned") = ConnectionState::Greeted;
        info!("received IMAP greeting");

        let caps = conn.capabilities(CallerToken::new()).await?;
        *conn.capabilities.lock().expect("capabilities lock poisoned") = caps;

        Ok(conn)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    #[must_use]
    pub fn capability_snapshot(&self) -> Vec<String> {
        self.capabilities.lock().expect("capabilities lock poisoned").clone()
    }

    #[must_use]
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities
            .lock()
            .expect("capabilities lock poisoned")
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    #[must_use]
    pub fn selected_mailbox(&self) -> Option<String> {
        self.selected_mailbox.lock().expect("selected mailbox lock poisoned").clone()
    }

    /// Whether the command-submission algorithm has flagged this
    /// connection for replacement (per the recycle predicate).
    #[must_use]
    pub fn needs_recycle(&self) -> bool {
        self.needs_recycle.load(Ordering::SeqCst) || self.buffer.has_termination()
    }

    fn mark_for_recycle(&self) {
        self.needs_recycle.store(true, Ordering::SeqCst);
    }

    async fn acquire_command_lock(&self, caller: CallerToken) -> CommandLockGuard<'_> {
        if self.lock_state.lock().expect("lock state poisoned").holder == Some(caller) {
            return CommandLockGuard {
                state: &self.lock_state,
                _guard: None,
                reentrant: true,
            };
        }
        let guard = self.command_lock.clone().lock_owned().await;
        self.lock_state.lock().expect("lock state poisoned").holder = Some(caller);
        CommandLockGuard {
            state: &self.lock_state,
            _guard: Some(guard),
            reentrant: false,
        }
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.write_half.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::ConnectionFailed("connection already closed".into()));
        };
        writer.write_all(bytes).await.map_err(Error::Io)?;
        writer.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<Result<T>>, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(_)) => Err(Error::ConnectionFailed("reader task ended before command completed".into())),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// The generic command-submission algorithm: check for a pending
    /// termination, acquire the re-entrant lock, allocate a tag,
    /// install the handler, write the command, wait (bounded by
    /// `timeout`) for the tagged completion, then evaluate the
    /// recycle predicate on the outcome.
    async fn submit<R: Send + 'static>(
        &self,
        caller: CallerToken,
        timeout: Duration,
        build: impl FnOnce(String) -> (Arc<dyn Stage>, oneshot::Receiver<Result<R>>),
        line: impl FnOnce(&str) -> Vec<u8>,
    ) -> Result<R> {
        if self.buffer.has_termination() {
            let reasons = self.buffer.drain_termination_reasons();
            self.mark_for_recycle();
            return Err(Error::ConnectionFailed(reasons.join("; ")));
        }

        let _lock = self.acquire_command_lock(caller).await;
        let tag = self.tags.next();
        let (stage, rx) = build(tag.clone());
        self.buffer.set_active_handler(true);
        self.pipeline.add(stage, Position::Before("persistent-buffer"));

        let bytes = line(&tag);
        if let Err(e) = self.write_raw(&bytes).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        let result = self.await_reply(rx, timeout).await;
        self.buffer.set_active_handler(false);
        self.pipeline.remove(&tag);

        if let Err(e) = &result {
            if is_recycle_error(e) {
                self.mark_for_recycle();
            }
        }
        result
    }

    pub async fn login(&self, caller: CallerToken) -> Result<()> {
        let user = quote(&self.config.username);
        let pass = quote(&self.config.password);
        let result = self
            .submit(caller, self.timeouts.default, handlers::login, move |tag| {
                format!("{tag} LOGIN {user} {pass}\r\n").into_bytes()
            })
            .await;
        if result.is_ok() {
            *self.state.lock().expect("state lock poisoned") = ConnectionState::Authenticated;
        }
        result
    }

    /// XOAUTH2, using SASL-IR (RFC 4959) when the server advertises it
    /// so the token ships on the initial command line; otherwise falls
    /// back to the classic challenge/response shape, sending the token
    /// once the server's continuation arrives.
    pub async fn authenticate_xoauth2(&self, caller: CallerToken, token: &str) -> Result<()> {
        if !self.supports("AUTH=XOAUTH2") {
            return Err(Error::UnsupportedAuthMechanism("XOAUTH2".into()));
        }
        let initial = base64_encode(token.as_bytes());

        if self.supports("SASL-IR") {
            let result = self
                .submit(
                    caller,
                    self.timeouts.default,
                    |tag| handlers::xoauth2(tag, |_challenge| {}),
                    move |tag| format!("{tag} AUTHENTICATE XOAUTH2 {initial}\r\n").into_bytes(),
                )
                .await;
            if result.is_ok() {
                *self.state.lock().expect("state lock poisoned") = ConnectionState::Authenticated;
            }
            return result;
        }

        if self.buffer.has_termination() {
            let reasons = self.buffer.drain_termination_reasons();
            self.mark_for_recycle();
            return Err(Error::ConnectionFailed(reasons.join("; ")));
        }
        let _lock = self.acquire_command_lock(caller).await;
        let tag = self.tags.next();
        let (continuation_tx, continuation_rx) = oneshot::channel();
        let continuation_tx = Arc::new(Mutex::new(Some(continuation_tx)));
        let (stage, rx) = handlers::xoauth2(tag.clone(), move |_challenge| {
            if let Some(tx) = continuation_tx.lock().expect("continuation lock poisoned").take() {
                let _ = tx.send(());
            }
        });
        self.buffer.set_active_handler(true);
        self.pipeline.add(stage, Position::Before("persistent-buffer"));

        let line = format!("{tag} AUTHENTICATE XOAUTH2\r\n");
        if let Err(e) = self.write_raw(line.as_bytes()).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        if tokio::time::timeout(self.timeouts.default, continuation_rx).await.is_err() {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(Error::Timeout);
        }

        if let Err(e) = self.write_raw(format!("{initial}\r\n").as_bytes()).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        let result = self.await_reply(rx, self.timeouts.default).await;
        self.buffer.set_active_handler(false);
        self.pipeline.remove(&tag);
        if let Err(e) = &result {
            if is_recycle_error(e) {
                self.mark_for_recycle();
            }
        }
        if result.is_ok() {
            *self.state.lock().expect("state lock poisoned") = ConnectionState::Authenticated;
        }
        result
    }

    pub async fn capabilities(&self, caller: CallerToken) -> Result<Vec<String>> {
        let result = self
            .submit(caller, self.timeouts.default, handlers::capability, |tag| {
                format!("{tag} CAPABILITY\r\n").into_bytes()
            })
            .await?;
        Ok(result.capabilities)
    }

    pub async fn select(&self, caller: CallerToken, mailbox: &str) -> Result<Selection> {
        let name = quote(mailbox);
        let result = self
            .submit(caller, self.timeouts.default, handlers::select, move |tag| {
                format!("{tag} SELECT {name}\r\n").into_bytes()
            })
            .await;
        if result.is_ok() {
            *self.selected_mailbox.lock().expect("selected mailbox lock poisoned") = Some(mailbox.to_string());
            *self.state.lock().expect("state lock poisoned") = ConnectionState::Selected;
        }
        result
    }

    pub async fn unselect(&self, caller: CallerToken) -> Result<()> {
        let cmd = if self.supports("UNSELECT") { "UNSELECT" } else { "CLOSE" };
        let result = self
            .submit(caller, self.timeouts.default, handlers::unselect, move |tag| {
                format!("{tag} {cmd}\r\n").into_bytes()
            })
            .await;
        if result.is_ok() {
            *self.selected_mailbox.lock().expect("selected mailbox lock poisoned") = None;
            *self.state.lock().expect("state lock poisoned") = ConnectionState::Authenticated;
        }
        result
    }

    pub async fn close(&self, caller: CallerToken) -> Result<()> {
        let result = self
            .submit(caller, self.timeouts.default, handlers::close, |tag| format!("{tag} CLOSE\r\n").into_bytes())
            .await;
        if result.is_ok() {
            *self.selected_mailbox.lock().expect("selected mailbox lock poisoned") = None;
            *self.state.lock().expect("state lock poisoned") = ConnectionState::Authenticated;
        }
        result
    }

    pub async fn create(&self, caller: CallerToken, mailbox: &str) -> Result<()> {
        let name = quote(mailbox);
        self.submit(caller, self.timeouts.default, handlers::create, move |tag| {
            format!("{tag} CREATE {name}\r\n").into_bytes()
        })
        .await
    }

    pub async fn expunge(&self, caller: CallerToken) -> Result<Vec<u32>> {
        self.submit(caller, self.timeouts.default, handlers::expunge, |tag| format!("{tag} EXPUNGE\r\n").into_bytes())
            .await
    }

    pub async fn copy<N>(&self, caller: CallerToken, ids: &IdSet<N>, destination: &str) -> Result<handlers::CopyOutcome>
    where
        N: Namespace + Send + Sync + 'static,
    {
        if ids.is_empty() {
            return Err(Error::EmptyIdentifierSet);
        }
        let prefix = N::WIRE_PREFIX;
        let set = ids.to_wire();
        let dest = quote(destination);
        self.submit(caller, self.timeouts.default, handlers::copy_messages, move |tag| {
            format!("{tag} {prefix}COPY {set} {dest}\r\n").into_bytes()
        })
        .await
    }

    pub async fn mov<N>(&self, caller: CallerToken, ids: &IdSet<N>, destination: &str) -> Result<handlers::CopyOutcome>
    where
        N: Namespace + Send + Sync + 'static,
    {
        if ids.is_empty() {
            return Err(Error::EmptyIdentifierSet);
        }
        if !self.supports("MOVE") {
            return Err(Error::CommandNotSupported("MOVE".into()));
        }
        let prefix = N::WIRE_PREFIX;
        let set = ids.to_wire();
        let dest = quote(destination);
        self.submit(caller, self.timeouts.default, handlers::mov, move |tag| {
            format!("{tag} {prefix}MOVE {set} {dest}\r\n").into_bytes()
        })
        .await
    }

    pub async fn store<N>(&self, caller: CallerToken, ids: &IdSet<N>, flags_clause: &str) -> Result<Vec<(u32, Vec<String>)>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        if ids.is_empty() {
            return Err(Error::EmptyIdentifierSet);
        }
        let prefix = N::WIRE_PREFIX;
        let set = ids.to_wire();
        let clause = flags_clause.to_string();
        self.submit(caller, self.timeouts.default, handlers::store, move |tag| {
            format!("{tag} {prefix}STORE {set} {clause}\r\n").into_bytes()
        })
        .await
    }

    pub async fn search<N>(&self, caller: CallerToken, query: &str) -> Result<IdSet<N>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        let prefix = N::WIRE_PREFIX;
        let query = query.to_string();
        self.submit(caller, self.timeouts.search, handlers::search::<N>, move |tag| {
            format!("{tag} {prefix}SEARCH {query}\r\n").into_bytes()
        })
        .await
    }

    pub async fn fetch<N>(
        &self,
        caller: CallerToken,
        ids: &IdSet<N>,
        kind: handlers::FetchKind,
        items: &str,
    ) -> Result<Vec<handlers::FetchRecord>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        if ids.is_empty() {
            return Err(Error::EmptyIdentifierSet);
        }
        let prefix = N::WIRE_PREFIX;
        let set = ids.to_wire();
        let items = items.to_string();
        self.submit(
            caller,
            self.timeouts.default,
            move |tag| handlers::fetch(tag, kind),
            move |tag| format!("{tag} {prefix}FETCH {set} {items}\r\n").into_bytes(),
        )
        .await
    }

    pub async fn noop(&self, caller: CallerToken) -> Result<Vec<crate::events::ServerEvent>> {
        self.submit(caller, self.timeouts.default, handlers::noop, |tag| format!("{tag} NOOP\r\n").into_bytes())
            .await
    }

    pub async fn id(&self, caller: CallerToken, fields: &[(String, String)]) -> Result<Option<Vec<(String, String)>>> {
        let arg = if fields.is_empty() {
            "NIL".to_string()
        } else {
            let pairs: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{} {}", quote(k), quote(v)))
                .collect();
            format!("({})", pairs.join(" "))
        };
        self.submit(caller, self.timeouts.default, handlers::id, move |tag| format!("{tag} ID {arg}\r\n").into_bytes())
            .await
    }

    pub async fn quota(&self, caller: CallerToken, root: &str) -> Result<Vec<handlers::QuotaResource>> {
        if !self.supports("QUOTA") {
            return Err(Error::CommandNotSupported("QUOTA".into()));
        }
        let root = quote(root);
        self.submit(caller, self.timeouts.default, handlers::quota, move |tag| {
            format!("{tag} GETQUOTAROOT {root}\r\n").into_bytes()
        })
        .await
    }

    pub async fn namespace(&self, caller: CallerToken) -> Result<Vec<String>> {
        if !self.supports("NAMESPACE") {
            return Err(Error::CommandNotSupported("NAMESPACE".into()));
        }
        self.submit(caller, self.timeouts.default, handlers::namespace, |tag| format!("{tag} NAMESPACE\r\n").into_bytes())
            .await
    }

    pub async fn list(&self, caller: CallerToken, reference: &str, pattern: &str) -> Result<Vec<handlers::ListEntry>> {
        let reference = quote(reference);
        let pattern = quote(pattern);
        self.submit(caller, self.timeouts.default, handlers::list, move |tag| {
            format!("{tag} LIST {reference} {pattern}\r\n").into_bytes()
        })
        .await
    }

    pub async fn append(&self, caller: CallerToken, mailbox: &str, flags: &[String], message: &[u8]) -> Result<Option<(u32, u32)>> {
        let name = quote(mailbox);
        let flags_clause = if flags.is_empty() {
            String::new()
        } else {
            format!("({}) ", flags.join(" "))
        };

        if self.buffer.has_termination() {
            let reasons = self.buffer.drain_termination_reasons();
            self.mark_for_recycle();
            return Err(Error::ConnectionFailed(reasons.join("; ")));
        }
        let _lock = self.acquire_command_lock(caller).await;
        let tag = self.tags.next();
        let (continuation_tx, continuation_rx) = oneshot::channel();
        let continuation_tx = Arc::new(Mutex::new(Some(continuation_tx)));
        let (stage, rx) = handlers::append(tag.clone(), move || {
            if let Some(tx) = continuation_tx.lock().expect("continuation lock poisoned").take() {
                let _ = tx.send(());
            }
        });
        self.buffer.set_active_handler(true);
        self.pipeline.add(stage, Position::Before("persistent-buffer"));

        let prefix = format!("{tag} APPEND {name} {flags_clause}{{{}}}\r\n", message.len());
        if let Err(e) = self.write_raw(prefix.as_bytes()).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        if tokio::time::timeout(self.timeouts.append, continuation_rx).await.is_err() {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(Error::Timeout);
        }

        let mut body = message.to_vec();
        body.extend_from_slice(b"\r\n");
        if let Err(e) = self.write_raw(&body).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        let result = self.await_reply(rx, self.timeouts.append).await;
        self.buffer.set_active_handler(false);
        self.pipeline.remove(&tag);
        if let Err(e) = &result {
            if is_recycle_error(e) {
                self.mark_for_recycle();
            }
        }
        result
    }

    pub async fn logout(&self, caller: CallerToken) -> Result<()> {
        let result = self
            .submit(caller, self.timeouts.logout, handlers::logout, |tag| format!("{tag} LOGOUT\r\n").into_bytes())
            .await;
        *self.state.lock().expect("state lock poisoned") = ConnectionState::Disconnected;
        result
    }

    /// Start IDLE: installs the live event handler, writes `IDLE`, and
    /// returns the handle the caller reads events from and eventually
    /// `.done()`s. The command lock stays held for the duration of the
    /// returned session, since no other command may be pipelined while
    /// idling.
    pub async fn start_idle(&self, caller: CallerToken) -> Result<IdleSession<'_>> {
        if !self.supports("IDLE") {
            return Err(Error::CommandNotSupported("IDLE".into()));
        }
        let lock = self.acquire_command_lock(caller).await;
        let tag = self.tags.next();
        let (handle, events, done_rx) = handlers::idle(tag.clone());
        self.buffer.set_active_handler(true);
        self.pipeline.add(handle.clone(), Position::Before("persistent-buffer"));

        let line = format!("{tag} IDLE\r\n");
        if let Err(e) = self.write_raw(line.as_bytes()).await {
            self.pipeline.remove(&tag);
            self.buffer.set_active_handler(false);
            self.mark_for_recycle();
            return Err(e);
        }

        *self.state.lock().expect("state lock poisoned") = ConnectionState::Idling;
        Ok(IdleSession {
            conn: self,
            tag,
            handle,
            events,
            done_rx: Some(done_rx),
            _lock: lock,
        })
    }

    /// Drain whatever untagged/FETCH/fatal responses accumulated in the
    /// persistent buffer since the last drain — the handler-gap between
    /// a command-scoped handler finishing and the next one installing —
    /// converted to the `ServerEvent`s IDLE/NOOP would have yielded had
    /// a handler been watching when they arrived.
    #[must_use]
    pub fn drain_buffered_events(&self) -> Vec<crate::events::ServerEvent> {
        crate::events::events_from_responses(&self.buffer.drain())
    }
}

/// How long `IdleSession::done` waits for the server's `+ idling`
/// continuation before giving up and sending `DONE` anyway.
const MAX_IDLE_STARTED_WAIT: Duration = Duration::from_secs(5);

/// A live IDLE: `events` streams every notification; `done()` sends
/// `DONE` and waits for the tagged completion.
pub struct IdleSession<'a> {
    conn: &'a Connection,
    tag: String,
    handle: Arc<handlers::IdleHandle>,
    pub events: tokio::sync::mpsc::UnboundedReceiver<Response>,
    done_rx: Option<oneshot::Receiver<Result<()>>>,
    _lock: CommandLockGuard<'a>,
}

impl IdleSession<'_> {
    pub async fn done(mut self, timeout: Duration) -> Result<()> {
        let wait_bound = timeout.min(MAX_IDLE_STARTED_WAIT);
        if tokio::time::timeout(wait_bound, self.handle.wait_idle_started()).await.is_err() {
            debug!("IDLE continuation not observed within bound, sending DONE anyway");
        }
        self.conn.write_raw(b"DONE\r\n").await?;
        let Some(done_rx) = self.done_rx.take() else {
            return Err(Error::Cancelled);
        };
        let result = self.conn.await_reply(done_rx, timeout).await;
        self.conn.buffer.set_active_handler(false);
        self.conn.pipeline.remove(&self.tag);
        if matches!(self.conn.state(), ConnectionState::Idling) {
            *self.conn.state.lock().expect("state lock poisoned") = ConnectionState::Selected;
        }
        if let Err(e) = &result {
            if is_recycle_error(e) {
                self.conn.mark_for_recycle();
            }
        }
        result
    }
}

fn spawn_reader(
    mut read_half: ReadHalf<TlsStream>,
    pipeline: Pipeline,
    max_literal_bytes: u64,
    conn: Arc<Connection>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = Decoder::new(max_literal_bytes);
        let mut buf = [0u8; 8192];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    pipeline.dispatch(&Response::Fatal("connection closed by peer".into()));
                    break;
                }
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    match decoder.decode_ready() {
                        Ok(responses) => {
                            for response in responses {
                                pipeline.dispatch(&response);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed response, terminating connection");
                            pipeline.dispatch(&Response::Fatal(e.to_string()));
                            break;
                        }
                    }
                }
                Err(e) => {
                    pipeline.dispatch(&Response::Fatal(e.to_string()));
                    break;
                }
            }
        }
        conn.mark_for_recycle();
        let mut guard = conn.write_half.lock().await;
        *guard = None;
    })
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let n = (u32::from(chunk[0])) << 16
            | (u32::from(chunk.get(1).copied().unwrap_or(0))) << 8
            | u32::from(chunk.get(2).copied().unwrap_or(0));
        out.push(ALPHABET[(n >> 18) as usize & 0x3f] as char);
        out.push(ALPHABET[(n >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(n >> 6) as usize & 0x3f] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[n as usize & 0x3f] as char } else { '=' });
    }
    out
}

/// A named, pooled connection: a thin handle over a `Connection` plus
/// the label callers use to address it (`Server::connection(named)`,
/// `Server::noop_on(named)`).
pub struct NamedConnection {
    pub name: String,
    pub conn: Arc<Connection>,
}

/// Bounded pool of named connections: up to `CAPACITY` kept warm, with
/// a short-lived burst allowance of `BURST` for overlapping requests
/// (e.g. a reconnect in flight while the caller still holds the old
/// handle).
pub struct ConnectionPool {
    capacity: usize,
    burst: usize,
    connections: Mutex<VecDeque<NamedConnection>>,
}

impl ConnectionPool {
    const CAPACITY: usize = 3;
    const BURST: usize = 4;

    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: Self::CAPACITY,
            burst: Self::BURST,
            connections: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a new named connection. Errors if doing so would
    /// exceed the burst allowance; callers should retire a recycled
    /// connection before adding its replacement when at steady-state
    /// capacity.
    pub fn insert(&self, named: NamedConnection) -> Result<()> {
        let mut connections = self.connections.lock().expect("pool lock poisoned");
        if connections.len() >= self.burst {
            return Err(Error::InvalidArgument(format!(
                "connection pool burst limit ({}) exceeded",
                self.burst
            )));
        }
        connections.retain(|c| c.name != named.name);
        connections.push_back(named);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.conn.clone())
    }

    pub fn remove(&self, name: &str) {
        self.connections
            .lock()
            .expect("pool lock poisoned")
            .retain(|c| c.name != name);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().expect("pool lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_at_steady_capacity(&self) -> bool {
        self.len() >= self.capacity
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}
