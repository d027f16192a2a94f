//! The public entry point: `Server`, a resilient IMAP client built on
//! the connection engine, command-scoped handlers, and the IDLE loop.

use crate::config::{CommandTimeouts, IdleConfig, ImapConfig, PipelineConfig};
use crate::connection::{CallerToken, Connection, ConnectionPool, NamedConnection};
use crate::error::Result;
use crate::handlers::{FetchKind, FetchRecord, ListEntry, QuotaResource, Selection};
use crate::ident::{IdSet, Namespace};
use crate::idle_session::Session;
use std::sync::Arc;

/// A resilient IMAP client: one primary connection plus an optional
/// pool of additional named connections, all sharing the same
/// credentials and tunables.
pub struct Server {
    config: ImapConfig,
    pipeline_cfg: PipelineConfig,
    timeouts: CommandTimeouts,
    primary: Arc<Connection>,
    caller: CallerToken,
    pool: ConnectionPool,
}

impl Server {
    /// Connect, then authenticate with a plaintext username/password.
    pub async fn connect(config: ImapConfig) -> Result<Self> {
        Self::connect_with(config, PipelineConfig::default(), CommandTimeouts::default()).await
    }

    /// Connect with explicit pipeline and timeout tunables.
    pub async fn connect_with(config: ImapConfig, pipeline_cfg: PipelineConfig, timeouts: CommandTimeouts) -> Result<Self> {
        let primary = Connection::connect(config.clone(), pipeline_cfg.clone(), timeouts.clone()).await?;
        Ok(Self {
            config,
            pipeline_cfg,
            timeouts,
            primary,
            caller: CallerToken::new(),
            pool: ConnectionPool::new(),
        })
    }

    pub async fn login(&self) -> Result<()> {
        self.primary.login(self.caller).await
    }

    pub async fn authenticate_xoauth2(&self, token: &str) -> Result<()> {
        self.primary.authenticate_xoauth2(self.caller, token).await
    }

    /// The server's capability list as observed at connect time or the
    /// last explicit `fetch_capabilities()` call.
    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        self.primary.capability_snapshot()
    }

    pub async fn fetch_capabilities(&self) -> Result<Vec<String>> {
        self.primary.capabilities(self.caller).await
    }

    pub async fn id(&self, fields: &[(String, String)]) -> Result<Option<Vec<(String, String)>>> {
        self.primary.id(self.caller, fields).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.primary.logout(self.caller).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.disconnect().await
    }

    pub async fn select(&self, mailbox: &str) -> Result<Selection> {
        self.primary.select(self.caller, mailbox).await
    }

    pub async fn unselect(&self) -> Result<()> {
        self.primary.unselect(self.caller).await
    }

    pub async fn close(&self) -> Result<()> {
        self.primary.close(self.caller).await
    }

    pub async fn create(&self, mailbox: &str) -> Result<()> {
        self.primary.create(self.caller, mailbox).await
    }

    pub async fn expunge(&self) -> Result<Vec<u32>> {
        self.primary.expunge(self.caller).await
    }

    pub async fn copy<N>(&self, ids: &IdSet<N>, destination: &str) -> Result<crate::handlers::CopyOutcome>
    where
        N: Namespace + Send + Sync + 'static,
    {
        self.primary.copy(self.caller, ids, destination).await
    }

    pub async fn mov<N>(&self, ids: &IdSet<N>, destination: &str) -> Result<crate::handlers::CopyOutcome>
    where
        N: Namespace + Send + Sync + 'static,
    {
        self.primary.mov(self.caller, ids, destination).await
    }

    pub async fn store<N>(&self, ids: &IdSet<N>, flags_clause: &str) -> Result<Vec<(u32, Vec<String>)>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        self.primary.store(self.caller, ids, flags_clause).await
    }

    pub async fn search<N>(&self, query: &str) -> Result<IdSet<N>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        self.primary.search(self.caller, query).await
    }

    pub async fn fetch<N>(&self, ids: &IdSet<N>, kind: FetchKind, items: &str) -> Result<Vec<FetchRecord>>
    where
        N: Namespace + Send + Sync + 'static,
    {
        self.primary.fetch(self.caller, ids, kind, items).await
    }

    pub async fn append(&self, mailbox: &str, flags: &[String], message: &[u8]) -> Result<Option<(u32, u32)>> {
        self.primary.append(self.caller, mailbox, flags, message).await
    }

    pub async fn namespace(&self) -> Result<Vec<String>> {
        self.primary.namespace(self.caller).await
    }

    pub async fn list(&self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        self.primary.list(self.caller, reference, pattern).await
    }

    pub async fn quota(&self, root: &str) -> Result<Vec<QuotaResource>> {
        self.primary.quota(self.caller, root).await
    }

    pub async fn noop(&self) -> Result<Vec<crate::events::ServerEvent>> {
        self.primary.noop(self.caller).await
    }

    /// Run NOOP against a named pooled connection rather than the
    /// primary one.
    pub async fn noop_on(&self, name: &str) -> Result<Vec<crate::events::ServerEvent>> {
        let conn = self
            .pool
            .get(name)
            .ok_or_else(|| crate::error::Error::InvalidArgument(format!("no connection named {name}")))?;
        conn.noop(self.caller).await
    }

    /// Open (or replace) a named pooled connection, authenticated with
    /// the same credentials as the primary.
    pub async fn connection(&self, name: &str) -> Result<()> {
        let conn = Connection::connect(self.config.clone(), self.pipeline_cfg.clone(), self.timeouts.clone()).await?;
        conn.login(self.caller).await?;
        self.pool.insert(NamedConnection {
            name: name.to_string(),
            conn,
        })
    }

    /// Start a single, non-resilient IDLE on the primary connection.
    /// Callers wanting automatic renewal and reconnect should use
    /// `idle_resilient` instead.
    pub async fn idle(&self) -> Result<crate::connection::IdleSession<'_>> {
        self.primary.start_idle(self.caller).await
    }

    /// Start the resilient IDLE loop: renews before the server's idle
    /// timeout, reconnects with backoff on failure, and re-selects
    /// `mailbox` after every reconnect.
    pub fn idle_resilient(&self, mailbox: &str, idle_cfg: IdleConfig) -> Result<Session> {
        Session::start(
            Arc::clone(&self.primary),
            self.config.clone(),
            self.pipeline_cfg.clone(),
            self.timeouts.clone(),
            idle_cfg,
            mailbox.to_string(),
        )
    }
}
