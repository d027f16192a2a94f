//! The resilient IDLE loop: a long-running task that keeps a
//! connection idling, renews it before the server or network gives up
//! on it, and reconnects with exponential-jittered backoff if the
//! connection drops mid-cycle.

use crate::codec::Response;
use crate::config::{CommandTimeouts, IdleConfig, ImapConfig, PipelineConfig};
use crate::connection::{CallerToken, Connection};
use crate::error::{Error, Result};
use crate::events::{self, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A running resilient IDLE session. Dropping this without calling
/// `.done()` stops the background task on the next tick.
pub struct Session {
    events: mpsc::UnboundedReceiver<ServerEvent>,
    stop: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Start the resilient loop on an already-authenticated connection.
    /// `select_mailbox` is re-applied after every reconnect, since a
    /// fresh connection starts unselected.
    pub fn start(
        conn: Arc<Connection>,
        config: ImapConfig,
        pipeline_cfg: PipelineConfig,
        timeouts: CommandTimeouts,
        idle_cfg: IdleConfig,
        select_mailbox: String,
    ) -> Result<Self> {
        idle_cfg.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let task = tokio::spawn(run_loop(
            conn,
            config,
            pipeline_cfg,
            timeouts,
            idle_cfg,
            select_mailbox,
            events_tx,
            stop_rx,
        ));

        Ok(Self {
            events: events_rx,
            stop: stop_tx,
            task,
        })
    }

    /// Receive the next server notification. Returns `None` once the
    /// loop has stopped (either via `.done()` or an unrecoverable
    /// failure).
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Stop the loop and wait for the background task to exit cleanly.
    pub async fn done(self) {
        let _ = self.stop.send(()).await;
        let _ = self.task.await;
    }
}

/// Compute the next backoff delay with full jitter, bounded by
/// `max_delay`. `attempt` is 0-based; attempt 0 uses `base_delay`
/// itself (before jitter).
fn backoff_delay(attempt: u32, cfg: &IdleConfig, jitter_seed: u64) -> std::time::Duration {
    let base = cfg.reconnect_base_delay.as_millis() as u64;
    let max = cfg.reconnect_max_delay.as_millis() as u64;
    let doubled = base.saturating_mul(1u64 << attempt.min(20));
    let capped = doubled.min(max);
    let jitter_span = (capped as f64 * cfg.reconnect_jitter_factor) as u64;
    let jitter = if jitter_span == 0 { 0 } else { jitter_seed % jitter_span };
    std::time::Duration::from_millis(capped.saturating_sub(jitter_span / 2).saturating_add(jitter))
}

/// Simple non-cryptographic mixer used only to vary jitter across
/// attempts without depending on a `rand` crate; `Math.random()`-class
/// unpredictability is not a requirement here, only variance.
fn mix(seed: &mut u64) -> u64 {
    *seed ^= *seed << 13;
    *seed ^= *seed >> 7;
    *seed ^= *seed << 17;
    *seed
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    mut conn: Arc<Connection>,
    config: ImapConfig,
    pipeline_cfg: PipelineConfig,
    timeouts: CommandTimeouts,
    idle_cfg: IdleConfig,
    mailbox: String,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let caller = CallerToken::new();
    let mut reconnect_attempt: u32 = 0;
    let mut jitter_seed: u64 = 0x9E3779B97F4A7C15 ^ (mailbox.len() as u64 + 1);

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        let idle = match conn.start_idle(caller).await {
            Ok(idle) => idle,
            Err(e) => {
                warn!(error = %e, "failed to start IDLE, reconnecting");
                if !reconnect(
                    &mut conn,
                    &config,
                    &pipeline_cfg,
                    &timeouts,
                    &mailbox,
                    caller,
                    &mut reconnect_attempt,
                    &mut jitter_seed,
                    &idle_cfg,
                    &mut stop_rx,
                )
                .await
                {
                    break;
                }
                continue;
            }
        };

        let cycle_outcome = run_one_idle_cycle(&conn, idle, &idle_cfg, &events_tx, &mut stop_rx).await;

        match cycle_outcome {
            CycleOutcome::Stopped => break,
            CycleOutcome::RenewedCleanly => {
                reconnect_attempt = 0;
                if idle_cfg.post_idle_noop_enabled {
                    tokio::time::sleep(idle_cfg.post_idle_noop_delay).await;
                    match conn.noop(caller).await {
                        Ok(noop_events) => {
                            for event in noop_events {
                                let _ = events_tx.send(event);
                            }
                        }
                        Err(e) => warn!(error = %e, "post-IDLE NOOP failed"),
                    }
                }
            }
            CycleOutcome::Disconnected => {
                warn!("IDLE connection dropped, reconnecting");
                if !reconnect(
                    &mut conn,
                    &config,
                    &pipeline_cfg,
                    &timeouts,
                    &mailbox,
                    caller,
                    &mut reconnect_attempt,
                    &mut jitter_seed,
                    &idle_cfg,
                    &mut stop_rx,
                )
                .await
                {
                    break;
                }
            }
        }
    }

    debug!("resilient IDLE loop exiting");
}

enum CycleOutcome {
    Stopped,
    RenewedCleanly,
    Disconnected,
}

/// Drain the connection's persistent buffer and forward the resulting
/// events, ahead of whatever the next IDLE cycle observes live. Called
/// right after every DONE/NOOP checkpoint, since the handler-gap
/// between this checkpoint and the next IDLE install is exactly where
/// server-pushed data would otherwise go unnoticed until the next
/// renewal.
fn drain_and_forward(conn: &Connection, events_tx: &mpsc::UnboundedSender<ServerEvent>) {
    for event in conn.drain_buffered_events() {
        let _ = events_tx.send(event);
    }
}

async fn run_one_idle_cycle(
    conn: &Connection,
    mut idle: crate::connection::IdleSession<'_>,
    idle_cfg: &IdleConfig,
    events_tx: &mpsc::UnboundedSender<ServerEvent>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> CycleOutcome {
    let renewal = tokio::time::sleep(idle_cfg.renewal_interval);
    tokio::pin!(renewal);
    let noop_timer = tokio::time::sleep(idle_cfg.noop_interval);
    tokio::pin!(noop_timer);
    let mut fetch_acc = events::FetchAccumulator::default();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                let _ = idle.done(idle_cfg.done_timeout).await;
                drain_and_forward(conn, events_tx);
                return CycleOutcome::Stopped;
            }
            _ = &mut renewal => {
                let outcome = match idle.done(idle_cfg.done_timeout).await {
                    Ok(()) => CycleOutcome::RenewedCleanly,
                    Err(_) => CycleOutcome::Disconnected,
                };
                drain_and_forward(conn, events_tx);
                return outcome;
            }
            _ = &mut noop_timer => {
                // A dedicated NOOP inside IDLE would require breaking
                // out; instead we just restart the cycle early, which
                // has the same liveness effect.
                let outcome = match idle.done(idle_cfg.done_timeout).await {
                    Ok(()) => CycleOutcome::RenewedCleanly,
                    Err(_) => CycleOutcome::Disconnected,
                };
                drain_and_forward(conn, events_tx);
                return outcome;
            }
            maybe_response = idle.events.recv() => {
                let Some(response) = maybe_response else {
                    return CycleOutcome::Disconnected;
                };
                let event = if matches!(response, Response::Fetch(_)) {
                    fetch_acc.push(&response)
                } else {
                    events::from_response(&response)
                };
                if let Some(event) = event {
                    let is_bye = matches!(event, ServerEvent::Bye(_));
                    let _ = events_tx.send(event);
                    if is_bye {
                        return CycleOutcome::Disconnected;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconnect(
    conn: &mut Arc<Connection>,
    config: &ImapConfig,
    pipeline_cfg: &PipelineConfig,
    timeouts: &CommandTimeouts,
    mailbox: &str,
    caller: CallerToken,
    attempt: &mut u32,
    jitter_seed: &mut u64,
    idle_cfg: &IdleConfig,
    stop_rx: &mut mpsc::Receiver<()>,
) -> bool {
    loop {
        let delay = backoff_delay(*attempt, idle_cfg, mix(jitter_seed));
        info!(attempt = *attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");

        tokio::select! {
            _ = stop_rx.recv() => return false,
            () = tokio::time::sleep(delay) => {}
        }

        match attempt_reconnect(config, pipeline_cfg, timeouts, mailbox, caller).await {
            Ok(new_conn) => {
                *conn = new_conn;
                return true;
            }
            Err(e) => {
                warn!(error = %e, attempt = *attempt, "reconnect attempt failed");
                *attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn attempt_reconnect(
    config: &ImapConfig,
    pipeline_cfg: &PipelineConfig,
    timeouts: &CommandTimeouts,
    mailbox: &str,
    caller: CallerToken,
) -> Result<Arc<Connection>> {
    let conn = Connection::connect(config.clone(), pipeline_cfg.clone(), timeouts.clone()).await?;
    conn.login(caller).await?;
    conn.select(caller, mailbox).await?;
    Ok(conn)
}
