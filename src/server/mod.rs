//! Server Module
//!
//! The event loop that ties everything together. One thread runs a tokio
//! `current_thread` runtime with a `LocalSet`; listeners, client
//! connections and maintenance timers are all local tasks on it, so the
//! storage engine is only ever touched by one task at a time and needs no
//! locking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        LocalSet (one thread)                        │
//! │                                                                     │
//! │  ┌──────────────┐  ┌──────────────┐      ┌───────────────────────┐  │
//! │  │ TCP accept   │  │ unix accept  │      │ Timers                │  │
//! │  └──────┬───────┘  └──────┬───────┘      │  cron       (100ms)   │  │
//! │         │ spawn_local     │              │  expiry     (15s)     │  │
//! │         ▼                 ▼              │  memory     (5s)      │  │
//! │  ┌─────────────────────────────────┐     │  idle reap            │  │
//! │  │ ConnectionHandler × N           │     │  stats log  (15s)     │  │
//! │  └────────────────┬────────────────┘     └───────────┬───────────┘  │
//! │                   │ borrow_mut, never across .await  │              │
//! │                   ▼                                  ▼              │
//! │        ┌──────────────────────────────────────────────────┐         │
//! │        │ ServerState: StorageEngine + CommandHandler      │         │
//! │        │              + ClientRegistry                    │         │
//! │        └──────────────────────────────────────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shutdown
//!
//! A stop signal only sets an atomic flag. The next cron tick sees it and
//! broadcasts shutdown: listeners stop, idle clients are closed, busy ones
//! get up to the idle timeout to flush their reply. Remaining clients are
//! then aborted and every item is destroyed.

pub mod clients;
pub mod lifecycle;
pub mod timer;

pub use clients::{ClientId, ClientRegistry};
pub use lifecycle::{install_panic_hook, spawn_signal_listener, PidFile, SharedSnapshot, Snapshot};
pub use timer::{Timer, TimerAction};

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionLimits};
use crate::memory::{format_bytes, format_uptime, MemoryProbe};
use crate::storage::{unix_now, StorageEngine};
use anyhow::Context;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shutdown drain poll interval
const DRAIN_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// Server State
// ============================================================================

/// Everything request handling and maintenance operate on.
#[derive(Debug)]
pub struct ServerState {
    pub engine: StorageEngine,
    pub handler: CommandHandler,
    pub clients: ClientRegistry,
}

/// Server state shared by the local tasks of the event loop.
pub type SharedState = Rc<RefCell<ServerState>>;

impl ServerState {
    pub fn new(config: &Config) -> Self {
        Self {
            engine: StorageEngine::new(config.storage_config()),
            handler: CommandHandler::new(config.limits()),
            clients: ClientRegistry::new(config.max_clients),
        }
    }

    pub fn shared(config: &Config) -> SharedState {
        Rc::new(RefCell::new(Self::new(config)))
    }

    /// Registers a client, or returns `None` when the client table is full.
    pub fn register(&mut self, peer: String) -> Option<ClientId> {
        let id = self.clients.register(peer, Instant::now())?;
        let stats = self.engine.stats_mut();
        stats.total_connections += 1;
        stats.total_clients = self.clients.len() as u64;
        Some(id)
    }

    pub fn unregister(&mut self, id: ClientId) {
        if self.clients.remove(id) {
            self.engine.stats_mut().total_clients = self.clients.len() as u64;
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let stats = self.engine.stats();
        Snapshot {
            uptime: self.engine.now() - stats.started,
            memory_used: stats.memory_used,
            max_memory: self.engine.config().max_memory,
            items: self.engine.len(),
            clients: self.clients.len(),
        }
    }

    /// The periodic one-line summary.
    pub fn stats_line(&self) -> String {
        let stats = self.engine.stats();
        format!(
            "MEM {}/{} - CLIENTS {} - OBJECTS {} ( {} COMPRESSED ) - AVERAGE SIZE {} - UPTIME {}",
            format_bytes(stats.memory_used),
            format_bytes(self.engine.config().max_memory),
            self.clients.len(),
            stats.total_items,
            stats.total_compressed_items,
            format_bytes(stats.item_size_avg() as u64),
            format_uptime(self.engine.now() - stats.started)
        )
    }
}

// ============================================================================
// Server
// ============================================================================

/// A bound server, ready to run.
pub struct Server {
    config: Config,
    state: SharedState,
    tcp: TcpListener,
    unix: Option<(UnixListener, PathBuf)>,
    stop: Arc<AtomicBool>,
    snapshot: SharedSnapshot,
    pid_file: Option<PidFile>,
    probe: MemoryProbe,
}

impl Server {
    /// Binds the listeners and writes the pid file.
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let tcp = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("failed to bind {}", config.bind_address()))?;

        let unix = match &config.unix_socket {
            Some(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "Removed stale unix socket"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("failed to remove stale socket {}", path.display())
                        })
                    }
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("failed to bind unix socket {}", path.display()))?;
                Some((listener, path.clone()))
            }
            None => None,
        };

        let pid_file = match &config.pid_file {
            Some(path) => Some(
                PidFile::create(path)
                    .with_context(|| format!("failed to write pid file {}", path.display()))?,
            ),
            None => None,
        };

        let state = ServerState::shared(&config);
        let mut probe = MemoryProbe::new();
        state.borrow_mut().engine.stats_mut().os_memory = probe.sample();
        let snapshot = Arc::new(Mutex::new(state.borrow().snapshot()));

        Ok(Self {
            config,
            state,
            tcp,
            unix,
            stop: Arc::new(AtomicBool::new(false)),
            snapshot,
            pid_file,
            probe,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Setting this flag stops the server at the next cron tick.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Diagnostic figures refreshed on every cron tick.
    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn state(&self) -> SharedState {
        Rc::clone(&self.state)
    }

    /// Serves clients until the stop flag is raised.
    ///
    /// Must be called from within a `LocalSet`.
    pub async fn run(self) -> anyhow::Result<()> {
        let Server {
            config,
            state,
            tcp,
            unix,
            stop,
            snapshot,
            pid_file,
            probe,
        } = self;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shutdown_tx = Rc::new(shutdown_tx);
        let acceptor = Acceptor {
            state: Rc::clone(&state),
            limits: ConnectionLimits {
                max_request_size: config.max_request_size,
                max_response_size: config.max_response_size,
            },
            shutdown: shutdown_rx.clone(),
        };

        let mut listeners = vec![tokio::task::spawn_local(accept_tcp(tcp, acceptor.clone()))];
        let socket_path = match unix {
            Some((listener, path)) => {
                info!(path = %path.display(), "Listening on unix socket");
                listeners.push(tokio::task::spawn_local(accept_unix(listener, acceptor)));
                Some(path)
            }
            None => None,
        };

        let timers = start_timers(
            &config,
            &state,
            stop,
            Rc::clone(&shutdown_tx),
            snapshot,
            probe,
        );

        // The cron tick flips this once the stop flag is seen
        let _ = shutdown_rx.wait_for(|&stopping| stopping).await;
        info!("Shutting down");

        drop(timers);
        for listener in listeners {
            listener.abort();
        }

        let deadline = Instant::now() + config.max_idle_time;
        while !state.borrow().clients.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let stragglers = state.borrow().clients.tasks();
        if !stragglers.is_empty() {
            warn!(clients = stragglers.len(), "Closing clients still busy at shutdown");
            for task in stragglers {
                task.abort();
            }
            tokio::task::yield_now().await;
        }

        let freed = state.borrow_mut().engine.destroy_all();

        if let Some(path) = socket_path {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove unix socket");
            }
        }
        drop(pid_file);

        info!(items_freed = freed, "Server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Accept Loops
// ============================================================================

#[derive(Clone)]
struct Acceptor {
    state: SharedState,
    limits: ConnectionLimits,
    shutdown: watch::Receiver<bool>,
}

impl Acceptor {
    /// Registers the client and spawns its connection task, or closes the
    /// stream right away when the client table is full.
    fn admit<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let registered = self.state.borrow_mut().register(peer.clone());
        let Some(id) = registered else {
            warn!(client = %peer, "Too many clients, closing connection");
            return;
        };

        let task = tokio::task::spawn_local(handle_connection(
            stream,
            id,
            peer,
            Rc::clone(&self.state),
            self.limits,
            self.shutdown.clone(),
        ));
        self.state.borrow_mut().clients.attach(id, task.abort_handle());
    }
}

async fn accept_tcp(listener: TcpListener, acceptor: Acceptor) {
    let mut shutdown = acceptor.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    acceptor.admit(stream, addr.to_string());
                }
                Err(e) => error!(error = %e, "Failed to accept connection"),
            },
            _ = shutdown.wait_for(|&stopping| stopping) => return,
        }
    }
}

async fn accept_unix(listener: UnixListener, acceptor: Acceptor) {
    let mut shutdown = acceptor.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => acceptor.admit(stream, "unix".to_string()),
                Err(e) => error!(error = %e, "Failed to accept unix connection"),
            },
            _ = shutdown.wait_for(|&stopping| stopping) => return,
        }
    }
}

// ============================================================================
// Maintenance Timers
// ============================================================================

fn start_timers(
    config: &Config,
    state: &SharedState,
    stop: Arc<AtomicBool>,
    shutdown: Rc<watch::Sender<bool>>,
    snapshot: SharedSnapshot,
    mut probe: MemoryProbe,
) -> Vec<Timer> {
    let mut timers = Vec::with_capacity(5);

    let period = config.cron_period;
    let st = Rc::clone(state);
    timers.push(Timer::start("cron", period, move || {
        let mut state = st.borrow_mut();
        state.engine.set_now(unix_now());
        state.engine.stats_mut().total_cron_done += 1;
        if let Ok(mut latest) = snapshot.lock() {
            *latest = state.snapshot();
        }

        if stop.load(Ordering::SeqCst) {
            let _ = shutdown.send(true);
            return TimerAction::Stop;
        }
        TimerAction::Rearm(period)
    }));

    let period = config.expiry_period;
    let st = Rc::clone(state);
    timers.push(Timer::start("expiry", period, move || {
        st.borrow_mut().engine.expire_sweep();
        TimerAction::Rearm(period)
    }));

    let period = config.memory_sweep_period;
    let st = Rc::clone(state);
    timers.push(Timer::start("memory", period, move || {
        let sample = probe.sample();
        let mut state = st.borrow_mut();
        state.engine.stats_mut().os_memory = sample;
        state.engine.memory_sweep();
        TimerAction::Rearm(period)
    }));

    let max_idle = config.max_idle_time;
    let period = max_idle.max(config.cron_period);
    let st = Rc::clone(state);
    timers.push(Timer::start("idle", period, move || {
        let idle = st.borrow().clients.idle(Instant::now(), max_idle);
        for (id, peer, task) in idle {
            debug!(client = %peer, client_id = id, "Disconnecting idle client");
            task.abort();
        }
        TimerAction::Rearm(period)
    }));

    let period = config.stats_period;
    let st = Rc::clone(state);
    timers.push(Timer::start("stats", period, move || {
        info!("{}", st.borrow().stats_line());
        TimerAction::Rearm(period)
    }));

    timers
}
