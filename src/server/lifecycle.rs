//! Process lifecycle helpers: pid file, stop signals and crash diagnostics.

use crate::memory::{format_bytes, format_uptime};
use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

// ============================================================================
// Pid File
// ============================================================================

/// A pid file, removed again when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        info!(path = %path.display(), "Pid file written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}

// ============================================================================
// Stop Signals
// ============================================================================

/// Sets `flag` on SIGINT or SIGTERM. The server's cron tick observes it.
pub fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let received = wait_for_stop_signal().await;
        info!(signal = received, "Shutdown signal received");
        flag.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            };
        }
    };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => "SIGINT",
            Err(_) => std::future::pending().await,
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "CTRL-C",
        Err(_) => std::future::pending().await,
    }
}

// ============================================================================
// Crash Diagnostics
// ============================================================================

/// Figures reported when the process dies unexpectedly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub uptime: i64,
    pub memory_used: u64,
    pub max_memory: u64,
    pub items: usize,
    pub clients: usize,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UPTIME {} - MEM {}/{} - OBJECTS {} - CLIENTS {}",
            format_uptime(self.uptime),
            format_bytes(self.memory_used),
            format_bytes(self.max_memory),
            self.items,
            self.clients
        )
    }
}

/// Latest snapshot, refreshed by the cron tick and read by the panic hook.
pub type SharedSnapshot = Arc<Mutex<Snapshot>>;

/// Logs the latest snapshot and a backtrace on panic, then defers to the
/// previous hook.
pub fn install_panic_hook(snapshot: SharedSnapshot) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let snapshot = snapshot.lock().map(|s| *s).unwrap_or_default();
        error!(
            panic = %panic_info,
            snapshot = %snapshot,
            backtrace = %Backtrace::force_capture(),
            "Fatal error, dumping diagnostics"
        );
        previous(panic_info);
    }));
}
