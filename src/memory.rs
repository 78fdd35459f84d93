//! OS memory queries and human-readable formatting.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Bytes of memory the OS reports as available.
pub fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// OS memory figures at one point in time, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    pub available: u64,
    /// Resident set of this process, 0 when the OS does not expose it
    pub resident: u64,
}

/// Reusable handle for sampling OS memory.
///
/// Only the memory counters and this process are refreshed, never the
/// whole process table.
pub struct MemoryProbe {
    sys: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn sample(&mut self) -> MemorySample {
        self.sys.refresh_memory();

        let resident = match self.pid {
            Some(pid) => {
                self.sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::new().with_memory(),
                );
                self.sys.process(pid).map_or(0, |process| process.memory())
            }
            None => 0,
        };

        MemorySample {
            available: self.sys.available_memory(),
            resident,
        }
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProbe").field("pid", &self.pid).finish()
    }
}

/// Caps a configured memory budget to half of what the OS has available.
///
/// Returns the budget unchanged when it fits or when the OS reports nothing.
pub fn clamp_max_memory(configured: u64, available: u64) -> u64 {
    if available > 0 && configured > available {
        available / 2
    } else {
        configured
    }
}

/// Formats a byte count with one decimal, e.g. `1.5KB`, `2.0GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Formats a duration in seconds as `Dd Hh Mm Ss`.
pub fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_bytes(4 * 1024 * 1024), "4.0MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0GB");
        assert_eq!(format_bytes(3 * 1024u64.pow(4)), "3.0TB");
        assert_eq!(format_bytes(2048 * 1024u64.pow(4)), "2048.0TB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0d 0h 0m 0s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
        assert_eq!(format_uptime(-5), "0d 0h 0m 0s");
    }

    #[test]
    fn test_clamp_max_memory() {
        assert_eq!(clamp_max_memory(100, 1000), 100);
        assert_eq!(clamp_max_memory(2000, 1000), 500);
        assert_eq!(clamp_max_memory(2000, 0), 2000);
    }

    #[test]
    fn test_available_memory_reported() {
        // Any real host has some memory available
        assert!(available_memory() > 0);
    }

    #[test]
    fn test_probe_samples_this_process() {
        let mut probe = MemoryProbe::new();
        let first = probe.sample();
        assert!(first.available > 0);
        if cfg!(target_os = "linux") {
            assert!(first.resident > 0);
        }

        // The same probe keeps working across samples
        let second = probe.sample();
        assert!(second.available > 0);
    }
}
