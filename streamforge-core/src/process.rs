//! Process registry
//!
//! PID table of live worker encoder processes with liveness probes and
//! SIGTERM -> SIGKILL escalation. Workers run out of process, so the only
//! authoritative liveness signal is the kernel.

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::ProcessEntry;

/// Poll step while waiting for a signalled process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Registry of worker PIDs, keyed by PID.
pub struct ProcessRegistry {
    entries: Mutex<HashMap<u32, ProcessEntry>>,
    force_kill_timeout: Duration,
}

impl ProcessRegistry {
    #[must_use]
    pub fn new(force_kill_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            force_kill_timeout,
        }
    }

    pub fn register(&self, entry: ProcessEntry) {
        info!(pid = entry.pid, session_id = %entry.session_id, "worker process registered");
        self.entries.lock().insert(entry.pid, entry);
    }

    pub fn deregister(&self, pid: u32) -> Option<ProcessEntry> {
        self.entries.lock().remove(&pid)
    }

    pub fn heartbeat(&self, pid: u32) {
        if let Some(entry) = self.entries.lock().get_mut(&pid) {
            entry.last_heartbeat = Utc::now();
        }
    }

    #[must_use]
    pub fn get(&self, pid: u32) -> Option<ProcessEntry> {
        self.entries.lock().get(&pid).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProcessEntry> {
        self.entries.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether the kernel still knows this PID. Signal 0 probes without
    /// delivering anything.
    #[must_use]
    pub fn is_alive(pid: u32) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    /// Graceful stop: SIGTERM, bounded wait, SIGKILL escalation. Returns
    /// true when the process is gone afterwards.
    pub async fn terminate(&self, pid: u32) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        let nix_pid = Pid::from_raw(pid as i32);

        if !Self::is_alive(pid) {
            self.deregister(pid);
            return true;
        }

        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            warn!(pid, error = %e, "SIGTERM failed");
        }

        let deadline = tokio::time::Instant::now() + self.force_kill_timeout;
        while tokio::time::Instant::now() < deadline {
            if !Self::is_alive(pid) {
                self.deregister(pid);
                return true;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        warn!(pid, "escalating to SIGKILL");
        if let Err(e) = kill(nix_pid, Signal::SIGKILL) {
            warn!(pid, error = %e, "SIGKILL failed");
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;

        let gone = !Self::is_alive(pid);
        if gone {
            self.deregister(pid);
        }
        gone
    }

    /// Scan pass: collect entries whose PID no longer exists, then remove
    /// them in a second pass. Returns the reaped entries.
    #[must_use]
    pub fn remove_dead(&self) -> Vec<ProcessEntry> {
        let dead: Vec<u32> = {
            let entries = self.entries.lock();
            entries
                .keys()
                .copied()
                .filter(|pid| !Self::is_alive(*pid))
                .collect()
        };

        let mut reaped = Vec::new();
        let mut entries = self.entries.lock();
        for pid in dead {
            if let Some(entry) = entries.remove(&pid) {
                info!(pid, session_id = %entry.session_id, "reaped dead worker entry");
                reaped.push(entry);
            }
        }
        reaped
    }

    /// Entries whose session is not in the live set: processes that outlived
    /// their session and need escalation.
    #[must_use]
    pub fn orphans(&self, live_sessions: &std::collections::HashSet<Uuid>) -> Vec<ProcessEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| !live_sessions.contains(&e.session_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32) -> ProcessEntry {
        ProcessEntry::new(pid, Uuid::new_v4(), "ffmpeg".into())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProcessRegistry::new(Duration::from_secs(1));
        let e = entry(4242);
        registry.register(e.clone());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(4242).unwrap().session_id, e.session_id);
        assert!(registry.deregister(4242).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_own_pid_is_alive() {
        let pid = std::process::id();
        assert!(ProcessRegistry::is_alive(pid));
    }

    #[test]
    fn test_remove_dead_reaps_bogus_pids() {
        let registry = ProcessRegistry::new(Duration::from_secs(1));
        // A PID from the far end of the range; virtually guaranteed unused.
        registry.register(entry(4_000_000));
        registry.register(entry(std::process::id()));

        let reaped = registry.remove_dead();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].pid, 4_000_000);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_orphans() {
        let registry = ProcessRegistry::new(Duration::from_secs(1));
        let kept = entry(1111);
        let orphan = entry(2222);
        registry.register(kept.clone());
        registry.register(orphan.clone());

        let mut live = std::collections::HashSet::new();
        live.insert(kept.session_id);

        let orphans = registry.orphans(&live);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].pid, 2222);
    }

    #[tokio::test]
    async fn test_terminate_spawned_process() {
        let registry = ProcessRegistry::new(Duration::from_secs(2));

        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        registry.register(entry(pid));

        // Reap the child once it exits so the PID actually disappears;
        // production workers are not our children and need no reaping.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        assert!(ProcessRegistry::is_alive(pid));
        assert!(registry.terminate(pid).await);
        assert!(registry.get(pid).is_none());
    }
}
