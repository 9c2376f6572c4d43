//! Per-address connection admission control.
//!
//! A sliding window caps how many connections one address may open within
//! the window. Rejected upgrades are closed with the policy-violation code
//! by the WebSocket layer; disconnects release their slot so a well-behaved
//! client is not penalized for quick reconnect cycles.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Admission limits
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Connections allowed per address within the window
    pub max_connections: usize,
    /// Sliding window length
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window per-address connection limiter
pub struct AdmissionControl {
    config: AdmissionConfig,
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to admit a connection from `addr`. Returns false when the
    /// address has exhausted its window.
    pub fn try_acquire(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("admission lock poisoned");
        let window = windows.entry(addr).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.max_connections {
            warn!(%addr, "Connection rejected by admission control");
            return false;
        }
        window.push_back(now);
        true
    }

    /// Release one slot for `addr` when its connection closes
    pub fn release(&self, addr: IpAddr) {
        let mut windows = self.windows.lock().expect("admission lock poisoned");
        if let Some(window) = windows.get_mut(&addr) {
            window.pop_front();
            if window.is_empty() {
                windows.remove(&addr);
            }
        }
    }
}
