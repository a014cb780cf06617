//! Field controllers and their shared status
//!
//! A [`ControllerHandle`] is shared between the link poller, the operations
//! queued for it, and whoever schedules work. Status lives in atomics so
//! readers never block the poller.

use dashmap::DashMap;
use errors::TmsErrorTrait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CommError;
use crate::protocols::CommProtocol;

/// Per-controller error counters
#[derive(Debug, Default)]
pub struct ErrorCounters {
    timeout: AtomicU64,
    checksum: AtomicU64,
    parsing: AtomicU64,
    controller: AtomicU64,
    success_ops: AtomicU64,
    failed_ops: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub timeout: u64,
    pub checksum: u64,
    pub parsing: u64,
    pub controller: u64,
    pub success_ops: u64,
    pub failed_ops: u64,
}

impl ErrorCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            timeout: self.timeout.load(Ordering::Relaxed),
            checksum: self.checksum.load(Ordering::Relaxed),
            parsing: self.parsing.load(Ordering::Relaxed),
            controller: self.controller.load(Ordering::Relaxed),
            success_ops: self.success_ops.load(Ordering::Relaxed),
            failed_ops: self.failed_ops.load(Ordering::Relaxed),
        }
    }
}

/// A field controller addressed on one link
#[derive(Debug)]
pub struct ControllerHandle {
    name: String,
    link: String,
    drop: u16,
    protocol: CommProtocol,
    password: Option<String>,
    active: AtomicBool,
    failed: AtomicBool,
    busy: AtomicBool,
    counters: ErrorCounters,
    last_error: Mutex<Option<String>>,
}

impl ControllerHandle {
    pub fn new(
        name: impl Into<String>,
        link: impl Into<String>,
        drop: u16,
        protocol: CommProtocol,
    ) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
            drop,
            protocol,
            password: None,
            active: AtomicBool::new(true),
            failed: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            counters: ErrorCounters::default(),
            last_error: Mutex::new(None),
        }
    }

    /// Set the SNMP community / controller password
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_active(self, active: bool) -> Self {
        self.active.store(active, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn drop_address(&self) -> u16 {
        self.drop
    }

    pub fn protocol(&self) -> CommProtocol {
        self.protocol
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Set the failed flag, logging transitions
    pub fn set_failed(&self, failed: bool) {
        let previous = self.failed.swap(failed, Ordering::Relaxed);
        if previous != failed {
            if failed {
                warn!(controller = %self.name, "Controller failed");
            } else {
                debug!(controller = %self.name, "Controller restored");
            }
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Count an exchange error and remember it as the last error
    pub fn record_error(&self, error: &CommError) {
        let counter = match error {
            CommError::Transport(transport) if !transport.is_link_failure() => {
                Some(&self.counters.timeout)
            },
            CommError::Checksum { .. } => Some(&self.counters.checksum),
            CommError::Parsing(_) | CommError::Codec(_) | CommError::DropMismatch { .. } => {
                Some(&self.counters.parsing)
            },
            CommError::Device(_) | CommError::DownloadRequest => Some(&self.counters.controller),
            _ => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock() = Some(format!("{}: {error}", error.error_code()));
    }

    /// Count a finished operation
    pub fn record_completion(&self, success: bool) {
        if success {
            self.counters.success_ops.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed_ops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Claim exclusive use of the controller for one operation
    pub fn try_acquire(self: &Arc<Self>) -> Option<ControllerGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ControllerGuard {
                controller: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

/// Releases the controller when dropped
#[derive(Debug)]
pub struct ControllerGuard {
    controller: Arc<ControllerHandle>,
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        self.controller.busy.store(false, Ordering::Release);
    }
}

/// All configured controllers, by name
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: DashMap<String, Arc<ControllerHandle>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller; an existing entry with the same name is replaced
    pub fn insert(&self, controller: ControllerHandle) -> Arc<ControllerHandle> {
        let controller = Arc::new(controller);
        self.controllers
            .insert(controller.name().to_string(), Arc::clone(&controller));
        controller
    }

    pub fn get(&self, name: &str) -> Option<Arc<ControllerHandle>> {
        self.controllers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Controllers attached to `link`, sorted by drop address
    pub fn on_link(&self, link: &str) -> Vec<Arc<ControllerHandle>> {
        let mut found: Vec<_> = self
            .controllers
            .iter()
            .filter(|entry| entry.value().link() == link)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by_key(|c| c.drop_address());
        found
    }

    /// Mark every controller on `link` failed
    pub fn mark_link_failed(&self, link: &str) -> usize {
        let controllers = self.on_link(link);
        for controller in &controllers {
            controller.set_failed(true);
        }
        controllers.len()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
