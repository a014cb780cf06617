//! Service runtime
//!
//! Owns the controller registry and one [`LinkPoller`] per configured link.
//! Periodic work is not scheduled by the pollers themselves: the service tick
//! calls [`CommService::submit_periodic`] and the pollers deduplicate by key.

use std::collections::HashMap;
use std::sync::Arc;

use errors::{TmsError, TmsResult};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, LinkConfig, SignPixels};
use crate::controller::{ControllerHandle, ControllerRegistry};
use crate::operation::Operation;
use crate::poller::LinkPoller;
use crate::protocols::mndot::{OpQueryPromVersion, OpQuerySamples30Sec, OpSynchronizeClock};
use crate::protocols::ntcip::{DmsQueryConfiguration, DmsQueryPixelFailures};
use crate::protocols::ProtocolFamily;
use crate::sink::DeviceSink;
use crate::transport::{create_transport, Transport};

struct ControllerEntry {
    handle: Arc<ControllerHandle>,
    sign_pixels: Option<SignPixels>,
}

/// Running communication service
pub struct CommService {
    registry: Arc<ControllerRegistry>,
    pollers: HashMap<String, LinkPoller>,
    links: Vec<LinkConfig>,
    controllers: Vec<ControllerEntry>,
    cancel: CancellationToken,
}

impl CommService {
    /// Build the registry and pollers; nothing is started yet
    pub fn new(config: &AppConfig, sink: Arc<dyn DeviceSink>, cancel: CancellationToken) -> Self {
        let registry = Arc::new(ControllerRegistry::new());
        let mut pollers = HashMap::new();
        let mut controllers = Vec::new();

        for link in &config.links {
            let policy = config.policy_for(link);
            debug!(
                "Link {}: {} over {}, {} retries, {} ms timeout",
                link.name, link.protocol, link.transport, policy.max_retries, policy.timeout_ms
            );
            for ctl in &link.controllers {
                let handle = ControllerHandle::new(&ctl.name, &link.name, ctl.drop, link.protocol)
                    .with_password(ctl.password.clone())
                    .with_active(ctl.active);
                controllers.push(ControllerEntry {
                    handle: registry.insert(handle),
                    sign_pixels: ctl.sign_pixels,
                });
            }
            let poller = LinkPoller::with_cancel(
                &link.name,
                policy,
                Arc::clone(&registry),
                Arc::clone(&sink),
                cancel.child_token(),
            );
            pollers.insert(link.name.clone(), poller);
        }

        Self {
            registry,
            pollers,
            links: config.links.clone(),
            controllers,
            cancel,
        }
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn poller(&self, link: &str) -> Option<&LinkPoller> {
        self.pollers.get(link)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Start every link on its configured transport
    ///
    /// A link whose transport cannot be built is logged and left stopped;
    /// the service fails only when no link could be started.
    pub fn start(&self) -> TmsResult<usize> {
        let mut started = 0;
        for link in &self.links {
            let Some(poller) = self.pollers.get(&link.name) else {
                continue;
            };
            match create_transport(&link.transport, poller.policy().timeout()) {
                Ok(transport) => {
                    poller.start(transport);
                    started += 1;
                },
                Err(e) => {
                    error!("Failed to create transport for link {}: {}", link.name, e);
                },
            }
        }
        if started == 0 && !self.links.is_empty() {
            return Err(TmsError::ConnectionFailed {
                endpoint: "all links".to_string(),
                reason: "no transport could be created".to_string(),
            });
        }
        info!("Started {}/{} links", started, self.links.len());
        Ok(started)
    }

    /// Start one link on a caller-supplied transport
    pub fn start_link(&self, link: &str, transport: Box<dyn Transport>) -> TmsResult<()> {
        let poller = self.pollers.get(link).ok_or_else(|| TmsError::not_found(link))?;
        poller.start(transport);
        Ok(())
    }

    /// Queue an operation on the link of its controller
    pub fn submit(&self, op: Box<dyn Operation>) -> bool {
        let link = op.controller().link().to_string();
        match self.pollers.get(&link) {
            Some(poller) => poller.add_operation(op),
            None => {
                warn!("No poller for link {link}, dropping {op}");
                false
            },
        }
    }

    /// One-time operations for every active controller
    pub fn submit_startup(&self) -> usize {
        let mut queued = 0;
        for entry in self.active() {
            let ctl = Arc::clone(&entry.handle);
            let ops = match ctl.protocol().family() {
                ProtocolFamily::Ntcip => vec![DmsQueryConfiguration::new().operation(ctl)],
                ProtocolFamily::Mndot => vec![
                    OpQueryPromVersion::new().operation(Arc::clone(&ctl)),
                    OpSynchronizeClock::new().operation(ctl),
                ],
                ProtocolFamily::Pelco => Vec::new(),
            };
            for op in ops {
                if self.submit(op) {
                    queued += 1;
                }
            }
        }
        queued
    }

    /// Status and sample operations for the periodic tick
    pub fn submit_periodic(&self) -> usize {
        let mut queued = 0;
        for entry in self.active() {
            let ctl = Arc::clone(&entry.handle);
            let op = match (ctl.protocol().family(), entry.sign_pixels) {
                (ProtocolFamily::Ntcip, Some(pixels)) => {
                    Some(DmsQueryPixelFailures::new(pixels, false).operation(ctl))
                },
                (ProtocolFamily::Mndot, _) => Some(OpQuerySamples30Sec::new().operation(ctl)),
                _ => None,
            };
            if let Some(op) = op {
                if self.submit(op) {
                    queued += 1;
                }
            }
        }
        debug!("Periodic tick queued {queued} operations");
        queued
    }

    fn active(&self) -> impl Iterator<Item = &ControllerEntry> {
        self.controllers.iter().filter(|entry| entry.handle.is_active())
    }

    /// Stop every poller and wait for the link tasks to exit
    pub async fn shutdown(&self) -> usize {
        info!("Stopping {} links...", self.pollers.len());
        self.cancel.cancel();
        let cancelled: usize = self.pollers.values().map(LinkPoller::destroy).sum();
        join_all(self.pollers.values().map(LinkPoller::join)).await;
        info!("All links stopped, {cancelled} queued operations cancelled");
        cancelled
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    const CONFIG: &str = r#"
links:
  - name: dms_link
    protocol: ntcip
    transport: { type: udp, host: 127.0.0.1, port: 161 }
    controllers:
      - { name: V94E01, password: public, sign_pixels: { width: 150, height: 27 } }
      - { name: V94E02, active: false }
  - name: rm_link
    protocol: mndot5
    transport: { type: tcp, host: 127.0.0.1, port: 8001 }
    controllers:
      - { name: ctl_3, drop: 3 }
  - name: cam_link
    protocol: pelco_d
    transport: { type: tcp, host: 127.0.0.1, port: 4001 }
    controllers:
      - { name: C101, drop: 1 }
"#;

    fn service() -> CommService {
        let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        CommService::new(&config, Arc::new(RecordingSink::new()), CancellationToken::new())
    }

    #[test]
    fn test_registry_built_from_config() {
        let svc = service();
        assert_eq!(svc.registry().len(), 4);
        assert_eq!(svc.registry().on_link("dms_link").len(), 2);
        assert!(!svc.registry().get("V94E02").unwrap().is_active());
        assert!(svc.poller("rm_link").is_some());
        assert!(svc.poller("missing").is_none());
    }

    #[test]
    fn test_startup_and_periodic_queue() {
        let svc = service();
        // DMS config for V94E01; PROM version and clock sync for ctl_3
        assert_eq!(svc.submit_startup(), 3);
        assert_eq!(svc.poller("dms_link").unwrap().queue_len(), 1);
        assert_eq!(svc.poller("rm_link").unwrap().queue_len(), 2);

        assert_eq!(svc.submit_periodic(), 2);
        // A second tick before the first ran is deduplicated
        assert_eq!(svc.submit_periodic(), 0);
        assert_eq!(svc.poller("cam_link").unwrap().queue_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued() {
        let svc = service();
        svc.submit_startup();
        assert_eq!(svc.shutdown().await, 3);
        assert!(svc.cancel_token().is_cancelled());
        assert_eq!(svc.submit_periodic(), 0);
    }

    #[test]
    fn test_start_unknown_link() {
        let svc = service();
        let transport = Box::new(crate::transport::MockTransport::new("x"));
        assert!(svc.start_link("nope", transport).is_err());
    }
}
