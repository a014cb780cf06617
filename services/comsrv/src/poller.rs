//! Link poller
//!
//! One poller task per communication link. Operations wait in a priority
//! queue (higher priority first, FIFO within a priority) and run one at a
//! time against the link's transport, so requests on a shared line never
//! interleave.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProtocolPolicy;
use crate::controller::ControllerRegistry;
use crate::error::{CommError, ErrorKind};
use crate::message::LinkIo;
use crate::operation::{Operation, PollResult};
use crate::priority::PriorityLevel;
use crate::reconnect::ReconnectHelper;
use crate::sink::DeviceSink;
use crate::transport::Transport;

/// Delay before retrying an operation whose controller is busy elsewhere
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

struct QueueEntry {
    priority: PriorityLevel,
    seq: u64,
    op: Box<dyn Operation>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct OpQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    name: String,
    queue: Mutex<OpQueue>,
    notify: Notify,
    cancel: CancellationToken,
    policy: ProtocolPolicy,
    registry: Arc<ControllerRegistry>,
    sink: Arc<dyn DeviceSink>,
}

impl Shared {
    /// Put a popped entry back with its original sequence number
    fn requeue(&self, entry: QueueEntry) {
        let mut queue = self.queue.lock();
        if queue.closed {
            drop(queue);
            self.finish_cancelled(entry.op);
            return;
        }
        queue.heap.push(entry);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueueEntry> {
        self.queue.lock().heap.pop()
    }

    fn finish_cancelled(&self, mut op: Box<dyn Operation>) {
        op.cancel();
        op.cleanup(self.sink.as_ref());
    }
}

/// Poller for a single communication link
pub struct LinkPoller {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LinkPoller {
    pub fn new(
        name: impl Into<String>,
        policy: ProtocolPolicy,
        registry: Arc<ControllerRegistry>,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        Self::with_cancel(name, policy, registry, sink, CancellationToken::new())
    }

    /// Create a poller stopped by `cancel` (usually a child of the service token)
    pub fn with_cancel(
        name: impl Into<String>,
        policy: ProtocolPolicy,
        registry: Arc<ControllerRegistry>,
        sink: Arc<dyn DeviceSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                queue: Mutex::new(OpQueue::default()),
                notify: Notify::new(),
                cancel,
                policy,
                registry,
                sink,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn policy(&self) -> &ProtocolPolicy {
        &self.shared.policy
    }

    /// Queue an operation
    ///
    /// Returns false when an operation with the same key is already queued
    /// (the new one is dropped) or when the poller has been destroyed (the
    /// new one is failed as cancelled).
    pub fn add_operation(&self, mut op: Box<dyn Operation>) -> bool {
        let key = op.key();
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            drop(queue);
            debug!(link = %self.shared.name, "Rejecting {op}: link closed");
            self.shared.finish_cancelled(op);
            return false;
        }
        if let Some(key) = &key {
            if queue.heap.iter().any(|entry| entry.op.key().as_ref() == Some(key)) {
                drop(queue);
                debug!(link = %self.shared.name, "Dropping duplicate {op}");
                return false;
            }
        }
        op.set_retry_limit(self.shared.policy.max_retries);
        let priority = op.priority();
        debug!(link = %self.shared.name, "Queued {op} at {priority}");
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(QueueEntry { priority, seq, op });
        drop(queue);
        self.shared.notify.notify_one();
        true
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the poller task on `transport`; the transport is opened lazily
    pub fn start(&self, transport: Box<dyn Transport>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!(link = %self.shared.name, "Poller already started");
            return;
        }
        let mut io = LinkIo::new(self.shared.name.clone(), transport);
        io.set_timeout(self.shared.policy.timeout());
        let task = Worker {
            shared: Arc::clone(&self.shared),
            io,
            reconnect: ReconnectHelper::new(self.shared.policy.reconnect.clone()),
            consecutive_failures: 0,
        };
        *worker = Some(tokio::spawn(task.run()));
    }

    /// Fail every queued operation as cancelled, without I/O
    pub fn drain_queue(&self) -> usize {
        let entries: Vec<QueueEntry> = self.shared.queue.lock().heap.drain().collect();
        let count = entries.len();
        for entry in entries {
            self.shared.finish_cancelled(entry.op);
        }
        if count > 0 {
            info!(link = %self.shared.name, "Cancelled {count} queued operations");
        }
        count
    }

    /// Stop the poller: refuse new work, cancel queued operations and let an
    /// in-flight phase finish before its operation is cancelled
    pub fn destroy(&self) -> usize {
        self.shared.queue.lock().closed = true;
        self.shared.cancel.cancel();
        let count = self.drain_queue();
        self.shared.notify.notify_one();
        count
    }

    /// Wait for the poller task to exit
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(link = %self.shared.name, "Poller task ended abnormally: {e}");
            }
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    io: LinkIo,
    reconnect: ReconnectHelper,
    /// Operations in a row that exhausted their retries
    consecutive_failures: u32,
}

impl Worker {
    async fn run(mut self) {
        info!(link = %self.shared.name, "Link poller started");
        loop {
            let entry = match self.shared.pop() {
                Some(entry) => entry,
                None => {
                    tokio::select! {
                        _ = self.shared.notify.notified() => {},
                        _ = self.shared.cancel.cancelled() => break,
                    }
                    continue;
                },
            };
            if self.shared.cancel.is_cancelled() {
                self.shared.finish_cancelled(entry.op);
                continue;
            }
            self.run_operation(entry).await;
        }
        if let Err(e) = self.io.transport().close().await {
            debug!(link = %self.shared.name, "Close on shutdown: {e}");
        }
        info!(link = %self.shared.name, "Link poller stopped");
    }

    async fn run_operation(&mut self, entry: QueueEntry) {
        let QueueEntry { priority, seq, mut op } = entry;
        let controller = Arc::clone(op.controller());
        let Some(_guard) = controller.try_acquire() else {
            debug!(link = %self.shared.name, "{op} waiting: controller busy");
            self.shared.requeue(QueueEntry { priority, seq, op });
            tokio::time::sleep(BUSY_RETRY_DELAY).await;
            return;
        };

        if let Err(error) = self.ensure_open().await {
            op.fail(error);
            op.cleanup(self.shared.sink.as_ref());
            return;
        }
        if let Err(error) = self.io.transport().drain().await {
            let error = CommError::from(error);
            self.link_down(&error).await;
            op.fail(error);
            op.cleanup(self.shared.sink.as_ref());
            return;
        }

        loop {
            match op.poll(&mut self.io).await {
                PollResult::Continue => {
                    if self.shared.cancel.is_cancelled() {
                        op.cancel();
                        break;
                    }
                },
                PollResult::Done => break,
                PollResult::LinkFailed(error) => {
                    self.link_down(&error).await;
                    break;
                },
            }
        }

        let exhausted = op
            .error_status()
            .is_some_and(|error| error.kind() == ErrorKind::Retryable);
        self.track_failures(op.is_success(), exhausted).await;
        op.cleanup(self.shared.sink.as_ref());
    }

    async fn ensure_open(&mut self) -> Result<(), CommError> {
        if self.io.transport_ref().is_open() {
            return Ok(());
        }
        if let Some(wait) = self.reconnect.remaining_backoff() {
            debug!(link = %self.shared.name, "Waiting {wait:?} before reopening");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.shared.cancel.cancelled() => return Err(CommError::Cancelled),
            }
        }
        self.reconnect
            .begin_attempt()
            .map_err(|e| CommError::internal(format!("{}: {e}", self.shared.name)))?;

        match self.io.transport().open().await {
            Ok(()) => {
                self.reconnect.mark_connected();
                self.io.set_timeout(self.shared.policy.timeout());
                Ok(())
            },
            Err(error) => {
                warn!(link = %self.shared.name, "Open failed: {error}");
                self.reconnect.mark_failed();
                self.shared.registry.mark_link_failed(&self.shared.name);
                Err(CommError::from(error))
            },
        }
    }

    async fn link_down(&mut self, error: &CommError) {
        warn!(link = %self.shared.name, "Link down: {error}");
        if let Err(e) = self.io.transport().close().await {
            debug!(link = %self.shared.name, "Close after failure: {e}");
        }
        self.reconnect.mark_disconnected();
        self.consecutive_failures = 0;
        self.shared.registry.mark_link_failed(&self.shared.name);
    }

    /// Close the link after too many operations in a row exhausted retries
    async fn track_failures(&mut self, success: bool, exhausted: bool) {
        if success {
            self.consecutive_failures = 0;
            return;
        }
        if !exhausted {
            return;
        }
        self.consecutive_failures += 1;
        let threshold = self.shared.policy.link_failure_threshold;
        if threshold > 0 && self.consecutive_failures >= threshold {
            let error = CommError::internal(format!(
                "{} consecutive operations failed",
                self.consecutive_failures
            ));
            self.link_down(&error).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::controller::ControllerHandle;
    use crate::error::CommResult;
    use crate::operation::{DeviceOp, OpOutcome, OpPhases};
    use crate::protocols::CommProtocol;
    use crate::reconnect::ReconnectPolicy;
    use crate::sink::RecordingSink;
    use crate::transport::{MockResponse, MockTransport};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Sends one tagged byte and expects it echoed back
    struct Echo {
        tag: u8,
        key: Option<String>,
        done: mpsc::UnboundedSender<(u8, Option<CommError>)>,
    }

    #[async_trait]
    impl OpPhases for Echo {
        type Phase = ();

        fn name(&self) -> &str {
            "echo"
        }

        fn phase_one(&self) {}

        async fn poll(
            &mut self,
            _phase: &(),
            _controller: &ControllerHandle,
            io: &mut LinkIo,
        ) -> CommResult<Option<()>> {
            io.transport().send(&[self.tag]).await?;
            let mut reply = [0u8; 1];
            io.transport().read_exact(&mut reply).await?;
            if reply[0] != self.tag {
                return Err(CommError::checksum(&reply));
            }
            Ok(None)
        }

        fn key(&self, _controller: &ControllerHandle) -> Option<String> {
            self.key.clone()
        }

        fn cleanup(&mut self, _c: &ControllerHandle, outcome: &OpOutcome<'_>, _s: &dyn DeviceSink) {
            let _ = self.done.send((self.tag, outcome.error.cloned()));
        }
    }

    struct Fixture {
        poller: LinkPoller,
        mock: MockTransport,
        registry: Arc<ControllerRegistry>,
        controller: Arc<ControllerHandle>,
        done_tx: mpsc::UnboundedSender<(u8, Option<CommError>)>,
        done_rx: mpsc::UnboundedReceiver<(u8, Option<CommError>)>,
    }

    fn policy() -> ProtocolPolicy {
        ProtocolPolicy {
            max_retries: 1,
            timeout_ms: 50,
            link_failure_threshold: 3,
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }

    fn fixture() -> Fixture {
        fixture_with(policy())
    }

    /// Echoes every byte; tags from 100 up come back corrupted
    fn fixture_with(policy: ProtocolPolicy) -> Fixture {
        let registry = Arc::new(ControllerRegistry::new());
        let controller =
            registry.insert(ControllerHandle::new("ctl1", "link1", 1, CommProtocol::Mndot5));
        let sink = Arc::new(RecordingSink::new());
        let poller = LinkPoller::new("link1", policy, Arc::clone(&registry), sink);
        let mock = MockTransport::new("link1");
        mock.set_responder(|request| match request[0] {
            tag if tag >= 100 => MockResponse::Bytes(vec![tag ^ 0xFF]),
            _ => MockResponse::Bytes(request.to_vec()),
        });
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Fixture {
            poller,
            mock,
            registry,
            controller,
            done_tx,
            done_rx,
        }
    }

    impl Fixture {
        fn echo(&self, tag: u8, priority: PriorityLevel, key: Option<&str>) -> Box<dyn Operation> {
            DeviceOp::boxed(
                Echo {
                    tag,
                    key: key.map(str::to_string),
                    done: self.done_tx.clone(),
                },
                Arc::clone(&self.controller),
                priority,
            )
        }

        async fn next_done(&mut self) -> (u8, Option<CommError>) {
            tokio::time::timeout(Duration::from_secs(5), self.done_rx.recv())
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_priority_order_then_fifo() {
        let mut f = fixture();
        assert!(f.poller.add_operation(f.echo(1, PriorityLevel::Data, None)));
        assert!(f.poller.add_operation(f.echo(2, PriorityLevel::Urgent, None)));
        assert!(f.poller.add_operation(f.echo(3, PriorityLevel::Data, None)));
        assert!(f.poller.add_operation(f.echo(4, PriorityLevel::Command, None)));
        assert!(f.poller.add_operation(f.echo(5, PriorityLevel::Diagnostic, None)));
        f.poller.start(Box::new(f.mock.clone()));

        let mut order = Vec::new();
        for _ in 0..5 {
            let (tag, error) = f.next_done().await;
            assert!(error.is_none());
            order.push(tag);
        }
        assert_eq!(order, vec![2, 4, 1, 3, 5]);
        assert_eq!(f.mock.sent_frames(), vec![vec![2], vec![4], vec![1], vec![3], vec![5]]);
        f.poller.destroy();
        f.poller.join().await;
    }

    #[tokio::test]
    async fn test_duplicate_key_dropped() {
        let f = fixture();
        assert!(f.poller.add_operation(f.echo(1, PriorityLevel::Command, Some("beacon:ctl1"))));
        assert!(!f.poller.add_operation(f.echo(2, PriorityLevel::Command, Some("beacon:ctl1"))));
        assert!(f.poller.add_operation(f.echo(3, PriorityLevel::Command, Some("beacon:ctl2"))));
        assert_eq!(f.poller.queue_len(), 2);
    }

    #[tokio::test]
    async fn test_destroy_cancels_without_io() {
        let mut f = fixture();
        for tag in 1..=3 {
            f.poller.add_operation(f.echo(tag, PriorityLevel::Data, None));
        }
        assert_eq!(f.poller.destroy(), 3);
        for _ in 0..3 {
            let (_, error) = f.next_done().await;
            assert_eq!(error, Some(CommError::Cancelled));
        }
        assert_eq!(f.mock.exchange_count(), 0);
        assert_eq!(f.mock.open_count(), 0);
        assert_eq!(f.controller.counters().failed_ops, 3);

        // closed poller refuses new work
        assert!(!f.poller.add_operation(f.echo(9, PriorityLevel::Urgent, None)));
        assert_eq!(f.next_done().await, (9, Some(CommError::Cancelled)));
    }

    #[tokio::test]
    async fn test_open_failure_then_reopen() {
        let mut f = fixture();
        f.mock.set_fail_open(true);
        f.poller.start(Box::new(f.mock.clone()));

        f.poller.add_operation(f.echo(1, PriorityLevel::Data, None));
        let (_, error) = f.next_done().await;
        assert!(matches!(error, Some(CommError::Transport(_))));
        assert!(f.registry.get("ctl1").unwrap().is_failed());

        f.mock.set_fail_open(false);
        f.poller.add_operation(f.echo(2, PriorityLevel::Data, None));
        assert_eq!(f.next_done().await, (2, None));
        assert!(!f.controller.is_failed());
        assert_eq!(f.mock.open_count(), 1);

        f.poller.destroy();
        f.poller.join().await;
    }

    #[tokio::test]
    async fn test_end_of_channel_closes_link() {
        let mut f = fixture();
        f.mock.push_response(MockResponse::Eof);
        f.poller.start(Box::new(f.mock.clone()));

        f.poller.add_operation(f.echo(1, PriorityLevel::Data, None));
        let (_, error) = f.next_done().await;
        assert!(matches!(
            error,
            Some(CommError::Transport(crate::transport::TransportError::EndOfChannel(_)))
        ));
        assert!(f.controller.is_failed());

        f.poller.add_operation(f.echo(2, PriorityLevel::Data, None));
        assert_eq!(f.next_done().await, (2, None));
        assert_eq!(f.mock.open_count(), 2);

        f.poller.destroy();
        f.poller.join().await;
        assert!(!f.poller.is_running());
    }

    #[tokio::test]
    async fn test_attempt_limit_rests_then_link_recovers() {
        let mut p = policy();
        p.reconnect.max_attempts = 2;
        p.reconnect.initial_delay_ms = 5;
        p.reconnect.max_delay_ms = 200;
        let mut f = fixture_with(p);
        f.mock.set_fail_open(true);
        f.poller.start(Box::new(f.mock.clone()));

        for tag in 1..=2 {
            f.poller.add_operation(f.echo(tag, PriorityLevel::Data, None));
            let (_, error) = f.next_done().await;
            assert!(matches!(error, Some(CommError::Transport(_))));
        }
        // limit reached: refused without touching the transport
        f.poller.add_operation(f.echo(3, PriorityLevel::Data, None));
        let (_, error) = f.next_done().await;
        assert!(matches!(error, Some(CommError::Internal(_))));

        f.mock.set_fail_open(false);
        tokio::time::sleep(Duration::from_millis(250)).await;
        f.poller.add_operation(f.echo(4, PriorityLevel::Data, None));
        assert_eq!(f.next_done().await, (4, None));
        assert_eq!(f.mock.open_count(), 1);
        assert!(f.poller.is_running());

        f.poller.destroy();
        f.poller.join().await;
    }

    #[tokio::test]
    async fn test_failure_threshold_closes_link() {
        let mut f = fixture();
        f.poller.start(Box::new(f.mock.clone()));

        // three ops in a row exhaust their retries on bad replies
        for tag in 101..=103 {
            f.poller.add_operation(f.echo(tag, PriorityLevel::Data, None));
            let (_, error) = f.next_done().await;
            assert!(matches!(error, Some(CommError::Checksum { .. })));
        }
        assert!(!f.mock.is_open());
        assert!(f.controller.is_failed());
        assert_eq!(f.mock.open_count(), 1);

        f.poller.add_operation(f.echo(1, PriorityLevel::Data, None));
        assert_eq!(f.next_done().await, (1, None));
        assert_eq!(f.mock.open_count(), 2);

        // a success in between restarts the count
        for tag in [104, 105, 2, 106, 107, 3] {
            f.poller.add_operation(f.echo(tag, PriorityLevel::Data, None));
            let (done, _) = f.next_done().await;
            assert_eq!(done, tag);
        }
        assert!(f.mock.is_open());
        assert_eq!(f.mock.open_count(), 2);

        f.poller.destroy();
        f.poller.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_adds() {
        let f = fixture();
        let poller = Arc::new(f.poller);
        let adders: Vec<_> = (0..16u8)
            .map(|tag| {
                let op = DeviceOp::boxed(
                    Echo {
                        tag,
                        key: Some("beacon:ctl1".to_string()),
                        done: f.done_tx.clone(),
                    },
                    Arc::clone(&f.controller),
                    PriorityLevel::Command,
                );
                let poller = Arc::clone(&poller);
                tokio::spawn(async move { poller.add_operation(op) })
            })
            .collect();
        let mut accepted = 0;
        for adder in adders {
            if adder.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(poller.queue_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_add_racing_destroy_never_strands_an_op() {
        for _ in 0..50 {
            let f = fixture();
            let ops: Vec<_> = (0..8).map(|tag| f.echo(tag, PriorityLevel::Data, None)).collect();
            let Fixture {
                poller,
                done_tx,
                mut done_rx,
                ..
            } = f;
            drop(done_tx);
            let poller = Arc::new(poller);

            let adders: Vec<_> = ops
                .into_iter()
                .map(|op| {
                    let poller = Arc::clone(&poller);
                    tokio::spawn(async move { poller.add_operation(op) })
                })
                .collect();
            let destroyer = {
                let poller = Arc::clone(&poller);
                tokio::spawn(async move { poller.destroy() })
            };
            for adder in adders {
                adder.await.unwrap();
            }
            destroyer.await.unwrap();

            // every op was either refused or drained, and each was cleaned up
            assert_eq!(poller.queue_len(), 0);
            let mut cleaned = Vec::new();
            while let Some((tag, error)) = done_rx.recv().await {
                assert_eq!(error, Some(CommError::Cancelled));
                cleaned.push(tag);
            }
            cleaned.sort_unstable();
            assert_eq!(cleaned, (0..8).collect::<Vec<u8>>());
        }
    }
}
