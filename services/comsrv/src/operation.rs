//! Multi-phase device operations
//!
//! A device operation is a small state machine: each phase performs one
//! exchange and names the phase that follows. [`DeviceOp`] wraps the
//! protocol-specific phases with the shared bookkeeping: retry budget,
//! completion state, error status and exactly-once cleanup.
//!
//! Retry classification:
//! - retryable errors (timeout, checksum, parsing, drop mismatch) repeat the
//!   same phase until the protocol retry limit is exceeded, then fail the
//!   operation and mark the controller failed
//! - controller faults fail the operation immediately
//! - link errors fail the operation and take the link down

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::ControllerHandle;
use crate::error::{CommError, CommResult, ErrorKind};
use crate::message::LinkIo;
use crate::priority::PriorityLevel;
use crate::sink::DeviceSink;

/// Final state passed to phase cleanup
#[derive(Debug)]
pub struct OpOutcome<'a> {
    pub success: bool,
    pub error: Option<&'a CommError>,
}

/// Protocol-specific phases of an operation
#[async_trait]
pub trait OpPhases: Send + 'static {
    type Phase: Clone + fmt::Debug + Send + Sync;

    /// Short description for logs
    fn name(&self) -> &str;

    fn phase_one(&self) -> Self::Phase;

    /// Run one phase; `Ok(None)` completes the operation
    async fn poll(
        &mut self,
        phase: &Self::Phase,
        controller: &ControllerHandle,
        io: &mut LinkIo,
    ) -> CommResult<Option<Self::Phase>>;

    /// Deduplication key; a queued operation with the same key suppresses
    /// newly added ones
    fn key(&self, _controller: &ControllerHandle) -> Option<String> {
        None
    }

    /// Publish results; runs exactly once after the operation is done
    fn cleanup(
        &mut self,
        _controller: &ControllerHandle,
        _outcome: &OpOutcome<'_>,
        _sink: &dyn DeviceSink,
    ) {
    }
}

/// Result of polling one phase
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// More phases remain
    Continue,
    /// Operation finished (successfully or not)
    Done,
    /// Operation failed because the link is unusable
    LinkFailed(CommError),
}

/// Queue-facing view of an operation
#[async_trait]
pub trait Operation: Send + fmt::Display {
    fn priority(&self) -> PriorityLevel;

    fn controller(&self) -> &Arc<ControllerHandle>;

    fn key(&self) -> Option<String>;

    /// Retry budget for retryable errors, set by the link from its policy
    fn set_retry_limit(&mut self, limit: u32);

    fn is_done(&self) -> bool;

    fn is_success(&self) -> bool;

    fn error_status(&self) -> Option<&CommError>;

    async fn poll(&mut self, io: &mut LinkIo) -> PollResult;

    /// Fail without further I/O
    fn fail(&mut self, error: CommError);

    /// Fail with a cancellation error unless already done
    fn cancel(&mut self) {
        if !self.is_done() {
            self.fail(CommError::Cancelled);
        }
    }

    /// Publish results and update counters; effective once
    fn cleanup(&mut self, sink: &dyn DeviceSink);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Running,
    Done { success: bool },
}

/// Generic operation driving a set of phases
pub struct DeviceOp<T: OpPhases> {
    phases: T,
    controller: Arc<ControllerHandle>,
    priority: PriorityLevel,
    phase: Option<T::Phase>,
    retries: u32,
    retry_limit: u32,
    state: OpState,
    error: Option<CommError>,
    cleaned_up: bool,
}

impl<T: OpPhases> DeviceOp<T> {
    pub fn new(phases: T, controller: Arc<ControllerHandle>, priority: PriorityLevel) -> Self {
        let phase = phases.phase_one();
        Self {
            phases,
            controller,
            priority,
            phase: Some(phase),
            retries: 0,
            retry_limit: 0,
            state: OpState::Running,
            error: None,
            cleaned_up: false,
        }
    }

    /// Box the operation for queueing
    pub fn boxed(
        phases: T,
        controller: Arc<ControllerHandle>,
        priority: PriorityLevel,
    ) -> Box<dyn Operation> {
        Box::new(Self::new(phases, controller, priority))
    }

    pub fn phases(&self) -> &T {
        &self.phases
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn finish(&mut self, success: bool) {
        self.phase = None;
        self.state = OpState::Done { success };
    }
}

impl<T: OpPhases> fmt::Display for DeviceOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.phases.name(), self.controller.name())
    }
}

#[async_trait]
impl<T: OpPhases> Operation for DeviceOp<T> {
    fn priority(&self) -> PriorityLevel {
        self.priority
    }

    fn controller(&self) -> &Arc<ControllerHandle> {
        &self.controller
    }

    fn key(&self) -> Option<String> {
        self.phases.key(&self.controller)
    }

    fn set_retry_limit(&mut self, limit: u32) {
        self.retry_limit = limit;
    }

    fn is_done(&self) -> bool {
        matches!(self.state, OpState::Done { .. })
    }

    fn is_success(&self) -> bool {
        matches!(self.state, OpState::Done { success: true })
    }

    fn error_status(&self) -> Option<&CommError> {
        self.error.as_ref()
    }

    async fn poll(&mut self, io: &mut LinkIo) -> PollResult {
        let Some(phase) = self.phase.clone() else {
            return PollResult::Done;
        };
        debug!(controller = %self.controller.name(), "{} phase {:?}", self.phases.name(), phase);

        match self.phases.poll(&phase, &self.controller, io).await {
            Ok(Some(next)) => {
                self.phase = Some(next);
                PollResult::Continue
            },
            Ok(None) => {
                self.controller.set_failed(false);
                self.finish(true);
                PollResult::Done
            },
            Err(error) => {
                self.controller.record_error(&error);
                match error.kind() {
                    ErrorKind::Retryable => {
                        self.retries += 1;
                        if self.retries > self.retry_limit {
                            warn!(
                                controller = %self.controller.name(),
                                "{} failed after {} attempts: {error}",
                                self.phases.name(),
                                self.retries
                            );
                            self.controller.set_failed(true);
                            self.fail(error);
                            PollResult::Done
                        } else {
                            debug!(
                                controller = %self.controller.name(),
                                "{} retry {}/{}: {error}",
                                self.phases.name(),
                                self.retries,
                                self.retry_limit
                            );
                            PollResult::Continue
                        }
                    },
                    ErrorKind::Link => {
                        self.fail(error.clone());
                        PollResult::LinkFailed(error)
                    },
                    ErrorKind::Fault | ErrorKind::Cancelled => {
                        let name = self.controller.name();
                        warn!(controller = %name, "{}: {error}", self.phases.name());
                        self.fail(error);
                        PollResult::Done
                    },
                }
            },
        }
    }

    fn fail(&mut self, error: CommError) {
        if self.is_done() {
            return;
        }
        self.error = Some(error);
        self.finish(false);
    }

    fn cleanup(&mut self, sink: &dyn DeviceSink) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if !self.is_done() {
            self.fail(CommError::internal("cleanup before completion"));
        }
        let success = self.is_success();
        self.controller.record_completion(success);
        match &self.error {
            None => info!(controller = %self.controller.name(), "{} complete", self.phases.name()),
            Some(CommError::Cancelled) => {
                info!(controller = %self.controller.name(), "{} cancelled", self.phases.name())
            },
            Some(error) => {
                let name = self.controller.name();
                warn!(controller = %name, "{} failed: {error}", self.phases.name())
            },
        }
        let outcome = OpOutcome {
            success,
            error: self.error.as_ref(),
        };
        self.phases.cleanup(&self.controller, &outcome, sink);
    }
}
