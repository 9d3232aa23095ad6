//! External control of a running session.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::SchedulerFailure;
use super::session::{SessionSummary, StatusReport};

/// Requested scheduler state. Observed only at round boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Stop,
}

/// Cloneable control surface for a session.
#[derive(Debug, Clone)]
pub struct ArenaController {
    session_id: Uuid,
    control: Arc<watch::Sender<Control>>,
    report: Arc<RwLock<StatusReport>>,
}

impl ArenaController {
    pub(crate) fn new(
        session_id: Uuid,
        control: watch::Sender<Control>,
        report: Arc<RwLock<StatusReport>>,
    ) -> Self {
        Self {
            session_id,
            control: Arc::new(control),
            report,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Suspend after the in-flight round, if any, completes.
    pub fn pause(&self) {
        self.request(Control::Pause);
    }

    /// Continue a paused session.
    pub fn resume(&self) {
        self.request(Control::Run);
    }

    /// Stop after the in-flight round; a final checkpoint and export follow.
    pub fn stop(&self) {
        self.control.send_replace(Control::Stop);
    }

    fn request(&self, next: Control) {
        // Stop is final
        self.control.send_if_modified(|current| {
            if *current == Control::Stop || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn status(&self) -> StatusReport {
        self.report.read().clone()
    }
}

/// Handle to a spawned session.
#[derive(Debug)]
pub struct ArenaHandle {
    controller: ArenaController,
    task: JoinHandle<SessionSummary>,
}

impl ArenaHandle {
    pub(crate) fn new(controller: ArenaController, task: JoinHandle<SessionSummary>) -> Self {
        Self { controller, task }
    }

    pub fn session_id(&self) -> Uuid {
        self.controller.session_id()
    }

    /// A cloneable controller, e.g. for a signal handler.
    pub fn controller(&self) -> ArenaController {
        self.controller.clone()
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn status(&self) -> StatusReport {
        self.controller.status()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to reach a terminal state.
    pub async fn join(self) -> Result<SessionSummary, SchedulerFailure> {
        self.task
            .await
            .map_err(|e| SchedulerFailure::Task(e.to_string()))
    }
}
