//! The report/status surface (`spec.md` §4.5, C5).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasker_orchestrator_shared::{AbortCause, Destination};

/// A value snapshot of one task's observable state - it does not alias any
/// mutable orchestrator state, per `spec.md` §4.5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub index: u32,
    pub name: String,
    pub dependencies: Vec<u32>,
    pub state: ReportedState,
    pub destination: Option<Destination>,
    pub result: Option<Value>,
}

/// `TaskState` projected into a serializable, comparable shape for the
/// status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportedState {
    Unstarted,
    Waiting,
    Finished,
    Aborted(AbortCause),
}

/// The response to a `Status` command: one `Report` per task, in task-index
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub reports: Vec<Report>,
}

impl StatusResponse {
    pub fn report_for(&self, index: u32) -> Option<&Report> {
        self.reports.iter().find(|report| report.index == index)
    }

    pub fn all_finished(&self) -> bool {
        self.reports
            .iter()
            .all(|report| matches!(report.state, ReportedState::Finished))
    }

    pub fn first_aborted(&self) -> Option<&Report> {
        self.reports
            .iter()
            .find(|report| matches!(report.state, ReportedState::Aborted(_)))
    }
}
