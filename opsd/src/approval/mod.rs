//! Approval Ledger
//!
//! Tracks human review decisions per Task. A Task counts as approved once any
//! of its requests is APPROVED; later rejections on newer requests do not
//! retract that.

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Approval, Decision, Filter, Task, now_ms};
use crate::error::{OpsError, OpsResult};
use crate::state::StateManager;

/// A PENDING request joined with its Task for operator surfaces
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub approval: Approval,
    pub run_id: Option<i64>,
    pub task_title: Option<String>,
}

#[derive(Clone)]
pub struct ApprovalLedger {
    state: StateManager,
}

impl ApprovalLedger {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    /// Open a PENDING request for `task_id`
    pub async fn create_request(&self, task_id: i64, notes: Option<String>) -> OpsResult<i64> {
        debug!(%task_id, "ApprovalLedger::create_request: called");
        let id = self.state.create(Approval::new(task_id, notes)).await?;
        info!(approval_id = id, %task_id, "Approval requested");
        Ok(id)
    }

    /// Record a decision; `None` notes keep whatever was stored before
    pub async fn review(&self, approval_id: i64, decision: Decision, notes: Option<String>) -> OpsResult<Approval> {
        debug!(%approval_id, %decision, "ApprovalLedger::review: called");
        if decision == Decision::Pending {
            return Err(OpsError::Invalid("a review must approve or reject".to_string()));
        }
        let mut approval: Approval = self.state.get_required(approval_id).await?;

        let now = now_ms();
        approval.decision = decision;
        approval.reviewed_at = Some(now);
        if decision == Decision::Approved {
            approval.approved_at = Some(now);
        }
        if let Some(notes) = notes {
            approval.notes = Some(notes);
        }
        approval.updated_at = now;
        self.state.update(approval.clone()).await?;
        info!(%approval_id, task_id = approval.task_id, %decision, "Approval reviewed");
        Ok(approval)
    }

    pub async fn is_approved(&self, task_id: i64) -> OpsResult<bool> {
        debug!(%task_id, "ApprovalLedger::is_approved: called");
        let approved: Vec<Approval> = self
            .state
            .list(vec![
                Filter::eq("task_id", task_id),
                Filter::eq("decision", Decision::Approved.to_string()),
            ])
            .await?;
        Ok(!approved.is_empty())
    }

    /// Every request for `task_id`, oldest first
    pub async fn for_task(&self, task_id: i64) -> OpsResult<Vec<Approval>> {
        Ok(self.state.list(vec![Filter::eq("task_id", task_id)]).await?)
    }

    /// Most recent request for `task_id`
    pub async fn latest(&self, task_id: i64) -> OpsResult<Option<Approval>> {
        Ok(self.for_task(task_id).await?.pop())
    }

    pub async fn list_pending(&self) -> OpsResult<Vec<PendingApproval>> {
        debug!("ApprovalLedger::list_pending: called");
        let pending: Vec<Approval> = self
            .state
            .list(vec![Filter::eq("decision", Decision::Pending.to_string())])
            .await?;
        let mut joined = Vec::with_capacity(pending.len());
        for approval in pending {
            let task: Option<Task> = self.state.get(approval.task_id).await?;
            joined.push(PendingApproval {
                run_id: task.as_ref().map(|t| t.run_id),
                task_title: task.map(|t| t.title),
                approval,
            });
        }
        Ok(joined)
    }
}
