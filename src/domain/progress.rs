use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{RequirementTemplate, Submission, SubmissionKind, SubmissionStatus};

/// Approved requirements over active templates for one student.
///
/// The denominator is template-driven so requirements a student never
/// submitted still count against completion. Only approvals of active
/// templates count, one per template; ad hoc uploads never do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionRatio {
    pub approved: usize,
    pub total: usize,
}

impl CompletionRatio {
    pub fn compute(templates: &[RequirementTemplate], submissions: &[Submission]) -> Self {
        let active: HashSet<Uuid> = templates
            .iter()
            .filter(|t| t.active)
            .map(|t| t.id)
            .collect();
        let total = active.len();

        let approved: HashSet<Uuid> = submissions
            .iter()
            .filter(|s| s.kind == SubmissionKind::Requirement)
            .filter(|s| s.status == SubmissionStatus::Approved)
            .filter_map(|s| s.template_id)
            .filter(|id| active.contains(id))
            .collect();

        Self {
            approved: approved.len(),
            total,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.approved as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.approved == self.total
    }
}

impl std::fmt::Display for CompletionRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.approved, self.total)
    }
}
