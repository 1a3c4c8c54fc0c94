use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

/// One approver position in a resource's approval chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub approver_id: UserId,
    pub step_order: u32,
}

impl WorkflowStep {
    pub fn new(approver_id: impl Into<String>, step_order: u32) -> Self {
        Self { approver_id: UserId::new(approver_id), step_order }
    }
}

/// Checks a replacement workflow before it is stored.
///
/// Orders are not renumbered. Gaps and repeats are stored as given and gating compares the raw
/// numbers, so two steps sharing an order may be decided in either sequence.
pub fn validate_workflow(steps: &[WorkflowStep]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("workflow must contain at least one step".to_owned());
    }

    for step in steps {
        if step.approver_id.as_str().trim().is_empty() {
            return Err(format!("step {} has no approver", step.step_order));
        }
        if step.step_order < 1 {
            return Err("step order must start at 1".to_owned());
        }
    }

    Ok(())
}

/// Returns the steps sorted by `step_order`.
pub fn ordered(mut steps: Vec<WorkflowStep>) -> Vec<WorkflowStep> {
    steps.sort_by_key(|step| step.step_order);
    steps
}

#[cfg(test)]
mod tests {
    use super::{ordered, validate_workflow, WorkflowStep};

    #[test]
    fn rejects_empty_missing_approver_and_zero_order() {
        assert!(validate_workflow(&[]).is_err());
        assert!(validate_workflow(&[WorkflowStep::new("  ", 1)]).is_err());
        assert!(validate_workflow(&[WorkflowStep::new("dean", 0)]).is_err());
    }

    #[test]
    fn keeps_gaps_and_repeated_orders_as_given() {
        let repeated = [WorkflowStep::new("a", 1), WorkflowStep::new("b", 1)];
        assert!(validate_workflow(&repeated).is_ok());

        let gapped = [WorkflowStep::new("a", 1), WorkflowStep::new("b", 3)];
        assert!(validate_workflow(&gapped).is_ok());
    }

    #[test]
    fn ordered_sorts_by_step_order() {
        let steps = ordered(vec![WorkflowStep::new("b", 2), WorkflowStep::new("a", 1)]);
        assert_eq!(steps[0].approver_id.as_str(), "a");
        assert_eq!(steps[1].step_order, 2);
    }
}
