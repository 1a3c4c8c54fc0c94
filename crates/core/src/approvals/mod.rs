use crate::domain::reservation::{ApprovalStep, StepStatus};
use crate::domain::user::UserId;

/// Why a step may not be decided yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateFailure {
    PriorStepsIncomplete { step_order: u32, blocking_steps: Vec<u32> },
}

/// Sequential gating over one reservation's steps.
///
/// A step may be decided only when every step with a strictly lower `step_order` is approved.
/// Orders are compared as stored, so steps sharing an order do not gate each other.
pub struct ApprovalGate<'a> {
    steps: &'a [ApprovalStep],
}

impl<'a> ApprovalGate<'a> {
    pub fn new(steps: &'a [ApprovalStep]) -> Self {
        Self { steps }
    }

    pub fn blocking_steps(&self, step_order: u32) -> Vec<u32> {
        let mut blocking: Vec<u32> = self
            .steps
            .iter()
            .filter(|step| step.step_order < step_order && step.status != StepStatus::Approved)
            .map(|step| step.step_order)
            .collect();
        blocking.sort_unstable();
        blocking.dedup();
        blocking
    }

    pub fn evaluate(&self, step_order: u32) -> Result<(), GateFailure> {
        let blocking_steps = self.blocking_steps(step_order);
        if blocking_steps.is_empty() {
            return Ok(());
        }

        Err(GateFailure::PriorStepsIncomplete { step_order, blocking_steps })
    }

    pub fn pending_count(&self) -> usize {
        self.steps.iter().filter(|step| step.status == StepStatus::Pending).count()
    }

    /// Approvers of the pending steps at exactly `step_order + 1`.
    pub fn next_approvers(&self, step_order: u32) -> Vec<&'a UserId> {
        let next = step_order.saturating_add(1);
        self.steps
            .iter()
            .filter(|step| step.step_order == next && step.status == StepStatus::Pending)
            .map(|step| &step.approver_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::reservation::{ApprovalStep, ApprovalStepId, ReservationId, StepStatus};
    use crate::domain::user::UserId;

    use super::{ApprovalGate, GateFailure};

    fn step(order: u32, approver: &str, status: StepStatus) -> ApprovalStep {
        ApprovalStep {
            id: ApprovalStepId(i64::from(order)),
            reservation_id: ReservationId(1),
            step_order: order,
            approver_id: UserId::new(approver),
            status,
            acted_at: None,
            comment: None,
        }
    }

    #[test]
    fn first_step_is_never_blocked() {
        let steps = [step(1, "a", StepStatus::Pending), step(2, "b", StepStatus::Pending)];

        assert_eq!(ApprovalGate::new(&steps).evaluate(1), Ok(()));
    }

    #[test]
    fn later_step_waits_for_every_earlier_step() {
        let steps = [
            step(1, "a", StepStatus::Approved),
            step(2, "b", StepStatus::Pending),
            step(3, "c", StepStatus::Pending),
        ];

        assert_eq!(
            ApprovalGate::new(&steps).evaluate(3),
            Err(GateFailure::PriorStepsIncomplete { step_order: 3, blocking_steps: vec![2] })
        );
    }

    #[test]
    fn rejected_or_cancelled_predecessors_also_block() {
        let steps = [step(1, "a", StepStatus::Rejected), step(2, "b", StepStatus::Pending)];
        assert_eq!(ApprovalGate::new(&steps).blocking_steps(2), vec![1]);

        let steps = [step(1, "a", StepStatus::Cancelled), step(2, "b", StepStatus::Pending)];
        assert_eq!(ApprovalGate::new(&steps).blocking_steps(2), vec![1]);
    }

    #[test]
    fn shared_order_does_not_gate_itself() {
        let steps = [step(1, "a", StepStatus::Pending), step(1, "b", StepStatus::Pending)];

        assert!(ApprovalGate::new(&steps).evaluate(1).is_ok());
    }

    #[test]
    fn next_approvers_use_the_literal_following_order() {
        let steps = [
            step(1, "a", StepStatus::Approved),
            step(2, "b", StepStatus::Pending),
            step(4, "d", StepStatus::Pending),
        ];
        let gate = ApprovalGate::new(&steps);

        assert_eq!(gate.next_approvers(1), vec![&UserId::new("b")]);
        assert!(gate.next_approvers(2).is_empty());
        assert_eq!(gate.pending_count(), 2);
    }
}
