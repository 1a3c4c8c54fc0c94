//! Reservation workflow behaviour, run against both the SQLite and the in-memory store.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tempfile::TempDir;
use tokio::task::JoinSet;

use reserva_core::activity::{EXPIRED_STEP_COMMENT, SWEEP_COMMENT};
use reserva_core::{
    ActOnStepRequest, ActivityAction, Actor, CalendarQuery, CancelReservationRequest,
    CreateReservationRequest, FixedClock, Notification, RecordingNotifier, ReservationEngine,
    ReservationError, ReservationId, ReservationStatus, ReservationStore, ResourceId, StepAction,
    StepStatus, TimeSlot, UserId, WorkflowStep,
};
use reserva_db::{connect_with_settings, migrations, InMemoryReservationStore, SqlReservationStore};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                left, right
            ));
        }
    }};
    ($left:expr, $right:expr, $($arg:tt)*) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err(format!(
                "{} (`{:?}` != `{:?}`)",
                format_args!($($arg)*),
                left,
                right
            ));
        }
    }};
}

macro_rules! contract_tests {
    ($($scenario:ident),* $(,)?) => {
        mod sql_store {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $scenario() -> super::ContractResult {
                    super::$scenario(super::sql_harness().await?).await
                }
            )*
        }

        mod memory_store {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $scenario() -> super::ContractResult {
                    super::$scenario(super::memory_harness()).await
                }
            )*
        }
    };
}

contract_tests!(
    creation_notifies_first_step_and_records_activity,
    later_steps_wait_for_earlier_approvals,
    rejection_at_any_step_is_terminal,
    concurrent_decisions_on_one_step_apply_once,
    terminal_reservations_never_change,
    conflict_detection_is_symmetric_and_ignores_terminal_reservations,
    expiry_wins_over_gating_and_cancels_the_reservation,
    sweep_cancels_only_expired_pending_reservations,
    cancellation_guards_apply_in_order,
    workflow_administration_validates_steps,
    creation_rejects_elapsed_and_malformed_requests,
    read_views_follow_workflow_progress,
    requester_view_and_decision_stats_track_history,
);

type Engine<S> = ReservationEngine<S, RecordingNotifier, FixedClock>;

struct Harness<S> {
    engine: Arc<Engine<S>>,
    notifier: RecordingNotifier,
    clock: FixedClock,
    _dir: Option<TempDir>,
}

fn offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("offset")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).expect("date")
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_time(NaiveTime::from_hms_opt(h, m, 0).expect("time"))
}

fn slot(d: u32, start: (u32, u32), end: (u32, u32)) -> TimeSlot {
    TimeSlot::new(
        day(d),
        NaiveTime::from_hms_opt(start.0, start.1, 0).expect("start"),
        NaiveTime::from_hms_opt(end.0, end.1, 0).expect("end"),
    )
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

fn build<S: ReservationStore>(store: S, dir: Option<TempDir>) -> Harness<S> {
    let notifier = RecordingNotifier::default();
    let clock = FixedClock::at_local(at(1, 8, 0), offset());
    let engine = Arc::new(ReservationEngine::new(store, notifier.clone(), clock.clone()));
    Harness { engine, notifier, clock, _dir: dir }
}

async fn sql_harness() -> ContractResult<Harness<SqlReservationStore>> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("reserva.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    Ok(build(SqlReservationStore::new(pool), Some(dir)))
}

fn memory_harness() -> Harness<InMemoryReservationStore> {
    build(InMemoryReservationStore::new(), None)
}

async fn gym_with_workflow<S: ReservationStore>(
    engine: &Engine<S>,
    approvers: &[&str],
) -> ContractResult<ResourceId> {
    let resource = engine.register_resource("Gym", "venue").await.map_err(|e| e.to_string())?;
    let steps = approvers
        .iter()
        .enumerate()
        .map(|(index, approver)| WorkflowStep::new(*approver, index as u32 + 1))
        .collect();
    engine.set_workflow(resource.id, steps).await.map_err(|e| e.to_string())?;
    Ok(resource.id)
}

async fn reserve<S: ReservationStore>(
    engine: &Engine<S>,
    resource_id: ResourceId,
    requester: &str,
    slots: Vec<TimeSlot>,
) -> Result<ReservationId, ReservationError> {
    engine
        .create_reservation(CreateReservationRequest {
            resource_id,
            requester_id: user(requester),
            purpose: "Varsity practice".to_owned(),
            slots,
        })
        .await
        .map(|created| created.reservation_id)
}

async fn act<S: ReservationStore>(
    engine: &Engine<S>,
    reservation_id: ReservationId,
    step_order: u32,
    approver: &str,
    action: StepAction,
) -> Result<reserva_core::StepActed, ReservationError> {
    let detail = engine.reservation_detail(reservation_id).await?;
    let step = detail
        .steps
        .iter()
        .find(|step| step.step_order == step_order && step.approver_id.as_str() == approver)
        .ok_or_else(|| ReservationError::NotFound(format!("step {step_order}")))?;
    engine
        .act_on_step(ActOnStepRequest {
            approval_step_id: step.id,
            approver_id: user(approver),
            action,
            comment: Some(format!("{approver} decided")),
        })
        .await
}

async fn status_of<S: ReservationStore>(
    engine: &Engine<S>,
    id: ReservationId,
) -> ContractResult<ReservationStatus> {
    engine.reservation_detail(id).await.map(|detail| detail.reservation.status).map_err(|e| e.to_string())
}

async fn creation_notifies_first_step_and_records_activity<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2"]).await?;

    let created = h
        .engine
        .create_reservation(CreateReservationRequest {
            resource_id: gym,
            requester_id: user("u-1"),
            purpose: "  Varsity practice  ".to_owned(),
            slots: vec![slot(11, (9, 0), (11, 0)), slot(10, (14, 0), (16, 0))],
        })
        .await
        .map_err(|e| e.to_string())?;
    require_eq!(created.workflow_steps, 2);
    require_eq!(created.daily_slots_count, 2);

    let detail = h.engine.reservation_detail(created.reservation_id).await.map_err(|e| e.to_string())?;
    require_eq!(detail.reservation.status, ReservationStatus::Pending);
    require_eq!(detail.reservation.purpose, "Varsity practice".to_owned());
    require_eq!(detail.reservation.date_from, day(10));
    require_eq!(detail.reservation.date_to, day(11));
    require!(detail.steps.iter().all(|step| step.status == StepStatus::Pending));

    let first = h.notifier.sent_to(&user("a-1"));
    require_eq!(first.len(), 1);
    match &first[0] {
        Notification::NewReservation { step_order, total_steps, resource_name, .. } => {
            require_eq!(*step_order, 1);
            require_eq!(*total_steps, 2);
            require_eq!(resource_name.as_str(), "Gym");
        }
        other => return Err(format!("unexpected notification {other:?}")),
    }
    require!(h.notifier.sent_to(&user("a-2")).is_empty(), "second approver notified too early");

    let history =
        h.engine.reservation_history(created.reservation_id).await.map_err(|e| e.to_string())?;
    require_eq!(history.len(), 1);
    require_eq!(history[0].action, ActivityAction::Created);
    require_eq!(history[0].actor, Actor::User(user("u-1")));
    require_eq!(history[0].new_status.as_deref(), Some("pending"));
    require_eq!(history[0].metadata.get("resource_name"), Some(&serde_json::json!("Gym")));
    require_eq!(history[0].metadata.get("workflow_steps"), Some(&serde_json::json!(2)));
    Ok(())
}

async fn later_steps_wait_for_earlier_approvals<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2", "a-3"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;

    let early = act(&h.engine, id, 3, "a-3", StepAction::Approved).await;
    require_eq!(
        early,
        Err(ReservationError::PriorStepsIncomplete { step_order: 3, blocking_steps: vec![1, 2] })
    );

    let first = act(&h.engine, id, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;
    require!(!first.fully_approved);
    require_eq!(status_of(&h.engine, id).await?, ReservationStatus::Pending);

    let ready = h.notifier.sent_to(&user("a-2"));
    require_eq!(ready.len(), 1);
    match &ready[0] {
        Notification::ReservationReadyForApproval { step_order, previous_approver_id, .. } => {
            require_eq!(*step_order, 2);
            require_eq!(previous_approver_id, &user("a-1"));
        }
        other => return Err(format!("unexpected notification {other:?}")),
    }
    require!(h.notifier.sent_to(&user("a-3")).is_empty());

    let still_blocked = act(&h.engine, id, 3, "a-3", StepAction::Approved).await;
    require_eq!(
        still_blocked,
        Err(ReservationError::PriorStepsIncomplete { step_order: 3, blocking_steps: vec![2] })
    );

    act(&h.engine, id, 2, "a-2", StepAction::Approved).await.map_err(|e| e.to_string())?;
    let last = act(&h.engine, id, 3, "a-3", StepAction::Approved).await.map_err(|e| e.to_string())?;
    require!(last.fully_approved);

    let detail = h.engine.reservation_detail(id).await.map_err(|e| e.to_string())?;
    require_eq!(detail.reservation.status, ReservationStatus::Approved);
    require!(detail.steps.iter().all(|step| step.status == StepStatus::Approved));
    require!(detail.steps.iter().all(|step| step.acted_at == Some(at(1, 8, 0))));

    let actions: Vec<ActivityAction> = h
        .engine
        .reservation_history(id)
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    require_eq!(
        actions,
        vec![
            ActivityAction::Created,
            ActivityAction::StepApproved,
            ActivityAction::StepApproved,
            ActivityAction::StepApproved,
            ActivityAction::FullyApproved,
        ]
    );
    Ok(())
}

async fn rejection_at_any_step_is_terminal<S: ReservationStore>(h: Harness<S>) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2", "a-3"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;

    act(&h.engine, id, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;
    let rejected =
        act(&h.engine, id, 2, "a-2", StepAction::Rejected).await.map_err(|e| e.to_string())?;
    require!(!rejected.fully_approved);
    require_eq!(status_of(&h.engine, id).await?, ReservationStatus::Rejected);

    let after = act(&h.engine, id, 3, "a-3", StepAction::Approved).await;
    require_eq!(
        after,
        Err(ReservationError::ReservationAlreadyTerminal {
            reservation_id: id,
            status: ReservationStatus::Rejected,
        })
    );

    let history = h.engine.reservation_history(id).await.map_err(|e| e.to_string())?;
    let last = history.last().ok_or("history should not be empty")?;
    require_eq!(last.action, ActivityAction::Rejected);
    require_eq!(last.old_status.as_deref(), Some("pending"));
    require_eq!(last.new_status.as_deref(), Some("rejected"));
    Ok(())
}

async fn concurrent_decisions_on_one_step_apply_once<S: ReservationStore + 'static>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;
    let step_id = h.engine.reservation_detail(id).await.map_err(|e| e.to_string())?.steps[0].id;

    let mut tasks = JoinSet::new();
    for attempt in 0..8 {
        let engine = Arc::clone(&h.engine);
        tasks.spawn(async move {
            engine
                .act_on_step(ActOnStepRequest {
                    approval_step_id: step_id,
                    approver_id: UserId::new("a-1"),
                    action: if attempt % 2 == 0 { StepAction::Approved } else { StepAction::Rejected },
                    comment: None,
                })
                .await
        });
    }

    let mut applied = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| e.to_string())? {
            Ok(_) => applied += 1,
            Err(ReservationError::NotFoundOrNotPending) => {}
            Err(other) => return Err(format!("unexpected error {other:?}")),
        }
    }
    require_eq!(applied, 1);

    let history = h.engine.reservation_history(id).await.map_err(|e| e.to_string())?;
    let decisions = history
        .iter()
        .filter(|entry| {
            matches!(entry.action, ActivityAction::StepApproved | ActivityAction::StepRejected)
        })
        .count();
    let outcomes = history
        .iter()
        .filter(|entry| matches!(entry.action, ActivityAction::FullyApproved | ActivityAction::Rejected))
        .count();
    require_eq!(decisions, 1);
    require_eq!(outcomes, 1);
    require!(status_of(&h.engine, id).await?.is_terminal());
    Ok(())
}

async fn terminal_reservations_never_change<S: ReservationStore>(h: Harness<S>) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;
    act(&h.engine, id, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;

    for action in [StepAction::Approved, StepAction::Rejected] {
        let repeat = act(&h.engine, id, 1, "a-1", action).await;
        require_eq!(repeat, Err(ReservationError::NotFoundOrNotPending), "step already decided");
    }

    let cancel = h
        .engine
        .cancel_reservation(CancelReservationRequest {
            reservation_id: id,
            requester_id: user("u-1"),
            comment: None,
        })
        .await;
    require_eq!(cancel, Err(ReservationError::AlreadyTerminal { status: ReservationStatus::Approved }));

    h.clock.set_local(at(12, 8, 0));
    let report = h.engine.sweep_expired().await.map_err(|e| e.to_string())?;
    require_eq!(report.cancelled_count, 0);
    require_eq!(status_of(&h.engine, id).await?, ReservationStatus::Approved);
    Ok(())
}

async fn conflict_detection_is_symmetric_and_ignores_terminal_reservations<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let first_gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let second_gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let morning = slot(10, (9, 0), (11, 0));
    let late_morning = slot(10, (10, 0), (12, 0));

    let held = reserve(&h.engine, first_gym, "u-1", vec![morning]).await.map_err(|e| e.to_string())?;
    match reserve(&h.engine, first_gym, "u-2", vec![late_morning]).await {
        Err(ReservationError::Conflict(conflicts)) => {
            require_eq!(conflicts.reservation_ids().into_iter().collect::<Vec<_>>(), vec![held]);
        }
        other => return Err(format!("expected conflict, got {other:?}")),
    }

    reserve(&h.engine, second_gym, "u-2", vec![late_morning]).await.map_err(|e| e.to_string())?;
    let reversed = reserve(&h.engine, second_gym, "u-1", vec![morning]).await;
    require!(matches!(reversed, Err(ReservationError::Conflict(_))), "conflict must be symmetric");

    let adjacent = h
        .engine
        .check_availability(first_gym, &[slot(10, (11, 0), (12, 0)), slot(10, (8, 0), (9, 0))])
        .await
        .map_err(|e| e.to_string())?;
    require!(adjacent.available, "touching intervals must not conflict");

    let blocked = h
        .engine
        .check_availability(first_gym, &[slot(10, (10, 30), (10, 45))])
        .await
        .map_err(|e| e.to_string())?;
    require!(!blocked.available);
    require_eq!(blocked.conflicts.conflict_count(), 1);

    h.engine
        .cancel_reservation(CancelReservationRequest {
            reservation_id: held,
            requester_id: user("u-1"),
            comment: Some("moved indoors".to_owned()),
        })
        .await
        .map_err(|e| e.to_string())?;
    reserve(&h.engine, first_gym, "u-2", vec![late_morning])
        .await
        .map_err(|e| format!("cancelled reservation still blocks: {e}"))?;
    Ok(())
}

async fn expiry_wins_over_gating_and_cancels_the_reservation<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0)), slot(11, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;

    h.clock.set_local(at(10, 9, 1));
    let late = act(&h.engine, id, 2, "a-2", StepAction::Approved).await;
    require_eq!(late, Err(ReservationError::Expired { reservation_id: id }));

    let detail = h.engine.reservation_detail(id).await.map_err(|e| e.to_string())?;
    require_eq!(detail.reservation.status, ReservationStatus::Cancelled);
    for step in &detail.steps {
        require_eq!(step.status, StepStatus::Cancelled);
        require_eq!(step.comment.as_deref(), Some(EXPIRED_STEP_COMMENT));
    }

    let history = h.engine.reservation_history(id).await.map_err(|e| e.to_string())?;
    let last = history.last().ok_or("history should not be empty")?;
    require_eq!(last.action, ActivityAction::AutoCancelled);
    require_eq!(last.actor, Actor::System);

    let again = act(&h.engine, id, 1, "a-1", StepAction::Approved).await;
    require_eq!(again, Err(ReservationError::NotFoundOrNotPending), "cancelled steps stay closed");
    Ok(())
}

async fn sweep_cancels_only_expired_pending_reservations<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let expired = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;
    let approved = reserve(&h.engine, gym, "u-1", vec![slot(10, (10, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;
    let upcoming = reserve(&h.engine, gym, "u-1", vec![slot(12, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;
    act(&h.engine, approved, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;

    h.clock.set_local(at(10, 12, 0));
    let report = h.engine.sweep_expired().await.map_err(|e| e.to_string())?;
    require_eq!(report.cancelled_count, 1);
    require_eq!(report.failed_count, 0);

    require_eq!(status_of(&h.engine, expired).await?, ReservationStatus::Cancelled);
    require_eq!(status_of(&h.engine, approved).await?, ReservationStatus::Approved);
    require_eq!(status_of(&h.engine, upcoming).await?, ReservationStatus::Pending);

    let history = h.engine.reservation_history(expired).await.map_err(|e| e.to_string())?;
    let last = history.last().ok_or("history should not be empty")?;
    require_eq!(last.action, ActivityAction::AutoCancelled);
    require_eq!(last.comment.as_deref(), Some(SWEEP_COMMENT));
    require_eq!(last.metadata.get("previous_status"), Some(&serde_json::json!("pending")));

    let second = h.engine.sweep_expired().await.map_err(|e| e.to_string())?;
    require_eq!(second.cancelled_count, 0);
    Ok(())
}

async fn cancellation_guards_apply_in_order<S: ReservationStore>(h: Harness<S>) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2"]).await?;
    let id = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;
    let request = |requester: &str, reservation_id: ReservationId| CancelReservationRequest {
        reservation_id,
        requester_id: user(requester),
        comment: Some("plans changed".to_owned()),
    };

    let missing = h.engine.cancel_reservation(request("u-1", ReservationId(9_999))).await;
    require!(matches!(missing, Err(ReservationError::NotFound(_))));
    let stranger = h.engine.cancel_reservation(request("u-2", id)).await;
    require_eq!(stranger, Err(ReservationError::NotOwner));

    let started = reserve(&h.engine, gym, "u-1", vec![slot(5, (9, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;
    h.clock.set_local(at(5, 9, 0));
    let too_late = h.engine.cancel_reservation(request("u-1", started)).await;
    require_eq!(too_late, Err(ReservationError::AlreadyStarted));

    act(&h.engine, id, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;
    let cancelled =
        h.engine.cancel_reservation(request("u-1", id)).await.map_err(|e| e.to_string())?;
    require_eq!(cancelled.cancelled_steps, 1);

    let detail = h.engine.reservation_detail(id).await.map_err(|e| e.to_string())?;
    require_eq!(detail.reservation.status, ReservationStatus::Cancelled);
    require_eq!(detail.steps[0].status, StepStatus::Approved);
    require_eq!(detail.steps[1].status, StepStatus::Cancelled);

    let history = h.engine.reservation_history(id).await.map_err(|e| e.to_string())?;
    let last = history.last().ok_or("history should not be empty")?;
    require_eq!(last.action, ActivityAction::Cancelled);
    require_eq!(last.comment.as_deref(), Some("plans changed"));

    let twice = h.engine.cancel_reservation(request("u-1", id)).await;
    require_eq!(twice, Err(ReservationError::AlreadyTerminal { status: ReservationStatus::Cancelled }));
    Ok(())
}

async fn workflow_administration_validates_steps<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = h.engine.register_resource("Gym", "venue").await.map_err(|e| e.to_string())?;

    let unconfigured = reserve(&h.engine, gym.id, "u-1", vec![slot(10, (9, 0), (10, 0))]).await;
    require_eq!(unconfigured, Err(ReservationError::NoWorkflow));

    let empty = h.engine.set_workflow(gym.id, Vec::new()).await;
    require!(matches!(empty, Err(ReservationError::Validation(_))));
    let zero = h.engine.set_workflow(gym.id, vec![WorkflowStep::new("a-1", 0)]).await;
    require!(matches!(zero, Err(ReservationError::Validation(_))));
    let blank = h.engine.set_workflow(gym.id, vec![WorkflowStep::new(" ", 1)]).await;
    require!(matches!(blank, Err(ReservationError::Validation(_))));
    let missing = h.engine.get_workflow(ResourceId(9_999)).await;
    require!(matches!(missing, Err(ReservationError::NotFound(_))));

    let stored = h
        .engine
        .set_workflow(gym.id, vec![WorkflowStep::new("a-2", 2), WorkflowStep::new("a-1", 1)])
        .await
        .map_err(|e| e.to_string())?;
    require_eq!(stored, vec![WorkflowStep::new("a-1", 1), WorkflowStep::new("a-2", 2)]);
    require_eq!(h.engine.get_workflow(gym.id).await.map_err(|e| e.to_string())?, stored);

    let pending = reserve(&h.engine, gym.id, "u-1", vec![slot(10, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;

    h.engine.clear_workflow(gym.id).await.map_err(|e| e.to_string())?;
    require!(h.engine.get_workflow(gym.id).await.map_err(|e| e.to_string())?.is_empty());
    let after_clear = reserve(&h.engine, gym.id, "u-1", vec![slot(11, (9, 0), (10, 0))]).await;
    require_eq!(after_clear, Err(ReservationError::NoWorkflow));

    let detail = h.engine.reservation_detail(pending).await.map_err(|e| e.to_string())?;
    require_eq!(detail.steps.len(), 2, "existing reservations keep their steps");
    Ok(())
}

async fn creation_rejects_elapsed_and_malformed_requests<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    h.clock.set_local(at(10, 12, 0));

    let yesterday = reserve(&h.engine, gym, "u-1", vec![slot(9, (9, 0), (10, 0))]).await;
    require!(matches!(yesterday, Err(ReservationError::Validation(_))));

    let ended_today = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (11, 0))]).await;
    require!(matches!(ended_today, Err(ReservationError::Validation(_))));

    reserve(&h.engine, gym, "u-1", vec![slot(10, (11, 0), (13, 0))])
        .await
        .map_err(|e| format!("a slot still running today should be accepted: {e}"))?;

    let inverted = reserve(&h.engine, gym, "u-1", vec![slot(11, (10, 0), (9, 0))]).await;
    require!(matches!(inverted, Err(ReservationError::Validation(_))));
    let overlapping_self =
        reserve(&h.engine, gym, "u-1", vec![slot(12, (9, 0), (11, 0)), slot(12, (10, 0), (12, 0))])
            .await;
    require!(matches!(overlapping_self, Err(ReservationError::Validation(_))));
    let no_slots = reserve(&h.engine, gym, "u-1", Vec::new()).await;
    require!(matches!(no_slots, Err(ReservationError::Validation(_))));

    let blank_purpose = h
        .engine
        .create_reservation(CreateReservationRequest {
            resource_id: gym,
            requester_id: user("u-1"),
            purpose: "   ".to_owned(),
            slots: vec![slot(12, (9, 0), (10, 0))],
        })
        .await;
    require!(matches!(blank_purpose, Err(ReservationError::Validation(_))));

    let unknown = reserve(&h.engine, ResourceId(9_999), "u-1", vec![slot(12, (9, 0), (10, 0))]).await;
    require!(matches!(unknown, Err(ReservationError::NotFound(_))));
    Ok(())
}

async fn read_views_follow_workflow_progress<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2"]).await?;
    let first = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;
    h.clock.advance(Duration::minutes(5));
    let second = reserve(&h.engine, gym, "u-2", vec![slot(14, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;

    let inbox = h.engine.pending_for_approver(&user("a-1")).await.map_err(|e| e.to_string())?;
    let inbox_ids: Vec<ReservationId> = inbox.iter().map(|item| item.reservation.id).collect();
    require_eq!(inbox_ids, vec![second, first]);
    require!(inbox.iter().all(|item| item.total_steps == 2 && item.resource_name == "Gym"));

    act(&h.engine, first, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;
    act(&h.engine, second, 1, "a-1", StepAction::Rejected).await.map_err(|e| e.to_string())?;

    require!(h.engine.pending_for_approver(&user("a-1")).await.map_err(|e| e.to_string())?.is_empty());
    let later_inbox = h.engine.pending_for_approver(&user("a-2")).await.map_err(|e| e.to_string())?;
    require_eq!(later_inbox.len(), 1);
    require_eq!(later_inbox[0].reservation.id, first);

    let decisions = h.engine.decisions_by_approver(&user("a-1")).await.map_err(|e| e.to_string())?;
    require_eq!(decisions.len(), 2);
    require!(decisions.iter().all(|decision| decision.resource_name == "Gym"));

    let march = CalendarQuery { from: day(1), to: day(31), resource_id: Some(gym) };
    let calendar = h.engine.calendar(&march).await.map_err(|e| e.to_string())?;
    require_eq!(calendar.len(), 1, "rejected reservations leave the calendar");
    require_eq!(calendar[0].reservation.id, first);
    require_eq!(calendar[0].slots, vec![slot(10, (9, 0), (10, 0))]);

    let outside = CalendarQuery { from: day(11), to: day(13), resource_id: None };
    require!(h.engine.calendar(&outside).await.map_err(|e| e.to_string())?.is_empty());

    let inverted = CalendarQuery { from: day(13), to: day(11), resource_id: None };
    require!(matches!(h.engine.calendar(&inverted).await, Err(ReservationError::Validation(_))));

    let missing = h.engine.reservation_history(ReservationId(9_999)).await;
    require!(matches!(missing, Err(ReservationError::NotFound(_))));
    Ok(())
}

async fn requester_view_and_decision_stats_track_history<S: ReservationStore>(
    h: Harness<S>,
) -> ContractResult {
    let gym = gym_with_workflow(&h.engine, &["a-1", "a-2"]).await?;
    let first = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;
    h.clock.advance(Duration::minutes(5));
    reserve(&h.engine, gym, "u-2", vec![slot(12, (9, 0), (10, 0))]).await.map_err(|e| e.to_string())?;
    h.clock.advance(Duration::minutes(5));
    let second = reserve(&h.engine, gym, "u-1", vec![slot(14, (13, 0), (15, 0))])
        .await
        .map_err(|e| e.to_string())?;

    act(&h.engine, first, 1, "a-1", StepAction::Approved).await.map_err(|e| e.to_string())?;
    h.clock.advance(Duration::days(2));
    act(&h.engine, second, 1, "a-1", StepAction::Rejected).await.map_err(|e| e.to_string())?;

    let mine = h.engine.reservations_for_requester(&user("u-1")).await.map_err(|e| e.to_string())?;
    let ids: Vec<ReservationId> = mine.iter().map(|item| item.reservation.id).collect();
    require_eq!(ids, vec![second, first], "newest reservation comes first");
    require!(mine.iter().all(|item| item.resource_name == "Gym" && item.steps.len() == 2));
    require_eq!(mine[0].reservation.status, ReservationStatus::Rejected);
    require_eq!(mine[0].slots, vec![slot(14, (13, 0), (15, 0))]);
    require_eq!(mine[1].steps[0].status, StepStatus::Approved);
    require_eq!(mine[1].steps[1].status, StepStatus::Pending);
    require!(h.engine.reservations_for_requester(&user("u-9")).await.map_err(|e| e.to_string())?.is_empty());

    let month = h.engine.decision_stats(&user("a-1"), 30).await.map_err(|e| e.to_string())?;
    require_eq!((month.totals.total, month.totals.approved, month.totals.rejected), (2, 1, 1));
    let days: Vec<NaiveDate> = month.daily.iter().map(|entry| entry.date).collect();
    require_eq!(days, vec![day(3), day(1)], "daily counts run newest day first");

    let yesterday = h.engine.decision_stats(&user("a-1"), 1).await.map_err(|e| e.to_string())?;
    require_eq!((yesterday.totals.total, yesterday.totals.rejected), (1, 1));

    let idle = h.engine.decision_stats(&user("a-2"), 30).await.map_err(|e| e.to_string())?;
    require_eq!(idle.totals.total, 0);
    require!(matches!(h.engine.decision_stats(&user("a-1"), 0).await, Err(ReservationError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn sweep_reports_per_reservation_failures_and_keeps_going() -> ContractResult {
    let store = InMemoryReservationStore::new();
    let h = build(store.clone(), None);
    let gym = gym_with_workflow(&h.engine, &["a-1"]).await?;
    let broken = reserve(&h.engine, gym, "u-1", vec![slot(10, (9, 0), (10, 0))])
        .await
        .map_err(|e| e.to_string())?;
    let healthy = reserve(&h.engine, gym, "u-2", vec![slot(10, (10, 0), (11, 0))])
        .await
        .map_err(|e| e.to_string())?;

    store.fail_on_reservation(broken).await;
    h.clock.set_local(at(11, 0, 0));
    let report = h.engine.sweep_expired().await.map_err(|e| e.to_string())?;

    require_eq!(report.cancelled_count, 1);
    require_eq!(report.failed_count, 1);
    require_eq!(status_of(&h.engine, healthy).await?, ReservationStatus::Cancelled);
    require_eq!(status_of(&h.engine, broken).await?, ReservationStatus::Pending);
    Ok(())
}
