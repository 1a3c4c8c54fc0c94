use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reserva_core::clock::Clock;
use reserva_core::{Notifier, ReservationEngine, ReservationStore};

/// Runs the expiry sweep every `period` until `cancel` fires. With `run_on_startup` the first
/// pass happens immediately.
#[must_use]
pub fn spawn<S, N, C>(
    engine: Arc<ReservationEngine<S, N, C>>,
    period: Duration,
    run_on_startup: bool,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: ReservationStore + 'static,
    N: Notifier + 'static,
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let start = if run_on_startup { Instant::now() } else { Instant::now() + period };
        let mut interval = time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            event_name = "sweeper.started",
            period_secs = period.as_secs(),
            run_on_startup,
            "expiry sweeper started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(event_name = "sweeper.stopped", "expiry sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = engine.sweep_expired().await {
                        error!(
                            event_name = "sweeper.run_failed",
                            error = %err,
                            "expiry sweep could not list candidates"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{FixedOffset, NaiveDate, NaiveTime};
    use tokio_util::sync::CancellationToken;

    use reserva_core::{
        CreateReservationRequest, FixedClock, NoopNotifier, ReservationEngine, ReservationStatus,
        TimeSlot, WorkflowStep,
    };
    use reserva_db::InMemoryReservationStore;

    #[tokio::test]
    async fn startup_pass_cancels_expired_reservations_and_stops_on_cancel() {
        let offset = FixedOffset::east_opt(8 * 3600).expect("offset");
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).expect("date");
        let clock = FixedClock::at_local(
            NaiveDate::from_ymd_opt(2025, 3, 1).and_then(|d| d.and_hms_opt(8, 0, 0)).expect("now"),
            offset,
        );
        let engine = Arc::new(ReservationEngine::new(
            InMemoryReservationStore::new(),
            NoopNotifier,
            clock.clone(),
        ));

        let gym = engine.register_resource("Gym", "venue").await.expect("resource");
        engine.set_workflow(gym.id, vec![WorkflowStep::new("a-1", 1)]).await.expect("workflow");
        let created = engine
            .create_reservation(CreateReservationRequest {
                resource_id: gym.id,
                requester_id: reserva_core::UserId::new("u-1"),
                purpose: "Scrimmage".to_owned(),
                slots: vec![TimeSlot::new(
                    day,
                    NaiveTime::from_hms_opt(9, 0, 0).expect("start"),
                    NaiveTime::from_hms_opt(10, 0, 0).expect("end"),
                )],
            })
            .await
            .expect("create");
        clock.set_local(day.and_hms_opt(12, 0, 0).expect("later"));

        let cancel = CancellationToken::new();
        let handle =
            super::spawn(Arc::clone(&engine), Duration::from_secs(3600), true, cancel.clone());

        let mut status = ReservationStatus::Pending;
        for _ in 0..50 {
            status = engine
                .reservation_detail(created.reservation_id)
                .await
                .expect("detail")
                .reservation
                .status;
            if status != ReservationStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ReservationStatus::Cancelled);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .expect("sweeper task should not panic");
    }
}
