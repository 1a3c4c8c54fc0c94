//! One-shot run of the expired-reservation sweep, for cron-driven deployments that do not keep
//! the server's periodic sweeper running.

use crate::commands::{load_config, runtime, CommandResult, Failure};
use reserva_core::clock::SystemClock;
use reserva_core::engine::SweepReport;
use reserva_core::notify::NoopNotifier;
use reserva_core::ReservationEngine;
use reserva_db::{connect_with_config, migrations, SqlReservationStore};

pub fn run() -> CommandResult {
    match sweep() {
        Ok(report) => CommandResult::success_with_details(
            "sweep",
            format!(
                "cancelled {} expired reservation(s), {} failure(s)",
                report.cancelled_count, report.failed_count
            ),
            report,
        ),
        Err(failure) => CommandResult::from_failure("sweep", failure),
    }
}

fn sweep() -> Result<SweepReport, Failure> {
    let config = load_config()?;
    let offset = config
        .workflow
        .offset()
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;
    let runtime = runtime()?;

    runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        // No websocket sessions exist in a one-shot process.
        let engine = ReservationEngine::new(
            SqlReservationStore::new(pool.clone()),
            NoopNotifier,
            SystemClock::new(offset),
        );
        let report =
            engine.sweep_expired().await.map_err(|error| ("sweep", error.to_string(), 6u8));
        pool.close().await;
        report
    })
}
