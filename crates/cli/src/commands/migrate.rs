use crate::commands::{load_config, runtime, CommandResult, Failure};
use reserva_db::{connect_with_config, migrations};

pub fn run() -> CommandResult {
    match apply() {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => CommandResult::from_failure("migrate", failure),
    }
}

fn apply() -> Result<(), Failure> {
    let config = load_config()?;
    let runtime = runtime()?;

    runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(())
    })
}
