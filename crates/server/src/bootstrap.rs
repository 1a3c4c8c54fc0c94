use std::sync::Arc;

use reserva_core::clock::{Clock, SystemClock};
use reserva_core::config::{AppConfig, ConfigError, LoadOptions};
use reserva_core::ReservationEngine;
use reserva_db::{connect_with_config, migrations, DbPool, SqlReservationStore};
use thiserror::Error;
use tracing::info;

use crate::api::AppEngine;
use crate::notifications::NotificationHub;

pub struct Application {
    pub config: Arc<AppConfig>,
    pub db_pool: DbPool,
    pub engine: Arc<AppEngine>,
    pub hub: NotificationHub,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let offset = config.workflow.offset()?;

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let hub = NotificationHub::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));
    let engine = Arc::new(ReservationEngine::new(
        SqlReservationStore::new(db_pool.clone()),
        hub.clone(),
        clock,
    ));

    Ok(Application { config: Arc::new(config), db_pool, engine, hub })
}

#[cfg(test)]
mod tests {
    use reserva_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str, admin_token: Option<&str>) -> LoadOptions {
        LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                admin_token: admin_token.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_short_admin_token() {
        let result = bootstrap(options("sqlite::memory:", Some("short"))).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("admin_token"), "unexpected message: {message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_engine() {
        let app = bootstrap(options("sqlite::memory:", None)).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('reservation', 'daily_slot', 'approval_step', 'activity_log')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected reservation tables after bootstrap");
        assert_eq!(table_count, 4);

        let resource = app.engine.register_resource("Gym", "venue").await.expect("resource");
        assert_eq!(app.engine.get_workflow(resource.id).await.expect("workflow"), Vec::new());

        app.db_pool.close().await;
    }
}
