use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use reserva_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// `(key path, env override)` for every field `reserva config` reports.
const FIELDS: &[(&str, &str)] = &[
    ("database.url", "RESERVA_DATABASE_URL"),
    ("database.max_connections", "RESERVA_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "RESERVA_DATABASE_TIMEOUT_SECS"),
    ("server.bind_address", "RESERVA_SERVER_BIND_ADDRESS"),
    ("server.port", "RESERVA_SERVER_PORT"),
    ("server.graceful_shutdown_secs", "RESERVA_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("server.admin_token", "RESERVA_SERVER_ADMIN_TOKEN"),
    ("workflow.utc_offset_minutes", "RESERVA_WORKFLOW_UTC_OFFSET_MINUTES"),
    ("workflow.sweep_interval_secs", "RESERVA_WORKFLOW_SWEEP_INTERVAL_SECS"),
    ("workflow.sweep_on_startup", "RESERVA_WORKFLOW_SWEEP_ON_STARTUP"),
    ("logging.level", "RESERVA_LOGGING_LEVEL"),
    ("logging.format", "RESERVA_LOGGING_FORMAT"),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in FIELDS {
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &field_value(&config, key_path), source));
    }

    lines.join("\n")
}

fn field_value(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "server.admin_token" => match &config.server.admin_token {
            Some(token) => redact_token(token.expose_secret()),
            None => "<unset>".to_string(),
        },
        "workflow.utc_offset_minutes" => config.workflow.utc_offset_minutes.to_string(),
        "workflow.sweep_interval_secs" => config.workflow.sweep_interval_secs.to_string(),
        "workflow.sweep_on_startup" => config.workflow.sweep_on_startup.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("reserva.toml"), PathBuf::from("config/reserva.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}
