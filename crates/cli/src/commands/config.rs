use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use airloop_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One reported setting: dotted key, effective value, overriding env vars.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", setting.key, setting.value));
    }

    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    vec![
        Setting {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["AIRLOOP_DATABASE_URL"],
        },
        Setting {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["AIRLOOP_DATABASE_MAX_CONNECTIONS"],
        },
        Setting {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["AIRLOOP_DATABASE_TIMEOUT_SECS"],
        },
        Setting {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["AIRLOOP_SERVER_BIND_ADDRESS"],
        },
        Setting {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["AIRLOOP_SERVER_PORT"],
        },
        Setting {
            key: "server.graceful_shutdown_secs",
            value: config.server.graceful_shutdown_secs.to_string(),
            env_keys: &["AIRLOOP_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Setting {
            key: "agents.model",
            value: config.agents.model.clone(),
            env_keys: &["AIRLOOP_AGENTS_MODEL"],
        },
        Setting {
            key: "agents.max_turns",
            value: config.agents.max_turns.to_string(),
            env_keys: &["AIRLOOP_AGENTS_MAX_TURNS"],
        },
        Setting {
            key: "agents.invoke_timeout_secs",
            value: config.agents.invoke_timeout_secs.to_string(),
            env_keys: &["AIRLOOP_AGENTS_INVOKE_TIMEOUT_SECS"],
        },
        Setting {
            key: "agents.guardrail_timeout_secs",
            value: config.agents.guardrail_timeout_secs.to_string(),
            env_keys: &["AIRLOOP_AGENTS_GUARDRAIL_TIMEOUT_SECS"],
        },
        Setting {
            key: "agents.refusal_message",
            value: format!("{:?}", config.agents.refusal_message),
            env_keys: &["AIRLOOP_AGENTS_REFUSAL_MESSAGE"],
        },
        Setting {
            key: "agents.failure_message",
            value: format!("{:?}", config.agents.failure_message),
            env_keys: &["AIRLOOP_AGENTS_FAILURE_MESSAGE"],
        },
        Setting {
            key: "observability.audit_enabled",
            value: config.observability.audit_enabled.to_string(),
            env_keys: &["AIRLOOP_OBSERVABILITY_AUDIT_ENABLED"],
        },
        Setting {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["AIRLOOP_LOGGING_LEVEL", "AIRLOOP_LOG_LEVEL"],
        },
        Setting {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["AIRLOOP_LOGGING_FORMAT", "AIRLOOP_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("airloop.toml"), PathBuf::from("config/airloop.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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
