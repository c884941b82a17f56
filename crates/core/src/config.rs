use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_REFUSAL_MESSAGE: &str =
    "Sorry, I can only answer questions related to airline travel.";
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while handling your request. Please try again.";

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub agents: AgentsConfig,
    pub observability: ObservabilityConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentsConfig {
    pub model: String,
    pub max_turns: u32,
    pub invoke_timeout_secs: u64,
    pub guardrail_timeout_secs: u64,
    pub refusal_message: String,
    pub failure_message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObservabilityConfig {
    pub audit_enabled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub agent_model: Option<String>,
    pub audit_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://airloop.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            agents: AgentsConfig {
                model: "keyword".to_string(),
                max_turns: 10,
                invoke_timeout_secs: 60,
                guardrail_timeout_secs: 15,
                refusal_message: DEFAULT_REFUSAL_MESSAGE.to_string(),
                failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
            },
            observability: ObservabilityConfig { audit_enabled: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("airloop.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(agents) = patch.agents {
            if let Some(model) = agents.model {
                self.agents.model = model;
            }
            if let Some(max_turns) = agents.max_turns {
                self.agents.max_turns = max_turns;
            }
            if let Some(invoke_timeout_secs) = agents.invoke_timeout_secs {
                self.agents.invoke_timeout_secs = invoke_timeout_secs;
            }
            if let Some(guardrail_timeout_secs) = agents.guardrail_timeout_secs {
                self.agents.guardrail_timeout_secs = guardrail_timeout_secs;
            }
            if let Some(refusal_message) = agents.refusal_message {
                self.agents.refusal_message = refusal_message;
            }
            if let Some(failure_message) = agents.failure_message {
                self.agents.failure_message = failure_message;
            }
        }

        if let Some(observability) = patch.observability {
            if let Some(audit_enabled) = observability.audit_enabled {
                self.observability.audit_enabled = audit_enabled;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AIRLOOP_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AIRLOOP_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("AIRLOOP_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AIRLOOP_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("AIRLOOP_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AIRLOOP_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AIRLOOP_SERVER_PORT") {
            self.server.port = parse_env("AIRLOOP_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("AIRLOOP_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("AIRLOOP_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("AIRLOOP_AGENTS_MODEL") {
            self.agents.model = value;
        }
        if let Some(value) = read_env("AIRLOOP_AGENTS_MAX_TURNS") {
            self.agents.max_turns = parse_env("AIRLOOP_AGENTS_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("AIRLOOP_AGENTS_INVOKE_TIMEOUT_SECS") {
            self.agents.invoke_timeout_secs =
                parse_env("AIRLOOP_AGENTS_INVOKE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AIRLOOP_AGENTS_GUARDRAIL_TIMEOUT_SECS") {
            self.agents.guardrail_timeout_secs =
                parse_env("AIRLOOP_AGENTS_GUARDRAIL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AIRLOOP_AGENTS_REFUSAL_MESSAGE") {
            self.agents.refusal_message = value;
        }
        if let Some(value) = read_env("AIRLOOP_AGENTS_FAILURE_MESSAGE") {
            self.agents.failure_message = value;
        }

        if let Some(value) = read_env("AIRLOOP_OBSERVABILITY_AUDIT_ENABLED") {
            self.observability.audit_enabled =
                parse_env("AIRLOOP_OBSERVABILITY_AUDIT_ENABLED", &value)?;
        }

        let log_level =
            read_env("AIRLOOP_LOGGING_LEVEL").or_else(|| read_env("AIRLOOP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AIRLOOP_LOGGING_FORMAT").or_else(|| read_env("AIRLOOP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(model) = overrides.agent_model {
            self.agents.model = model;
        }
        if let Some(audit_enabled) = overrides.audit_enabled {
            self.observability.audit_enabled = audit_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_agents(&self.agents)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("airloop.toml"), PathBuf::from("config/airloop.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_agents(agents: &AgentsConfig) -> Result<(), ConfigError> {
    if agents.model.trim().is_empty() {
        return Err(ConfigError::Validation("agents.model must not be empty".to_string()));
    }

    if agents.max_turns == 0 {
        return Err(ConfigError::Validation(
            "agents.max_turns must be greater than zero".to_string(),
        ));
    }

    if agents.invoke_timeout_secs == 0 || agents.invoke_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agents.invoke_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if agents.guardrail_timeout_secs == 0 || agents.guardrail_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agents.guardrail_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agents.refusal_message.trim().is_empty() || agents.failure_message.trim().is_empty() {
        return Err(ConfigError::Validation(
            "agents.refusal_message and agents.failure_message must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    agents: Option<AgentsPatch>,
    observability: Option<ObservabilityPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentsPatch {
    model: Option<String>,
    max_turns: Option<u32>,
    invoke_timeout_secs: Option<u64>,
    guardrail_timeout_secs: Option<u64>,
    refusal_message: Option<String>,
    failure_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ObservabilityPatch {
    audit_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, DEFAULT_REFUSAL_MESSAGE,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.database.url == "sqlite://airloop.db", "default database url")?;
        ensure(config.agents.refusal_message == DEFAULT_REFUSAL_MESSAGE, "default refusal")?;
        ensure(config.observability.audit_enabled, "audit is enabled by default")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_AIRLOOP_DB_PATH", "/tmp/interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("airloop.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_AIRLOOP_DB_PATH}"

[agents]
refusal_message = "Travel questions only, please."
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///tmp/interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.agents.refusal_message == "Travel questions only, please.",
                "refusal message should come from the file",
            )
        })();

        clear_vars(&["TEST_AIRLOOP_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_AIRLOOP_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("airloop.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_AIRLOOP_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let outcome =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(outcome, Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "TEST_AIRLOOP_UNSET"),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AIRLOOP_LOG_LEVEL", "warn");
        env::set_var("AIRLOOP_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["AIRLOOP_LOG_LEVEL", "AIRLOOP_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AIRLOOP_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("AIRLOOP_SERVER_PORT", "9100");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("airloop.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9000
bind_address = "0.0.0.0"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9100, "env port should win over file")?;
            ensure(config.server.bind_address == "0.0.0.0", "file bind address should apply")
        })();

        clear_vars(&["AIRLOOP_DATABASE_URL", "AIRLOOP_SERVER_PORT"]);
        result
    }

    #[test]
    fn invalid_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AIRLOOP_AGENTS_MAX_TURNS", "many");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(outcome, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "AIRLOOP_AGENTS_MAX_TURNS"),
                "non-numeric max turns should be rejected",
            )
        })();

        clear_vars(&["AIRLOOP_AGENTS_MAX_TURNS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AIRLOOP_AGENTS_INVOKE_TIMEOUT_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("agents.invoke_timeout_secs")
            );
            ensure(has_message, "validation failure should mention agents.invoke_timeout_secs")
        })();

        clear_vars(&["AIRLOOP_AGENTS_INVOKE_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn non_sqlite_database_url_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let outcome = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/airloop".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        ensure(
            matches!(outcome, Err(ConfigError::Validation(ref message)) if message.contains("database.url")),
            "postgres urls are not supported",
        )
    }
}
