use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-task routing. Every field is optional; unset fields fall back to the
/// next layer (task options, then `ROUTES`, then the defaults).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub routing_key: Option<String>,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        self.queue.is_none() && self.exchange.is_none() && self.routing_key.is_none()
    }
}

/// Fully resolved delivery target for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoute {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Session configuration handed to [`crate::Broker::create_session`].
///
/// Keys use the same names the task-queue ecosystem uses (`BROKER_URL`,
/// `RESULT_BACKEND`, ...), both in TOML files and in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct BrokerConfig {
    pub broker_url: String,
    pub result_backend: Option<String>,
    pub default_queue: String,
    pub queues: Vec<String>,
    pub default_exchange: String,
    pub default_exchange_type: String,
    pub default_routing_key: String,
    pub result_exchange: String,
    pub event_exchange: String,
    pub send_task_sent_event: bool,
    /// Milliseconds.
    pub task_result_expires: u64,
    pub routes: HashMap<String, Route>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: "amqp://".to_owned(),
            result_backend: None,
            default_queue: "celery".to_owned(),
            queues: vec!["celery".to_owned()],
            default_exchange: String::new(),
            default_exchange_type: "direct".to_owned(),
            default_routing_key: "celery".to_owned(),
            result_exchange: "celeryresults".to_owned(),
            event_exchange: "celeryev".to_owned(),
            send_task_sent_event: false,
            task_result_expires: 86_400_000,
            routes: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Self::default()
        }
    }

    pub fn with_result_backend(mut self, url: impl Into<String>) -> Self {
        self.result_backend = Some(url.into());
        self
    }

    pub fn with_route(mut self, task_name: impl Into<String>, route: Route) -> Self {
        self.routes.insert(task_name.into(), route);
        self
    }

    pub fn task_result_expires(&self) -> Duration {
        Duration::from_millis(self.task_result_expires)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;

        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded broker config from: {path_str}");
        Ok(config)
    }

    /// Build a config from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// `QUEUES` is comma separated, `ROUTES` is a JSON object of task name to
    /// route. Keys that are absent keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("BROKER_URL") {
            config.broker_url = v;
        }
        config.result_backend = lookup("RESULT_BACKEND").or(config.result_backend);
        if let Some(v) = lookup("DEFAULT_QUEUE") {
            config.default_queue = v;
        }
        if let Some(v) = lookup("QUEUES") {
            config.queues = v
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Some(v) = lookup("DEFAULT_EXCHANGE") {
            config.default_exchange = v;
        }
        if let Some(v) = lookup("DEFAULT_EXCHANGE_TYPE") {
            config.default_exchange_type = v;
        }
        if let Some(v) = lookup("DEFAULT_ROUTING_KEY") {
            config.default_routing_key = v;
        }
        if let Some(v) = lookup("RESULT_EXCHANGE") {
            config.result_exchange = v;
        }
        if let Some(v) = lookup("EVENT_EXCHANGE") {
            config.event_exchange = v;
        }
        if let Some(v) = lookup("SEND_TASK_SENT_EVENT") {
            config.send_task_sent_event = parse_bool("SEND_TASK_SENT_EVENT", &v)?;
        }
        if let Some(v) = lookup("TASK_RESULT_EXPIRES") {
            config.task_result_expires =
                v.trim()
                    .parse()
                    .map_err(|_parse_err| ConfigError::InvalidValue {
                        key: "TASK_RESULT_EXPIRES",
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = lookup("ROUTES") {
            config.routes =
                serde_json::from_str(&v).map_err(|_parse_err| ConfigError::InvalidValue {
                    key: "ROUTES",
                    value: v.clone(),
                })?;
        }

        Ok(config)
    }

    /// Presence checks only; values are passed through to the session as-is.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_url.trim().is_empty() {
            return Err(ConfigError::Missing("BROKER_URL"));
        }

        #[expect(clippy::iter_over_hash_type)]
        for (task_name, route) in &self.routes {
            if route.is_empty() {
                return Err(ConfigError::EmptyRoute(task_name.clone()));
            }
        }

        Ok(())
    }

    /// Resolve where `task_name` is delivered: `overrides` beat `ROUTES`,
    /// which beat the defaults.
    pub fn route_for(&self, task_name: &str, overrides: &Route) -> ResolvedRoute {
        let configured = self.routes.get(task_name);
        let pick = |over: &Option<String>,
                    conf: Option<&Option<String>>,
                    default: &String| {
            over.clone()
                .or_else(|| conf.and_then(Clone::clone))
                .unwrap_or_else(|| default.clone())
        };

        ResolvedRoute {
            queue: pick(
                &overrides.queue,
                configured.map(|r| &r.queue),
                &self.default_queue,
            ),
            exchange: pick(
                &overrides.exchange,
                configured.map(|r| &r.exchange),
                &self.default_exchange,
            ),
            routing_key: pick(
                &overrides.routing_key,
                configured.map(|r| &r.routing_key),
                &self.default_routing_key,
            ),
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        }),
    }
}
