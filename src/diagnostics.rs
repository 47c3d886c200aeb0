//! Opt-in lifecycle logging for connections and calls.
//!
//! Off unless `TASKLINK_DEBUG` is set. When off, every call returns after a
//! single boolean check.

use std::fmt;

use strum_macros::Display;

/// Environment toggle for [`Diagnostics::from_env`]
pub const DEBUG_ENV: &str = "TASKLINK_DEBUG";

const TARGET: &str = "tasklink::diagnostics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClientEvent {
    #[strum(to_string = "connected")]
    Connected,
    #[strum(to_string = "connection error")]
    ConnectionError,
    #[strum(to_string = "connection closed")]
    ConnectionClosed,
    #[strum(to_string = "emitting error to force reconnection")]
    ForcingReconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CallEvent {
    #[strum(to_string = "called")]
    Submitted,
    #[strum(to_string = "Started")]
    Started,
    #[strum(to_string = "Started (Warning: `started` was force-resolved by the result)")]
    StartForced,
    #[strum(to_string = "Success")]
    Succeeded,
    #[strum(to_string = "Call failed")]
    Failed,
    #[strum(to_string = "Call failed. Broker isn't connected")]
    NotConnected,
    #[strum(to_string = "Fire-and-forget call dropped. Broker isn't connected")]
    DroppedNotConnected,
}

/// `TaskClient[<client>] - <message>`
pub fn client_statement(client: &str, message: impl fmt::Display) -> String {
    format!("TaskClient[{client}] - {message}")
}

/// `TaskClient[<client>]#call("<task>")[task_id:<id|null>] - <message>`
pub fn call_statement(
    client: &str,
    task: &str,
    task_id: Option<&str>,
    message: impl fmt::Display,
) -> String {
    let task_id = task_id.map_or_else(|| "null".to_owned(), |id| format!("{id:?}"));
    format!("TaskClient[{client}]#call({task:?})[task_id:{task_id}] - {message}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Read [`DEBUG_ENV`], honouring a `.env` file.
    pub fn from_env() -> Self {
        Self::new(Self::is_enabled_value(dotenvy::var(DEBUG_ENV).ok().as_deref()))
    }

    /// Any non-empty value except `0`, `false`, `off` or `no` enables diagnostics.
    pub fn is_enabled_value(value: Option<&str>) -> bool {
        match value.map(str::trim) {
            None | Some("") => false,
            Some(v) => !matches!(v.to_lowercase().as_str(), "0" | "false" | "off" | "no"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn client(&self, client: &str, event: ClientEvent, detail: Option<&dyn fmt::Display>) {
        if !self.enabled {
            return;
        }

        let statement = client_statement(client, event);
        let level = match event {
            ClientEvent::ConnectionError => log::Level::Warn,
            ClientEvent::Connected | ClientEvent::ConnectionClosed | ClientEvent::ForcingReconnect => {
                log::Level::Info
            }
        };
        emit(level, &statement, detail);
    }

    pub fn call(
        &self,
        client: &str,
        task: &str,
        task_id: Option<&str>,
        event: CallEvent,
        detail: Option<&dyn fmt::Display>,
    ) {
        if !self.enabled {
            return;
        }

        let statement = call_statement(client, task, task_id, event);
        let level = match event {
            CallEvent::Failed | CallEvent::NotConnected | CallEvent::DroppedNotConnected => {
                log::Level::Error
            }
            CallEvent::StartForced => log::Level::Warn,
            CallEvent::Submitted | CallEvent::Started | CallEvent::Succeeded => log::Level::Debug,
        };
        emit(level, &statement, detail);
    }
}

fn emit(level: log::Level, statement: &str, detail: Option<&dyn fmt::Display>) {
    match detail {
        Some(detail) => log::log!(target: TARGET, level, "{statement} {detail}"),
        None => log::log!(target: TARGET, level, "{statement}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_statement_format() {
        assert_eq!(
            call_statement("default", "add", None, CallEvent::NotConnected),
            "TaskClient[default]#call(\"add\")[task_id:null] - Call failed. Broker isn't connected"
        );
        assert_eq!(
            call_statement("default", "tasks.add", Some("abc"), "Call failed [FAILURE]"),
            "TaskClient[default]#call(\"tasks.add\")[task_id:\"abc\"] - Call failed [FAILURE]"
        );
    }

    #[test]
    fn test_client_statement_format() {
        assert_eq!(
            client_statement("jobs", ClientEvent::ForcingReconnect),
            "TaskClient[jobs] - emitting error to force reconnection"
        );
    }

    #[test]
    fn test_enabled_values() {
        assert!(!Diagnostics::is_enabled_value(None));
        assert!(!Diagnostics::is_enabled_value(Some("")));
        assert!(!Diagnostics::is_enabled_value(Some("0")));
        assert!(!Diagnostics::is_enabled_value(Some("FALSE")));
        assert!(Diagnostics::is_enabled_value(Some("1")));
        assert!(Diagnostics::is_enabled_value(Some("yes")));
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(!Diagnostics::default().is_enabled());
        assert!(!Diagnostics::disabled().is_enabled());
        assert!(Diagnostics::new(true).is_enabled());
    }

    #[test]
    fn test_emission_does_not_panic() {
        let diagnostics = Diagnostics::new(true);
        diagnostics.client("t", ClientEvent::ConnectionError, Some(&"refused"));
        diagnostics.call("t", "add", Some("id"), CallEvent::StartForced, None);
        Diagnostics::disabled().call("t", "add", None, CallEvent::Failed, Some(&"tb"));
    }
}
