//! Trigger configuration
//!
//! The configuration file holds one `[triggers.<name>]` table per
//! trigger; the trigger engine compiles each into a filtered subscriber.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::watch::event::EventType;

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub triggers: BTreeMap<String, TriggerSpec>,
}

/// Specification for one trigger.
///
/// Exactly one of `do_builtin` / `do_shell` must be set; the `on_*`
/// fields select which events fire the action, first match winning in
/// the order `on_any`, `on_shell`, `on_events_except`, `on_events`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TriggerSpec {
    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub on_any: bool,

    #[serde(default)]
    pub on_events: Vec<EventType>,

    #[serde(default)]
    pub on_events_except: Vec<EventType>,

    /// Predicate template; the event is handled iff the command exits 0.
    #[serde(default)]
    pub on_shell: Option<String>,

    /// Built-in action: `"log"` or `"null"`.
    #[serde(default)]
    pub do_builtin: Option<String>,

    /// Templated shell action, run as `/bin/sh -c`.
    #[serde(default)]
    pub do_shell: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_trigger() {
        let config: Config = toml::from_str(
            r#"
            [triggers.notify]
            on_events = ["host.new", "port.found"]
            do_shell = "echo {{.Description}}"

            [triggers.quiet]
            disabled = true
            on_events_except = ["host.touch", "port.touch"]
            do_builtin = "log"
            "#,
        )
        .unwrap();

        assert_eq!(config.triggers.len(), 2);
        let notify = &config.triggers["notify"];
        assert_eq!(
            notify.on_events,
            vec![EventType::HostNew, EventType::PortFound]
        );
        assert_eq!(notify.do_shell.as_deref(), Some("echo {{.Description}}"));
        assert!(!notify.disabled);
        assert!(config.triggers["quiet"].disabled);
    }

    #[test]
    fn test_empty_and_invalid_event_names() {
        let config: Config = toml::from_str(
            r#"
            [triggers.t]
            on_events = ["", "invalid"]
            do_builtin = "null"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.triggers["t"].on_events,
            vec![EventType::Invalid, EventType::Invalid]
        );

        let err = toml::from_str::<Config>(
            r#"
            [triggers.t]
            on_events = ["host.rebooted"]
            do_builtin = "null"
            "#,
        );
        assert!(err.is_err());
    }
}
