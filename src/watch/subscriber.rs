//! Subscribers and the trigger engine
//!
//! A subscriber reacts to one event at a time. The trigger engine
//! compiles the `[triggers.*]` configuration into filtered subscribers:
//! an action (built-in or templated shell command) gated by a predicate
//! over the event.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::{Captures, Regex};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{Config, TriggerSpec};
use super::event::{fmt_duration, Event, EventBody, EventInfo, EventType};

/// Reacts to a single event.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Logs one line per event.
pub struct LogSubscriber;

#[async_trait]
impl Subscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        match &event.body {
            EventBody::HostTouch { host } => info!("touch {host}"),
            EventBody::HostNew { host } => info!("new {host}"),
            EventBody::HostLost { host, up } => {
                info!("drop {host} (up {})", fmt_duration(*up))
            }
            EventBody::HostFound { host, down } => {
                info!("return {host} (down {})", fmt_duration(*down))
            }
            EventBody::HostArpScanStart { host } => info!("host started arp scan {host}"),
            EventBody::HostArpScanStop { host, up } => {
                info!("host stopped arp scan {host} (up {})", fmt_duration(*up))
            }
            EventBody::PortTouch { host, port } => info!("touch {port} on {host}"),
            EventBody::PortNew { host, port } => info!("new {port} on {host}"),
            EventBody::PortLost { host, port, up } => {
                info!("drop {port} (up {}) on {host}", fmt_duration(*up))
            }
            EventBody::PortFound { host, port, down } => {
                info!("return {port} (down {}) on {host}", fmt_duration(*down))
            }
        }
        Ok(())
    }
}

/// Swallows every event. Useful to exercise the pipeline without side
/// effects.
pub struct NullSubscriber;

#[async_trait]
impl Subscriber for NullSubscriber {
    fn name(&self) -> &str {
        "null"
    }

    async fn handle(&self, _event: &Event) -> Result<()> {
        Ok(())
    }
}

/// Shell command template with `{{.Field}}` placeholders.
///
/// Rendering expands `$VAR`/`${VAR}` from the environment first, then
/// substitutes event fields; unknown fields render as empty strings.
pub struct ShellTemplate {
    raw: String,
    fields: Regex,
    env: Regex,
}

impl ShellTemplate {
    pub fn new(raw: &str) -> Result<Self> {
        Ok(Self {
            raw: raw.to_string(),
            fields: Regex::new(r"\{\{\s*\.([A-Za-z0-9_.]+)\s*\}\}")
                .context("failed to compile field regex")?,
            env: Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
                .context("failed to compile env regex")?,
        })
    }

    pub fn render(&self, info: &EventInfo) -> String {
        let expanded = self.env.replace_all(&self.raw, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        });
        self.fields
            .replace_all(&expanded, |caps: &Captures<'_>| info.field(&caps[1]))
            .into_owned()
    }

    /// Render for the event and run under `/bin/sh -c`, returning the
    /// combined stdout and stderr. A non-zero exit is an error carrying
    /// that output.
    pub async fn run(&self, event: &Event) -> Result<String> {
        let info = EventInfo::new(event);
        let rendered = self.render(&info);
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&rendered)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run command: {rendered}"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            bail!(
                "command exited with {}: {}",
                output.status,
                combined.trim()
            );
        }
        Ok(combined)
    }
}

enum Action {
    Builtin(Box<dyn Subscriber>),
    Shell(ShellTemplate),
}

enum Predicate {
    Any,
    Shell(ShellTemplate),
    Except(Vec<EventType>),
    Only(Vec<EventType>),
}

/// One compiled trigger: an action gated by an event filter.
pub struct FilteredSubscriber {
    name: String,
    action: Action,
    predicate: Predicate,
}

impl FilteredSubscriber {
    pub fn from_spec(name: &str, spec: &TriggerSpec) -> Result<Self> {
        let do_builtin = spec.do_builtin.as_deref().filter(|s| !s.is_empty());
        let do_shell = spec.do_shell.as_deref().filter(|s| !s.is_empty());
        let action = match (do_builtin, do_shell) {
            (Some(builtin), None) => Action::Builtin(builtin_subscriber(builtin)?),
            (None, Some(shell)) => Action::Shell(
                ShellTemplate::new(shell)
                    .with_context(|| format!("trigger {name}: bad do_shell template"))?,
            ),
            _ => bail!("trigger {name}: exactly one of do_builtin and do_shell must be set"),
        };

        let on_shell = spec.on_shell.as_deref().filter(|s| !s.is_empty());
        let predicate = if spec.on_any {
            Predicate::Any
        } else if let Some(shell) = on_shell {
            Predicate::Shell(
                ShellTemplate::new(shell)
                    .with_context(|| format!("trigger {name}: bad on_shell template"))?,
            )
        } else if !spec.on_events_except.is_empty() {
            Predicate::Except(spec.on_events_except.clone())
        } else {
            Predicate::Only(spec.on_events.clone())
        };

        Ok(Self {
            name: name.to_string(),
            action,
            predicate,
        })
    }

    /// Whether this trigger's action should run for the event.
    pub async fn should_do(&self, event: &Event) -> bool {
        match &self.predicate {
            Predicate::Any => true,
            Predicate::Shell(template) => match template.run(event).await {
                Ok(_) => true,
                Err(e) => {
                    // A non-zero exit means "skip this event", but keep it
                    // observable.
                    debug!("trigger {}: predicate skipped event: {e:#}", self.name);
                    false
                }
            },
            Predicate::Except(types) => !types.contains(&event.event_type()),
            Predicate::Only(types) => types.contains(&event.event_type()),
        }
    }
}

#[async_trait]
impl Subscriber for FilteredSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.should_do(event).await {
            return Ok(());
        }
        match &self.action {
            Action::Builtin(sub) => sub.handle(event).await,
            Action::Shell(template) => {
                let output = template.run(event).await?;
                let output = output.trim();
                if !output.is_empty() {
                    println!("{output}");
                }
                Ok(())
            }
        }
    }
}

fn builtin_subscriber(name: &str) -> Result<Box<dyn Subscriber>> {
    match name.to_lowercase().as_str() {
        "log" => Ok(Box::new(LogSubscriber)),
        "null" => Ok(Box::new(NullSubscriber)),
        other => bail!("unsupported builtin subscriber: {other:?}"),
    }
}

/// Compile the configuration into subscribers.
///
/// A non-empty `only` list loads exactly the named triggers, including
/// disabled ones. Triggers fire in lexicographic name order so runs are
/// reproducible for a given configuration.
pub fn subscribers_from_config(
    config: &Config,
    only: &[String],
) -> Result<Vec<Box<dyn Subscriber>>> {
    let only: HashSet<&str> = only.iter().map(String::as_str).collect();

    let mut triggers = Vec::new();
    for (name, spec) in &config.triggers {
        if !only.is_empty() && !only.contains(name.as_str()) {
            continue;
        }
        if spec.disabled && !only.contains(name.as_str()) {
            continue;
        }
        debug!("loading trigger {name}");
        triggers.push(FilteredSubscriber::from_spec(name, spec)?);
    }
    if triggers.is_empty() {
        bail!("no triggers loaded");
    }
    triggers.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(triggers
        .into_iter()
        .map(|t| Box::new(t) as Box<dyn Subscriber>)
        .collect())
}
