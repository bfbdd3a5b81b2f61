//! `tracing-subscriber` setup for binaries and tests built on the engine.
//!
//! The engine itself only emits events: `debug!` per shard dispatch, `warn!`
//! per failed shard, `info!` per completed sharded query. Nothing is printed
//! until a subscriber is installed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log directives {directives:?}: {reason}")]
    Filter { directives: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level for every target.
    pub level: String,
    /// Per-crate overrides, e.g. `chainquery-core = "debug"`.
    pub components: BTreeMap<String, String>,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_component(mut self, component: impl Into<String>, level: impl Into<String>) -> Self {
        self.components.insert(component.into(), level.into());
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// `EnvFilter` directives, e.g. `info,chainquery_core=debug`.
    ///
    /// Crate names are accepted with dashes and rewritten to module paths.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(component, level)| format!("{}={level}", component.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The filter to install: `RUST_LOG` if set, else [`Self::directives`].
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.directives();
        EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter {
            directives,
            reason: e.to_string(),
        })
    }
}

/// Install the global subscriber described by `config`.
pub fn init_tracing(config: &LogConfig) -> Result<(), TelemetryError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_ansi(false)).try_init()
    } else {
        registry.with(fmt::layer().with_ansi(config.ansi)).try_init()
    };
    installed.map_err(|_| TelemetryError::AlreadyInstalled)
}
