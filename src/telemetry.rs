//! Anonymous usage events.
//!
//! Events are posted in the background and never fail the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::TelemetryConfig;

const INSTALL_ID_FILE: &str = ".install_id";

/// Event names.
pub mod events {
    pub const CONFIG_LOADED: &str = "config_loaded";
    pub const REPO_SYNCED: &str = "repo_synced";
    pub const REPO_INDEXED: &str = "repo_indexed";
    pub const REPO_DELETED: &str = "repo_deleted";
}

#[derive(Debug)]
struct Sink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    install_id: String,
}

/// Captures events to a PostHog-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    sink: Option<Arc<Sink>>,
}

impl Telemetry {
    /// A client that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from config; disabled when turned off or no API key is set.
    ///
    /// Without a configured install id one is generated and kept in
    /// `data_dir` so it survives restarts.
    pub async fn from_config(config: &TelemetryConfig, data_dir: &Path) -> Self {
        let api_key = match (&config.api_key, config.disabled) {
            (Some(key), false) if !key.is_empty() => key.clone(),
            _ => {
                debug!("Telemetry disabled");
                return Self::disabled();
            }
        };

        let install_id = match &config.install_id {
            Some(id) => id.clone(),
            None => load_or_create_install_id(data_dir).await,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            sink: Some(Arc::new(Sink {
                client,
                endpoint: config.endpoint.clone(),
                api_key,
                install_id,
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Post `event` in the background. Must be called within a tokio runtime.
    pub fn capture(&self, event: &str, properties: Value) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let body = payload(&sink.api_key, &sink.install_id, event, properties);

        tokio::spawn(async move {
            let result = sink
                .client
                .post(&sink.endpoint)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(e) = result {
                debug!("Failed to send telemetry event: {}", e);
            }
        });
    }
}

fn payload(api_key: &str, install_id: &str, event: &str, properties: Value) -> Value {
    let mut properties = match properties {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("value".to_string(), other)]),
    };
    properties.insert(
        "archipelago_version".to_string(),
        Value::String(env!("CARGO_PKG_VERSION").to_string()),
    );

    json!({
        "api_key": api_key,
        "event": event,
        "distinct_id": install_id,
        "properties": properties,
    })
}

async fn load_or_create_install_id(data_dir: &Path) -> String {
    let path = data_dir.join(INSTALL_ID_FILE);
    if let Ok(existing) = tokio::fs::read_to_string(&path).await {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let written = async {
        tokio::fs::create_dir_all(data_dir).await?;
        tokio::fs::write(&path, &id).await
    }
    .await;
    if let Err(e) = written {
        debug!("Could not persist install id to {:?}: {}", path, e);
    }
    id
}
