//! JSON text frames exchanged with the monitoring hub

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OpError;
use crate::model::FleetMetrics;

/// Node type reported in the auth metadata.
pub const NODE_TYPE: &str = "deckpilot";

/// Frames sent to the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        node_id: String,
        hostname: String,
        platform: String,
        version: String,
        metadata: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        show_id: Option<String>,
    },
    Heartbeat {
        node_id: String,
        timestamp: String,
    },
    Metrics {
        node_id: String,
        timestamp: String,
        metrics: FleetMetrics,
    },
    CommandResult {
        command_id: Value,
        node_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ClientFrame {
    pub fn auth(node_id: &str, show_id: Option<String>, extra: &Map<String, Value>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("type".to_string(), Value::from(NODE_TYPE));
        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }

        Self::Auth {
            node_id: node_id.to_string(),
            hostname: local_hostname(),
            platform: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            metadata,
            show_id,
        }
    }

    pub fn heartbeat(node_id: &str) -> Self {
        Self::Heartbeat {
            node_id: node_id.to_string(),
            timestamp: now(),
        }
    }

    pub fn metrics(node_id: &str, metrics: FleetMetrics) -> Self {
        Self::Metrics {
            node_id: node_id.to_string(),
            timestamp: now(),
            metrics,
        }
    }

    /// Echo the outcome of a hub command under its correlation id.
    pub fn command_result(command_id: Value, node_id: &str, outcome: Result<Value, OpError>) -> Self {
        let (success, result, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        Self::CommandResult {
            command_id,
            node_id: node_id.to_string(),
            success,
            result,
            error,
        }
    }
}

/// Frames received from the hub
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    AuthOk {
        #[serde(default)]
        message: String,
    },
    Command {
        command: String,
        command_id: Value,
        #[serde(default)]
        params: Value,
    },
    #[serde(other)]
    Unknown,
}

impl HubFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_frame_shape() {
        let mut extra = Map::new();
        extra.insert("location".to_string(), json!("Studio B"));
        let frame = ClientFrame::auth("node-1", Some("show-9".to_string()), &extra);
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["type"], "auth");
        assert_eq!(value["node_id"], "node-1");
        assert_eq!(value["show_id"], "show-9");
        assert_eq!(value["metadata"]["type"], "deckpilot");
        assert_eq!(value["metadata"]["location"], "Studio B");
        assert!(value["hostname"].is_string());
        assert_eq!(value["platform"], std::env::consts::OS);
    }

    #[test]
    fn test_auth_without_show_id_omits_key() {
        let frame = ClientFrame::auth("node-1", None, &Map::new());
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("show_id").is_none());
    }

    #[test]
    fn test_metrics_frame_nests_counters() {
        let frame = ClientFrame::metrics(
            "node-1",
            FleetMetrics {
                recorders_total: 3,
                recorders_online: 2,
                recorders_recording: 1,
                total_disk_space_gb: 12.5,
            },
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "metrics");
        assert_eq!(value["metrics"]["recorders_total"], 3);
        assert_eq!(value["metrics"]["recorders_recording"], 1);
        assert_eq!(value["metrics"]["total_disk_space_gb"], 12.5);
    }

    #[test]
    fn test_command_result_success_and_failure() {
        let ok = ClientFrame::command_result(json!("c1"), "n", Ok(json!({"take": 2})));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["type"], "command_result");
        assert_eq!(value["command_id"], "c1");
        assert_eq!(value["success"], true);
        assert_eq!(value["result"]["take"], 2);
        assert!(value.get("error").is_none());

        let failed = ClientFrame::command_result(
            json!(7),
            "n",
            Err(OpError::UnknownCommand("reboot".to_string())),
        );
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["command_id"], 7);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Unknown command: reboot");
    }

    #[test]
    fn test_parse_hub_frames() {
        assert_eq!(
            HubFrame::parse(r#"{"type":"auth_ok","message":"welcome"}"#).unwrap(),
            HubFrame::AuthOk {
                message: "welcome".to_string()
            }
        );
        let frame = HubFrame::parse(
            r#"{"type":"command","command":"increment_take","command_id":"c9","params":{"recorderId":"r1"}}"#,
        )
        .unwrap();
        let HubFrame::Command { command, command_id, params } = frame else {
            panic!("expected command");
        };
        assert_eq!(command, "increment_take");
        assert_eq!(command_id, json!("c9"));
        assert_eq!(params["recorderId"], "r1");

        assert_eq!(
            HubFrame::parse(r#"{"type":"server_notice","text":"hi"}"#).unwrap(),
            HubFrame::Unknown
        );
        assert!(HubFrame::parse("not json").is_err());
    }
}
