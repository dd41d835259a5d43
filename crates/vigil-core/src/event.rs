//! 事件与实时推送协议
//!
//! `Event` 是进程内流转的事件；`ServerMessage` / `ClientMessage`
//! 是 WebSocket 上的 JSON 报文，按 `type` 字段区分。

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraEventKind {
    CameraAdded,
    CameraRemoved,
    WorkerStateChanged,
    SettingsUpdated,
    MotionStarted,
    MotionEnded,
    RecordingStarted,
    RecordingFinished,
    RecordingAborted,
    ObjectsDetected,
}

impl CameraEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraEventKind::CameraAdded => "camera_added",
            CameraEventKind::CameraRemoved => "camera_removed",
            CameraEventKind::WorkerStateChanged => "worker_state_changed",
            CameraEventKind::SettingsUpdated => "settings_updated",
            CameraEventKind::MotionStarted => "motion_started",
            CameraEventKind::MotionEnded => "motion_ended",
            CameraEventKind::RecordingStarted => "recording_started",
            CameraEventKind::RecordingFinished => "recording_finished",
            CameraEventKind::RecordingAborted => "recording_aborted",
            CameraEventKind::ObjectsDetected => "objects_detected",
        }
    }
}

/// 单个摄像头上发生的状态变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub camera_id: String,
    pub kind: CameraEventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl CameraEvent {
    pub fn new(camera_id: impl Into<String>, kind: CameraEventKind, data: Value) -> Self {
        Self {
            camera_id: camera_id.into(),
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// 告警类别，例如 `camera_faulted`
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub camera_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Alert {
    pub fn new(alert_type: impl Into<String>, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            camera_id: None,
            message: message.into(),
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    pub fn for_camera(mut self, camera_id: impl Into<String>) -> Self {
        self.camera_id = Some(camera_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsUpdate {
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// 进程内事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Camera(CameraEvent),
    Alert(Alert),
    Statistics(StatisticsUpdate),
}

impl Event {
    /// 对应的出站报文类型
    pub fn message_type(&self) -> &'static str {
        match self {
            Event::Camera(_) => "camera_event",
            Event::Alert(_) => "alert",
            Event::Statistics(_) => "statistics_update",
        }
    }

    pub fn camera_id(&self) -> Option<&str> {
        match self {
            Event::Camera(e) => Some(&e.camera_id),
            Event::Alert(a) => a.camera_id.as_deref(),
            Event::Statistics(_) => None,
        }
    }

    /// 订阅过滤：空集合表示订阅全部；否则匹配报文类型、
    /// 摄像头事件类型或告警类别
    pub fn matches(&self, event_types: &HashSet<String>) -> bool {
        if event_types.is_empty() || event_types.contains(self.message_type()) {
            return true;
        }
        match self {
            Event::Camera(e) => event_types.contains(e.kind.as_str()),
            Event::Alert(a) => event_types.contains(&a.alert_type),
            Event::Statistics(_) => false,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        match self {
            Event::Camera(e) => ServerMessage::CameraEvent {
                timestamp: e.timestamp,
                camera_id: e.camera_id.clone(),
                event_type: e.kind,
                data: e.data.clone(),
            },
            Event::Alert(a) => ServerMessage::Alert {
                timestamp: a.timestamp,
                alert_type: a.alert_type.clone(),
                severity: a.severity,
                camera_id: a.camera_id.clone(),
                message: a.message.clone(),
                data: a.data.clone(),
            },
            Event::Statistics(s) => ServerMessage::StatisticsUpdate {
                timestamp: s.timestamp,
                data: s.data.clone(),
            },
        }
    }
}

impl From<CameraEvent> for Event {
    fn from(value: CameraEvent) -> Self {
        Event::Camera(value)
    }
}

impl From<Alert> for Event {
    fn from(value: Alert) -> Self {
        Event::Alert(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connected,
    Closing,
}

/// 服务端下发的报文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StatisticsUpdate {
        timestamp: DateTime<Utc>,
        data: Value,
    },
    CameraEvent {
        timestamp: DateTime<Utc>,
        camera_id: String,
        event_type: CameraEventKind,
        data: Value,
    },
    Alert {
        timestamp: DateTime<Utc>,
        alert_type: String,
        severity: AlertSeverity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        camera_id: Option<String>,
        message: String,
        data: Value,
    },
    ConnectionStatus {
        status: ConnectionPhase,
        connection_id: String,
        principal: String,
        message: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    SubscriptionConfirmed {
        event_types: Vec<String>,
    },
    UnsubscriptionConfirmed {
        event_types: Vec<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 客户端上行的报文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    Subscribe {
        #[serde(default)]
        event_types: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        event_types: Vec<String>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_camera_event_wire_format() {
        let event = Event::Camera(CameraEvent::new(
            "cam1",
            CameraEventKind::MotionStarted,
            json!({"regions": 2}),
        ));
        let value = serde_json::to_value(event.to_message()).unwrap();

        assert_eq!(value["type"], "camera_event");
        assert_eq!(value["camera_id"], "cam1");
        assert_eq!(value["event_type"], "motion_started");
        assert_eq!(value["data"]["regions"], 2);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_alert_wire_format() {
        let alert = Alert::new("camera_faulted", AlertSeverity::Critical, "source lost");
        let value = serde_json::to_value(Event::Alert(alert).to_message()).unwrap();

        assert_eq!(value["type"], "alert");
        assert_eq!(value["alert_type"], "camera_faulted");
        assert_eq!(value["severity"], "critical");
        assert!(value.get("camera_id").is_none());
    }

    #[test]
    fn test_subscription_filter() {
        let motion = Event::Camera(CameraEvent::new("c", CameraEventKind::MotionStarted, Value::Null));
        let stats = Event::Statistics(StatisticsUpdate {
            timestamp: Utc::now(),
            data: Value::Null,
        });
        let alert = Event::Alert(Alert::new("camera_faulted", AlertSeverity::Warning, "x"));

        assert!(motion.matches(&HashSet::new()));
        assert!(stats.matches(&HashSet::new()));

        let filter = set(&["motion_started"]);
        assert!(motion.matches(&filter));
        assert!(!stats.matches(&filter));
        assert!(!alert.matches(&filter));

        let filter = set(&["camera_event", "camera_faulted"]);
        assert!(motion.matches(&filter));
        assert!(alert.matches(&filter));
        assert!(!stats.matches(&filter));
    }

    #[test]
    fn test_client_message_parse() {
        let ping = ClientMessage::parse(r#"{"type":"ping","timestamp":1700000000}"#).unwrap();
        assert_eq!(
            ping,
            ClientMessage::Ping {
                timestamp: Some(json!(1700000000))
            }
        );

        let bare = ClientMessage::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(bare, ClientMessage::Ping { timestamp: None });

        let sub = ClientMessage::parse(r#"{"type":"subscribe","event_types":["alert"]}"#).unwrap();
        assert_eq!(
            sub,
            ClientMessage::Subscribe {
                event_types: vec!["alert".to_string()]
            }
        );

        assert!(ClientMessage::parse(r#"{"type":"shutdown"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_connection_status_wire_format() {
        let msg = ServerMessage::ConnectionStatus {
            status: ConnectionPhase::Connected,
            connection_id: "abc".to_string(),
            principal: "alice".to_string(),
            message: "Connected".to_string(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "connection_status");
        assert_eq!(value["status"], "connected");
        assert_eq!(value["connection_id"], "abc");
    }
}
