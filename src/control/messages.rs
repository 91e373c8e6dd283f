// ABOUTME: JSON messages exchanged on the control endpoint and its push channel

use serde::{Deserialize, Serialize};

use crate::sync::SyncEvent;

/// Server to client: the node reported a block/epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// The event as extracted
    pub synced: SyncEvent,
}

/// Client to server command; unknown fields are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientCommand {
    /// Re-enable the service (`/start`)
    #[serde(default)]
    pub resume: bool,
    /// Stop, wipe state and start fresh
    #[serde(default)]
    pub restart: bool,
}

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_message_shape() {
        let msg = PushMessage {
            synced: SyncEvent {
                block: 100,
                epoch: 3,
            },
        };
        assert_eq!(
            serde_json::to_value(msg).unwrap(),
            json!({"synced": {"block": 100, "epoch": 3}})
        );
    }

    #[test]
    fn test_client_commands() {
        let resume: ClientCommand = serde_json::from_str(r#"{"resume": true}"#).unwrap();
        assert!(resume.resume);
        assert!(!resume.restart);

        let restart: ClientCommand = serde_json::from_str(r#"{"restart": true, "extra": 1}"#).unwrap();
        assert!(restart.restart);

        assert_eq!(
            serde_json::from_str::<ClientCommand>("{}").unwrap(),
            ClientCommand::default()
        );
        assert!(serde_json::from_str::<ClientCommand>(r#"{"resume": "yes"}"#).is_err());
    }
}
