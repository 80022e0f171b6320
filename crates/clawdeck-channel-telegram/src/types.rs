//! Telegram Bot API wire types (the subset clawdeck uses).

use serde::{Deserialize, Serialize};

/// Generic Bot API response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub result: Option<T>,
}

/// Result of `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

/// Parameters for `sendMessage`.
#[derive(Debug, Serialize)]
pub struct SendMessageParams {
    pub chat_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
}

/// A sent message, as returned by `sendMessage`.
#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_parse() {
        let json = r#"{"ok":true,"result":{"message_id":42}}"#;
        let resp: ApiResponse<TgMessage> = serde_json::from_str(json).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap().message_id, 42);
    }

    #[test]
    fn test_api_error_parse() {
        let json = r#"{"ok":false,"description":"Unauthorized"}"#;
        let resp: ApiResponse<TgMessage> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_send_message_params_skip_parse_mode() {
        let params = SendMessageParams {
            chat_id: "1001601662".into(),
            text: "hi".into(),
            parse_mode: None,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("parse_mode"));
    }
}
