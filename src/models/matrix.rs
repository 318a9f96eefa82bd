//! Defines the data structures for talking to a Matrix homeserver.
//!
//! Includes structs for:
//! - Parsing and validating Matrix user IDs (`MatrixId`).
//! - Serializing client-server API requests and deserializing responses.
//! - The credentials persisted by the CLI after a successful login.

use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

static MATRIX_ID_PATTERN: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^@([^:]+):([^:]+)$").expect("valid Matrix ID pattern"));

/// A fully-qualified Matrix user ID, e.g. `@alice:example.org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixId {
    localpart: String,
    server_name: String,
}

impl MatrixId {
    /// Parses `@localpart:server_name`. A port in the server name is not accepted.
    pub fn parse(matrix_id: &str) -> Result<Self> {
        let captures = MATRIX_ID_PATTERN
            .captures(matrix_id)
            .ok_or_else(|| AppError::InvalidMatrixId(matrix_id.to_string()))?;
        Ok(Self {
            localpart: captures[1].to_string(),
            server_name: captures[2].to_string(),
        })
    }

    pub fn localpart(&self) -> &str {
        &self.localpart
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl FromStr for MatrixId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}", self.localpart, self.server_name)
    }
}

// --- Discovery ---

/// Base URL entry inside a `.well-known/matrix/client` document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaseUrl {
    pub base_url: String,
}

/// Contents of `/.well-known/matrix/client`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryInfo {
    #[serde(rename = "m.homeserver")]
    pub homeserver: BaseUrl,
    #[serde(rename = "m.identity_server", default, skip_serializing_if = "Option::is_none")]
    pub identity_server: Option<BaseUrl>,
}

impl DiscoveryInfo {
    /// The homeserver base URL without a trailing slash.
    pub fn homeserver_url(&self) -> &str {
        self.homeserver.base_url.trim_end_matches('/')
    }
}

// --- Errors ---

/// Standard Matrix error body (`{"errcode": ..., "error": ...}`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatrixErrorBody {
    pub errcode: String,
    #[serde(default)]
    pub error: String,
}

// --- Auth ---

#[derive(Debug, Clone, Serialize)]
pub struct UserIdentifier {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub user: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub identifier: UserIdentifier,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_device_display_name: Option<String>,
}

impl LoginRequest {
    pub fn password(user: &str, password: &str) -> Self {
        Self {
            kind: "m.login.password",
            identifier: UserIdentifier {
                kind: "m.id.user",
                user: user.to_string(),
            },
            password: password.to_string(),
            device_id: None,
            initial_device_display_name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub access_token: String,
    pub device_id: String,
}

/// Interactive-auth stage sent with `/register`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_device_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub user_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// 401 body returned while interactive authentication is still in progress.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserInteractiveAuthInfo {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub flows: Vec<AuthFlow>,
    /// Set when the last submitted stage was rejected.
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UserInteractiveAuthInfo {
    pub fn has_completed(&self, stage: &str) -> bool {
        self.completed.iter().any(|s| s == stage)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthFlow {
    #[serde(default)]
    pub stages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationTokenResponse {
    pub token: String,
}

// --- Rooms ---

/// Message payload accepted by `send_message`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl MessageBody {
    /// Converts the payload into the JSON `body` field. Bytes must be valid UTF-8.
    pub fn into_value(self) -> Result<Value> {
        match self {
            MessageBody::Text(text) => Ok(Value::String(text)),
            MessageBody::Bytes(bytes) => String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|e| AppError::InvalidInput(format!("message is not UTF-8: {e}"))),
            MessageBody::Json(value) => Ok(value),
        }
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        MessageBody::Text(text.to_string())
    }
}

impl From<String> for MessageBody {
    fn from(text: String) -> Self {
        MessageBody::Text(text)
    }
}

impl From<Vec<u8>> for MessageBody {
    fn from(bytes: Vec<u8>) -> Self {
        MessageBody::Bytes(bytes)
    }
}

impl From<Value> for MessageBody {
    fn from(value: Value) -> Self {
        MessageBody::Json(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventIdResponse {
    pub event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomMessagesResponse {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub chunk: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinResponse {
    pub room_id: String,
}

/// `m.room.power_levels` content. Only `users` is typed; every other key is preserved.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// --- Sync ---

/// A stripped state event as delivered in `invite_state`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrippedStateEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state_key: String,
    pub sender: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InviteState {
    #[serde(default)]
    pub events: Vec<StrippedStateEvent>,
}

/// Details of one pending room invite.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InviteInfo {
    #[serde(default)]
    pub invite_state: InviteState,
}

impl InviteInfo {
    /// Who sent the invite, taken from the `m.room.member` stripped event when present.
    pub fn inviter(&self) -> Option<&str> {
        self.invite_state
            .events
            .iter()
            .find(|e| e.kind == "m.room.member")
            .map(|e| e.sender.as_str())
    }

    /// The room's name if the invite carried `m.room.name`.
    pub fn room_name(&self) -> Option<&str> {
        self.invite_state
            .events
            .iter()
            .find(|e| e.kind == "m.room.name")
            .and_then(|e| e.content.get("name"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncRooms {
    #[serde(default)]
    pub invite: HashMap<String, InviteInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

// --- Media ---

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub content_uri: String,
}

// --- Persisted credentials ---

/// Login details stored by the CLI in the user's data directory.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub homeserver_url: String,
    pub matrix_id: String,
}
