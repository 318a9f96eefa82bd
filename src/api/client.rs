//! Provides `FractalClient`, an asynchronous client for a Matrix homeserver.
//!
//! Wraps the handful of client-server and Synapse admin endpoints the rest of
//! the crate needs: login, messaging, invites, registration and media upload.
//! Requests that time out or cannot connect are retried up to `max_timeouts` times.

use crate::config::{DEFAULT_MAX_TIMEOUTS, REQUEST_TIMEOUT};
use crate::error::{AppError, Result};
use crate::models::{
    AuthData, DiscoveryInfo, EventIdResponse, InviteInfo, JoinResponse, LoginRequest,
    LoginResponse, MatrixErrorBody, MatrixId, MessageBody, PowerLevels, RegisterRequest,
    RegisterResponse, RegistrationTokenResponse, RoomMessagesResponse, SyncResponse,
    UploadResponse, UserInteractiveAuthInfo,
};
use chrono::Utc;
use futures::StreamExt;
use indicatif::ProgressBar;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, info};
use urlencoding::encode;

const CLIENT_API: &str = "/_matrix/client/v3";
const MEDIA_API: &str = "/_matrix/media/v3";
const SYNAPSE_ADMIN_API: &str = "/_synapse/admin/v1";

/// Event type used by `send_message` when the caller has no preference.
pub const DEFAULT_MSGTYPE: &str = "taskiq.task";

/// Power level granted to users invited through `invite`.
pub const ADMIN_POWER_LEVEL: i64 = 100;

const REGISTRATION_TOKEN_STAGE: &str = "m.login.registration_token";
const DUMMY_STAGE: &str = "m.login.dummy";
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Retry and timeout settings for a `FractalClient`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    /// Retries after a timed-out or refused connection. Zero disables retrying.
    pub max_timeouts: usize,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Sync filter that drops everything except pending invites.
pub fn invite_filter() -> Value {
    let empty = json!({"types": [], "limit": 0});
    json!({
        "presence": empty,
        "account_data": empty,
        "room": {
            "state": empty,
            "timeline": empty,
            "account_data": empty,
            "ephemeral": empty,
        }
    })
}

/// Mirrors Python's `str.islower`: at least one cased character and no uppercase ones.
fn is_lowercase(s: &str) -> bool {
    s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase)
}

fn transaction_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}.{}", Utc::now().timestamp_millis(), suffix)
}

/// Converts a non-success response into `AppError::Matrix` (or `AppError::Http`
/// when the body is not a Matrix error).
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, body))
}

fn error_from_body(status: StatusCode, body: String) -> AppError {
    match serde_json::from_str::<MatrixErrorBody>(&body) {
        Ok(err) => AppError::Matrix {
            status: status.as_u16(),
            errcode: err.errcode,
            message: err.error,
        },
        Err(_) => AppError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

/// Outcome of one `/register` round trip.
enum RegisterStep {
    Done(RegisterResponse),
    NeedsAuth(UserInteractiveAuthInfo),
}

/// An asynchronous Matrix client bound to a single homeserver.
pub struct FractalClient {
    http: Client,
    homeserver: String,
    access_token: Option<String>,
    user: Option<String>,
    user_id: Option<String>,
    device_id: Option<String>,
    room_id: Option<String>,
    next_batch: Option<String>,
    config: ClientConfig,
}

impl FractalClient {
    /// Creates a client for `homeserver_url`. An empty access token is treated as none.
    pub fn new(
        homeserver_url: &str,
        access_token: Option<String>,
        room_id: Option<String>,
        max_timeouts: usize,
    ) -> Result<Self> {
        let config = ClientConfig {
            max_timeouts,
            ..ClientConfig::default()
        };
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            homeserver: homeserver_url.trim_end_matches('/').to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
            user: None,
            user_id: None,
            device_id: None,
            room_id,
            next_batch: None,
            config,
        })
    }

    pub fn homeserver(&self) -> &str {
        &self.homeserver
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// The user name or Matrix ID `login` authenticates as.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = Some(user.into());
    }

    /// The Matrix ID the homeserver reported after login.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// Token of the last successful `sync`.
    pub fn next_batch(&self) -> Option<&str> {
        self.next_batch.as_deref()
    }

    pub fn set_next_batch(&mut self, next_batch: Option<String>) {
        self.next_batch = next_batch;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Releases the client. Pending connections are dropped with the inner HTTP pool.
    pub fn close(self) {
        debug!("Closing Matrix client for {}", self.homeserver);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.homeserver, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends the request built by `build`, rebuilding and retrying it after
    /// timeouts and connection failures. HTTP error statuses are returned as-is.
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(self.config.request_timeout)
            .map(jitter)
            .take(self.config.max_timeouts);

        RetryIf::start(
            strategy,
            || build().send(),
            |e: &reqwest::Error| {
                let retry = e.is_timeout() || e.is_connect();
                if retry {
                    debug!("Retrying request after transport error: {}", e);
                }
                retry
            },
        )
        .await
        .map_err(|e| {
            error!("Request to {} failed: {}", self.homeserver, e);
            AppError::from(e)
        })
    }

    /// Fetches `/.well-known/matrix/client` from this client's homeserver.
    pub async fn discovery_info(&self) -> Result<DiscoveryInfo> {
        let url = self.url("/.well-known/matrix/client");
        let response = self
            .execute(|| self.http.get(&url))
            .await
            .map_err(|e| AppError::UnknownDiscoveryInfo(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::WellKnownNotFound);
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or(status.as_str());
            return Err(AppError::UnknownDiscoveryInfo(reason.to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::UnknownDiscoveryInfo(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| {
            AppError::UnknownDiscoveryInfo(format!("invalid discovery document: {}", e))
        })
    }

    /// Logs in with a password as `user`, storing the returned access token and device.
    pub async fn login(&mut self, password: &str) -> Result<LoginResponse> {
        let user = self
            .user
            .clone()
            .ok_or_else(|| AppError::Login("no user set on the client".to_string()))?;
        let url = self.url(&format!("{}/login", CLIENT_API));
        let request = LoginRequest::password(&user, password);

        info!("Logging in to {} as {}", self.homeserver, user);
        let response = self.execute(|| self.http.post(&url).json(&request)).await?;
        let login: LoginResponse = match check(response).await {
            Ok(response) => response.json().await?,
            Err(AppError::Matrix { message, .. }) => return Err(AppError::Login(message)),
            Err(e) => return Err(e),
        };

        self.access_token = Some(login.access_token.clone());
        self.user_id = Some(login.user_id.clone());
        self.device_id = Some(login.device_id.clone());
        Ok(login)
    }

    /// Invalidates the current access token on the homeserver.
    pub async fn logout(&mut self) -> Result<()> {
        let url = self.url(&format!("{}/logout", CLIENT_API));
        let response = self
            .execute(|| self.authed(self.http.post(&url)).json(&json!({})))
            .await?;
        check(response).await?;
        self.access_token = None;
        Ok(())
    }

    /// Sends a message event of type `msgtype` to `room`.
    ///
    /// Encrypted rooms are not supported. Failures are logged rather than
    /// returned; the event id is returned when the send succeeds.
    pub async fn send_message(
        &self,
        room: &str,
        message: impl Into<MessageBody>,
        msgtype: &str,
    ) -> Option<String> {
        let body = match message.into().into_value() {
            Ok(body) => body,
            Err(e) => {
                error!("Error sending message: {}", e);
                return None;
            },
        };
        let content = json!({"msgtype": msgtype, "body": body});
        debug!("Sending message: {} to room {}", content, room);

        let url = self.url(&format!(
            "{}/rooms/{}/send/{}/{}",
            CLIENT_API,
            encode(room),
            encode(msgtype),
            transaction_id()
        ));
        let result = async {
            let response = self
                .execute(|| self.authed(self.http.put(&url)).json(&content))
                .await?;
            let sent: EventIdResponse = check(response).await?.json().await?;
            Ok::<_, AppError>(sent)
        }
        .await;

        match result {
            Ok(sent) => {
                debug!("Response from room_send: {:?}", sent);
                Some(sent.event_id)
            },
            Err(e) => {
                error!("Error sending message: {}", e);
                None
            },
        }
    }

    /// Returns the latest sync token for a room in constant time by reading a
    /// single event backwards from the end of the timeline.
    ///
    /// Falls back to the client's room when `room_id` is `None`.
    pub async fn get_latest_sync_token(&self, room_id: Option<&str>) -> Result<String> {
        let room_id = room_id
            .or(self.room_id.as_deref())
            .ok_or_else(|| AppError::GetLatestSyncToken(Some("No room id provided".to_string())))?;

        let url = self.url(&format!("{}/rooms/{}/messages", CLIENT_API, encode(room_id)));
        let response = self
            .execute(|| {
                self.authed(self.http.get(&url))
                    .query(&[("dir", "b"), ("limit", "1")])
            })
            .await?;

        match check(response).await {
            Ok(response) => {
                let messages: RoomMessagesResponse = response.json().await?;
                Ok(messages.start)
            },
            Err(AppError::Matrix { message, .. }) => Err(AppError::GetLatestSyncToken(Some(message))),
            Err(AppError::Http { body, .. }) => Err(AppError::GetLatestSyncToken(Some(body))),
            Err(e) => Err(e),
        }
    }

    /// Invites `user_id` to `room_id` and raises their power level to 100.
    ///
    /// Only admin invites are supported, and the Matrix ID must be lowercase.
    pub async fn invite(&self, user_id: &str, room_id: &str, admin: bool) -> Result<()> {
        if !admin {
            return Err(AppError::Unsupported(
                "Only admin invites are supported for now.".to_string(),
            ));
        }
        let after_sigil = user_id
            .split('@')
            .nth(1)
            .ok_or_else(|| AppError::InvalidMatrixId(user_id.to_string()))?;
        if !is_lowercase(after_sigil) {
            return Err(AppError::InvalidInput("Matrix ids must be lowercase.".to_string()));
        }

        info!("Sending invite to {} to user ({})", room_id, user_id);
        let url = self.url(&format!("{}/rooms/{}/invite", CLIENT_API, encode(room_id)));
        let body = json!({"user_id": user_id});
        let response = self
            .execute(|| self.authed(self.http.post(&url)).json(&body))
            .await?;
        check(response).await?;

        let mut power_levels = self.room_power_levels(room_id).await?;
        power_levels
            .users
            .insert(user_id.to_string(), ADMIN_POWER_LEVEL);

        let url = self.power_levels_url(room_id);
        let response = self
            .execute(|| self.authed(self.http.put(&url)).json(&power_levels))
            .await?;
        check(response).await?;
        Ok(())
    }

    fn power_levels_url(&self, room_id: &str) -> String {
        self.url(&format!(
            "{}/rooms/{}/state/m.room.power_levels/",
            CLIENT_API,
            encode(room_id)
        ))
    }

    async fn room_power_levels(&self, room_id: &str) -> Result<PowerLevels> {
        let url = self.power_levels_url(room_id);
        let response = self.execute(|| self.authed(self.http.get(&url))).await?;
        let status = response.status();
        let content: Value = check(response).await?.json().await?;

        if let Some(errcode) = content.get("errcode").and_then(Value::as_str) {
            return Err(AppError::Matrix {
                status: status.as_u16(),
                errcode: errcode.to_string(),
                message: content
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(serde_json::from_value(content)?)
    }

    /// Calls `/sync` and records the returned `next_batch`.
    pub async fn sync(
        &mut self,
        since: Option<&str>,
        timeout_ms: u64,
        filter: Option<&Value>,
    ) -> Result<SyncResponse> {
        let url = self.url(&format!("{}/sync", CLIENT_API));
        let mut query = vec![("timeout", timeout_ms.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }

        let response = self
            .execute(|| self.authed(self.http.get(&url)).query(&query))
            .await?;
        let sync: SyncResponse = check(response).await?.json().await?;
        self.next_batch = Some(sync.next_batch.clone());
        Ok(sync)
    }

    /// Returns pending invites keyed by room id.
    ///
    /// Runs a full, invite-only sync; the client's `next_batch` is left untouched.
    pub async fn get_room_invites(&mut self) -> Result<HashMap<String, InviteInfo>> {
        let previous_next_batch = self.next_batch.clone();
        let filter = invite_filter();
        let result = self.sync(None, 0, Some(&filter)).await;
        self.next_batch = previous_next_batch;
        Ok(result?.rooms.invite)
    }

    /// Joins a room by id or alias, returning the joined room id.
    pub async fn join_room(&self, room_id: &str) -> Result<String> {
        info!("Joining room: {}", room_id);
        let url = self.url(&format!("{}/join/{}", CLIENT_API, encode(room_id)));
        let response = self
            .execute(|| self.authed(self.http.post(&url)).json(&json!({})))
            .await?;
        let joined: JoinResponse = check(response).await?.json().await?;
        Ok(joined.room_id)
    }

    /// Disables Synapse rate limiting for `matrix_id`. Requires an admin token.
    pub async fn disable_ratelimiting(&self, matrix_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "{}/users/{}/override_ratelimit",
            SYNAPSE_ADMIN_API,
            encode(matrix_id)
        ));

        info!("Disabling rate limiting for user: {}", matrix_id);
        let response = self
            .execute(|| self.authed(self.http.post(&url)).json(&json!({})))
            .await?;
        match check(response).await {
            Ok(_) => {
                info!("Rate limit override successful.");
                Ok(())
            },
            Err(e) => {
                error!("Failed to override rate limit: {}", e);
                Err(e)
            },
        }
    }

    /// Creates a new single-use registration token. Requires an admin token.
    pub async fn generate_registration_token(&self) -> Result<String> {
        let url = self.url(&format!("{}/registration_tokens/new", SYNAPSE_ADMIN_API));
        let response = self
            .execute(|| self.authed(self.http.post(&url)).json(&json!({})))
            .await?;
        match check(response).await {
            Ok(response) => {
                let created: RegistrationTokenResponse = response.json().await?;
                Ok(created.token)
            },
            Err(e) => {
                error!("Failed to create registration token: {}", e);
                Err(e)
            },
        }
    }

    async fn register_step(&self, url: &str, request: &RegisterRequest) -> Result<RegisterStep> {
        let response = self.execute(|| self.http.post(url).json(request)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let text = response.text().await?;
            let info: UserInteractiveAuthInfo = serde_json::from_str(&text)?;
            return Ok(RegisterStep::NeedsAuth(info));
        }
        let registered: RegisterResponse = check(response).await?.json().await?;
        Ok(RegisterStep::Done(registered))
    }

    /// Registers `matrix_id` using a registration token, returning the new
    /// user's access token.
    ///
    /// The Matrix ID is lower-cased first. The client's own access token is
    /// kept, so an admin client can register several users in a row.
    pub async fn register_with_token(
        &self,
        matrix_id: &str,
        password: &str,
        registration_token: &str,
        device_name: &str,
        disable_ratelimiting: bool,
    ) -> Result<String> {
        let matrix_id = matrix_id.to_lowercase();
        let username = MatrixId::parse(&matrix_id)?.localpart().to_string();
        let url = self.url(&format!("{}/register", CLIENT_API));

        let mut request = RegisterRequest {
            username,
            password: password.to_string(),
            initial_device_display_name: (!device_name.is_empty())
                .then(|| device_name.to_string()),
            auth: None,
        };

        let session = match self.register_step(&url, &request).await? {
            RegisterStep::Done(registered) => {
                return self
                    .finish_registration(&matrix_id, registered, disable_ratelimiting)
                    .await;
            },
            RegisterStep::NeedsAuth(info) => info.session,
        };

        request.auth = Some(AuthData {
            kind: REGISTRATION_TOKEN_STAGE.to_string(),
            token: Some(registration_token.to_string()),
            session: session.clone(),
        });
        let registered = match self.register_step(&url, &request).await? {
            RegisterStep::Done(registered) => registered,
            RegisterStep::NeedsAuth(info) if info.has_completed(REGISTRATION_TOKEN_STAGE) => {
                debug!("Registration token accepted, completing dummy stage");
                request.auth = Some(AuthData {
                    kind: DUMMY_STAGE.to_string(),
                    token: None,
                    session: info.session.or(session),
                });
                match self.register_step(&url, &request).await? {
                    RegisterStep::Done(registered) => registered,
                    RegisterStep::NeedsAuth(info) => return Err(rejected_registration(info)),
                }
            },
            RegisterStep::NeedsAuth(info) => return Err(rejected_registration(info)),
        };

        self.finish_registration(&matrix_id, registered, disable_ratelimiting)
            .await
    }

    async fn finish_registration(
        &self,
        matrix_id: &str,
        registered: RegisterResponse,
        disable_ratelimiting: bool,
    ) -> Result<String> {
        info!("Registered {}", registered.user_id);
        let access_token = registered.access_token.ok_or_else(|| {
            AppError::Login(format!("registration of {} returned no access token", matrix_id))
        })?;
        if disable_ratelimiting {
            self.disable_ratelimiting(matrix_id).await?;
        }
        Ok(access_token)
    }

    /// Uploads a file to the homeserver's media repository and returns its `mxc://` URI.
    ///
    /// When `progress` is given, its length is set to the file size and it is
    /// advanced as chunks are sent.
    pub async fn upload_file(
        &self,
        file_path: &Path,
        progress: Option<&ProgressBar>,
        filename: Option<&str>,
    ) -> Result<String> {
        let size = tokio::fs::metadata(file_path).await?.len();
        let data = tokio::fs::read(file_path).await?;
        let content_type = mime_guess::from_path(file_path).first_or_octet_stream();
        let filename = filename.map(str::to_string).or_else(|| {
            file_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        });

        info!("Uploading file: {}", file_path.display());
        if let Some(bar) = progress {
            bar.set_length(size);
        }

        let url = self.url(&format!("{}/upload", MEDIA_API));
        let response = self
            .execute(|| {
                let chunks: Vec<std::io::Result<Vec<u8>>> = data
                    .chunks(UPLOAD_CHUNK_SIZE)
                    .map(|chunk| Ok(chunk.to_vec()))
                    .collect();
                let bar = progress.cloned();
                if let Some(bar) = &bar {
                    bar.set_position(0);
                }
                let stream = futures::stream::iter(chunks).inspect(move |chunk| {
                    if let (Some(bar), Ok(chunk)) = (&bar, chunk) {
                        bar.inc(chunk.len() as u64);
                    }
                });

                let mut request = self
                    .authed(self.http.post(&url))
                    .header(CONTENT_TYPE, content_type.as_ref())
                    .header(CONTENT_LENGTH, size)
                    .body(Body::wrap_stream(stream));
                if let Some(name) = &filename {
                    request = request.query(&[("filename", name)]);
                }
                request
            })
            .await?;

        match check(response).await {
            Ok(response) => {
                let uploaded: UploadResponse = response.json().await?;
                Ok(uploaded.content_uri)
            },
            Err(e) => {
                error!("Failed to upload file {}: {}", file_path.display(), e);
                Err(e)
            },
        }
    }
}

fn rejected_registration(info: UserInteractiveAuthInfo) -> AppError {
    match info.errcode {
        Some(errcode) => AppError::Matrix {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            errcode,
            message: info.error.unwrap_or_default(),
        },
        None => AppError::Login("registration token was not accepted".to_string()),
    }
}
