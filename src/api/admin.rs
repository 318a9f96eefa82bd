//! Client for the Synapse admin API (user management).

use crate::api::FractalClient;
use crate::config::REQUEST_TIMEOUT;
use crate::error::{AppError, Result};
use rand::Rng;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use urlencoding::encode;

/// Account fields accepted by `PUT /_synapse/admin/v2/users/{user_id}`.
///
/// `None` fields are left out of the request entirely.
#[derive(Debug, Clone, Serialize)]
pub struct UserOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub logout_devices: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threepids: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ids: Option<Vec<Value>>,
    pub admin: bool,
    pub deactivated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub locked: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            password: None,
            logout_devices: true,
            displayname: None,
            avatar_url: None,
            threepids: None,
            external_ids: None,
            admin: false,
            deactivated: false,
            user_type: None,
            locked: false,
        }
    }
}

/// 16 random bytes, hex encoded.
pub fn generate_password() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct MatrixAdminClient {
    http: Client,
    homeserver_url: String,
    admin_access_token: String,
}

impl MatrixAdminClient {
    pub fn new(homeserver_url: &str, admin_access_token: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            homeserver_url: homeserver_url.trim_end_matches('/').to_string(),
            admin_access_token: admin_access_token.to_string(),
        })
    }

    /// Sends an authenticated admin request; non-success statuses become `AppError::Http`.
    async fn do_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.homeserver_url, endpoint))
            .bearer_auth(&self.admin_access_token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Whether the localpart of `user_id` can still be registered.
    pub async fn check_user_availability(&self, user_id: &str) -> Result<bool> {
        let localpart = user_id
            .split(':')
            .next()
            .unwrap_or_default()
            .trim_start_matches('@');
        let endpoint = format!(
            "/_synapse/admin/v1/username_available?username={}",
            encode(localpart)
        );
        match self.do_request(Method::GET, &endpoint, None).await {
            Ok(_) => Ok(true),
            Err(AppError::Http { status, .. }) if status == StatusCode::BAD_REQUEST.as_u16() => {
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    /// Creates (or modifies) `user_id`. A random password is generated when none (or an empty one) is given.
    pub async fn create_or_modify_user(&self, user_id: &str, options: UserOptions) -> Result<()> {
        if !user_id.contains('@') || !user_id.contains(':') {
            return Err(AppError::InvalidInput(
                "User ID must be fully-qualified (e.g., '@user:server.com')".to_string(),
            ));
        }
        if !self.check_user_availability(user_id).await? {
            return Err(AppError::InvalidInput(format!(
                "User ID '{}' is not available",
                user_id
            )));
        }

        let options = UserOptions {
            password: options
                .password
                .filter(|p| !p.is_empty())
                .or_else(|| Some(generate_password())),
            ..options
        };
        let body = serde_json::to_value(&options)?;
        let endpoint = format!("/_synapse/admin/v2/users/{}", encode(user_id));

        info!("Creating user {}", user_id);
        self.do_request(Method::PUT, &endpoint, Some(&body))
            .await
            .map_err(|e| {
                error!("Failed to create user {}: {}", user_id, e);
                e
            })?;
        Ok(())
    }

    /// Logs in as `user_id`, returning `(user_id, access_token)`.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<(String, String)> {
        let mut client = FractalClient::new(&self.homeserver_url, None, None, 0)?;
        client.set_user(user_id);
        let result = client.login(password).await;
        client.close();
        let login = result?;
        Ok((login.user_id, login.access_token))
    }
}
