//! Homeserver discovery from a Matrix ID via `/.well-known/matrix/client`.

use crate::api::FractalClient;
use crate::config::Settings;
use crate::error::Result;
use crate::models::MatrixId;
use tracing::{debug, info};
use url::Url;

/// Looks up the homeserver URL associated with a Matrix ID.
///
/// Returns the discovered base URL and whether it lives outside the Matrix
/// ID's own host (`apex_changed`). IDs on `localhost` are resolved against the
/// configured homeserver, or `http://localhost:8008`.
pub async fn get_homeserver_for_matrix_id(
    matrix_id: &str,
    settings: &Settings,
) -> Result<(String, bool)> {
    // A localhost ID says nothing about where the server runs (synapse:8008 in compose, etc).
    let candidate = if matrix_id.contains("localhost") {
        settings.local_homeserver_url().to_string()
    } else {
        let id = MatrixId::parse(matrix_id)?;
        format!("https://{}", id.server_name())
    };
    info!("Discovering homeserver for {} via {}", matrix_id, candidate);
    discover_homeserver(&candidate).await
}

/// Reads the `.well-known` document served at `candidate_url`.
pub async fn discover_homeserver(candidate_url: &str) -> Result<(String, bool)> {
    let candidate_host = Url::parse(candidate_url)?
        .host_str()
        .unwrap_or_default()
        .to_string();

    let client = FractalClient::new(candidate_url, None, None, 0)?;
    let info = client.discovery_info().await;
    client.close();
    let homeserver_url = info?.homeserver_url().to_string();

    let discovered = Url::parse(&homeserver_url)?;
    let authority = match (discovered.host_str(), discovered.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    };
    let apex_changed = !authority.contains(&candidate_host);
    debug!(
        "Discovered {} for {} (apex changed: {})",
        homeserver_url, candidate_host, apex_changed
    );
    Ok((homeserver_url, apex_changed))
}
