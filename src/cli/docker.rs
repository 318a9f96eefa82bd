//! Helpers for the Synapse container started by `make synapse`.

use crate::error::{AppError, Result};
use tokio::process::Command;
use tracing::{debug, info};

const ALREADY_TAKEN: &str = "User ID already taken";

/// Returns the id of the first running container carrying `label`.
pub async fn find_homeserver_container(label: &str) -> Result<String> {
    let output = Command::new("docker")
        .args(["ps", "--quiet", "--filter"])
        .arg(format!("label={}", label))
        .output()
        .await
        .map_err(|e| AppError::Docker(format!("failed to run docker: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::Docker(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    first_container_id(&stdout)
        .map(str::to_string)
        .ok_or_else(|| AppError::Docker(format!("No synapse server running locally (label {}).", label)))
}

fn first_container_id(ps_output: &str) -> Option<&str> {
    ps_output.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Creates an admin account inside the container with `register_new_matrix_user`.
///
/// An account that already exists is not an error.
pub async fn register_admin_user(container: &str, username: &str, password: &str) -> Result<()> {
    info!("Registering {} inside container {}", username, container);
    let output = Command::new("docker")
        .args(["exec", container, "register_new_matrix_user"])
        .args(["-c", "/data/homeserver.yaml", "-a", "-u", username, "-p", password])
        .arg("http://localhost:8008")
        .output()
        .await
        .map_err(|e| AppError::Docker(format!("failed to run docker exec: {}", e)))?;

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    debug!("register_new_matrix_user output: {}", combined.trim());
    check_registration_output(output.status.success(), &combined)
}

fn check_registration_output(success: bool, output: &str) -> Result<()> {
    if success || output.contains(ALREADY_TAKEN) {
        Ok(())
    } else {
        Err(AppError::Docker(output.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_non_empty_container_id() {
        assert_eq!(first_container_id("\n  abc123\ndef456\n"), Some("abc123"));
        assert_eq!(first_container_id(""), None);
    }

    #[test]
    fn existing_user_is_not_a_failure() {
        assert!(check_registration_output(false, "ERROR! User ID already taken.").is_ok());
        assert!(check_registration_output(true, "Success!").is_ok());
        assert!(matches!(
            check_registration_output(false, "Connection refused"),
            Err(AppError::Docker(msg)) if msg == "Connection refused"
        ));
    }
}
