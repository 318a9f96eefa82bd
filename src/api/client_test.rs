#[cfg(test)]
mod tests {
    use crate::api::{
        discover_homeserver, get_homeserver_for_matrix_id, FractalClient, MatrixAdminClient,
        MatrixClient, UserOptions, DEFAULT_MSGTYPE,
    };
    use crate::config::Settings;
    use crate::error::{AppError, Result};
    use indicatif::ProgressBar;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::io::Write;

    const TOKEN: &str = "test_token";

    // Client with an admin token and no retries against the mock server
    fn client_for(server: &ServerGuard) -> FractalClient {
        FractalClient::new(&server.url(), Some(TOKEN.to_string()), None, 0).unwrap()
    }

    fn bearer() -> String {
        format!("Bearer {}", TOKEN)
    }

    // --- Discovery ---

    #[tokio::test]
    async fn test_discovery_info_success() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"m.homeserver": {"base_url": "https://matrix.example.org/"}}).to_string())
            .create_async()
            .await;

        let info = client_for(&server).discovery_info().await?;
        assert_eq!(info.homeserver_url(), "https://matrix.example.org");
        Ok(())
    }

    #[tokio::test]
    async fn test_discovery_not_found_raises_well_known_error() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(404)
            .create_async()
            .await;

        let result = discover_homeserver(&server.url()).await;
        match result {
            Err(AppError::WellKnownNotFound) => {},
            other => panic!("expected WellKnownNotFound, got {:?}", other),
        }
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_discovery_other_failure_is_unknown_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(500)
            .create_async()
            .await;

        match discover_homeserver(&server.url()).await {
            Err(AppError::UnknownDiscoveryInfo(reason)) => {
                assert_eq!(reason, "Internal Server Error")
            },
            other => panic!("expected UnknownDiscoveryInfo, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discovery_connection_refused_is_unknown_error() {
        match discover_homeserver("http://127.0.0.1:1").await {
            Err(AppError::UnknownDiscoveryInfo(reason)) => assert!(!reason.is_empty()),
            other => panic!("expected UnknownDiscoveryInfo, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discovery_apex_unchanged_when_same_host() -> Result<()> {
        let mut server = Server::new_async().await;
        let base_url = server.url();
        let _m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_body(json!({"m.homeserver": {"base_url": base_url}}).to_string())
            .create_async()
            .await;

        let (homeserver_url, apex_changed) = discover_homeserver(&server.url()).await?;
        assert_eq!(homeserver_url, server.url());
        assert!(!apex_changed);
        Ok(())
    }

    #[tokio::test]
    async fn test_discovery_apex_changed_when_delegated() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_body(
                json!({"m.homeserver": {"base_url": "https://matrix-client.test.com"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let (homeserver_url, apex_changed) = discover_homeserver(&server.url()).await?;
        assert_eq!(homeserver_url, "https://matrix-client.test.com");
        assert!(apex_changed);
        Ok(())
    }

    #[tokio::test]
    async fn test_localhost_matrix_id_uses_configured_homeserver() -> Result<()> {
        let mut server = Server::new_async().await;
        let base_url = server.url();
        let m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_body(json!({"m.homeserver": {"base_url": base_url}}).to_string())
            .create_async()
            .await;
        let settings = Settings {
            homeserver_url: Some(server.url()),
            ..Settings::default()
        };

        let (homeserver_url, _) = get_homeserver_for_matrix_id("@user:localhost", &settings).await?;
        assert_eq!(homeserver_url, server.url());
        m.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_session_discovers_homeserver_from_matrix_id() -> Result<()> {
        let mut server = Server::new_async().await;
        let base_url = server.url();
        let _m = server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_body(json!({"m.homeserver": {"base_url": base_url}}).to_string())
            .create_async()
            .await;
        let settings = Settings {
            homeserver_url: Some(server.url()),
            ..Settings::default()
        };
        // Settings only supply the localhost fallback; the session itself has no URL.
        let session = MatrixClient::builder(&settings)
            .matrix_id("@user:localhost")
            .build()?;
        let client = session.open().await?;
        assert_eq!(client.homeserver(), server.url());
        assert_eq!(client.user(), Some("@user:localhost"));
        Ok(())
    }

    // --- Auth ---

    #[tokio::test]
    async fn test_login_stores_access_token() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_matrix/client/v3/login")
            .match_body(Matcher::PartialJson(json!({
                "type": "m.login.password",
                "identifier": {"type": "m.id.user", "user": "@user:localhost"},
                "password": "pass"
            })))
            .with_status(200)
            .with_body(
                json!({"user_id": "@user:localhost", "access_token": "abc", "device_id": "DEV"})
                    .to_string(),
            )
            .create_async()
            .await;

        let mut client = FractalClient::new(&server.url(), None, None, 0)?;
        client.set_user("@user:localhost");
        let login = client.login("pass").await?;
        assert_eq!(login.access_token, "abc");
        assert_eq!(client.access_token(), Some("abc"));
        assert_eq!(client.user_id(), Some("@user:localhost"));
        assert_eq!(client.device_id(), Some("DEV"));
        Ok(())
    }

    #[tokio::test]
    async fn test_login_failure_maps_to_login_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_matrix/client/v3/login")
            .with_status(403)
            .with_body(json!({"errcode": "M_FORBIDDEN", "error": "Invalid password"}).to_string())
            .create_async()
            .await;

        let mut client = FractalClient::new(&server.url(), None, None, 0).unwrap();
        client.set_user("@user:localhost");
        match client.login("wrong").await {
            Err(AppError::Login(msg)) => assert_eq!(msg, "Invalid password"),
            other => panic!("expected Login error, got {:?}", other),
        }
        assert_eq!(client.access_token(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_token() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/_matrix/client/v3/logout")
            .match_header("authorization", bearer().as_str())
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut client = client_for(&server);
        client.logout().await?;
        assert_eq!(client.access_token(), None);
        m.assert_async().await;
        Ok(())
    }

    // --- Messaging ---

    #[tokio::test]
    async fn test_send_message_returns_event_id() {
        let mut server = Server::new_async().await;
        let m = server
            .mock(
                "PUT",
                Matcher::Regex(r"^/_matrix/client/v3/rooms/%21room%3Alocalhost/send/taskiq\.task/.+$".to_string()),
            )
            .match_header("authorization", bearer().as_str())
            .match_body(Matcher::Json(json!({"msgtype": "taskiq.task", "body": "hello"})))
            .with_status(200)
            .with_body(json!({"event_id": "$event"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let event_id = client
            .send_message("!room:localhost", b"hello".to_vec(), DEFAULT_MSGTYPE)
            .await;
        assert_eq!(event_id.as_deref(), Some("$event"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_swallows_errors() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("PUT", Matcher::Any)
            .with_status(403)
            .with_body(json!({"errcode": "M_FORBIDDEN", "error": "not in room"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let sent = client
            .send_message("!room:localhost", json!({"task": 1}), "m.text")
            .await;
        assert!(sent.is_none());
    }

    #[tokio::test]
    async fn test_get_latest_sync_token_uses_client_room() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/_matrix/client/v3/rooms/%21room%3Alocalhost/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("dir".into(), "b".into()),
                Matcher::UrlEncoded("limit".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(json!({"start": "t42-100", "end": "t41-99", "chunk": []}).to_string())
            .create_async()
            .await;

        let client = FractalClient::new(
            &server.url(),
            Some(TOKEN.to_string()),
            Some("!room:localhost".to_string()),
            0,
        )?;
        assert_eq!(client.get_latest_sync_token(None).await?, "t42-100");
        Ok(())
    }

    #[tokio::test]
    async fn test_get_latest_sync_token_without_room_fails() {
        let client = FractalClient::new("http://localhost:8008", None, None, 0).unwrap();
        match client.get_latest_sync_token(None).await {
            Err(AppError::GetLatestSyncToken(Some(msg))) => assert_eq!(msg, "No room id provided"),
            other => panic!("expected GetLatestSyncToken, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_latest_sync_token_server_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/_matrix/client/v3/rooms/%21gone%3Alocalhost/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(json!({"errcode": "M_FORBIDDEN", "error": "not joined"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .get_latest_sync_token(Some("!gone:localhost"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to get latest sync token: not joined");
    }

    // --- Invites ---

    #[tokio::test]
    async fn test_invite_sets_admin_power_level() -> Result<()> {
        let mut server = Server::new_async().await;
        let invite = server
            .mock("POST", "/_matrix/client/v3/rooms/%21room%3Alocalhost/invite")
            .match_body(Matcher::Json(json!({"user_id": "@bob:localhost"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let get_levels = server
            .mock(
                "GET",
                "/_matrix/client/v3/rooms/%21room%3Alocalhost/state/m.room.power_levels/",
            )
            .with_status(200)
            .with_body(
                json!({"users": {"@admin:localhost": 100}, "events_default": 0}).to_string(),
            )
            .create_async()
            .await;
        let put_levels = server
            .mock(
                "PUT",
                "/_matrix/client/v3/rooms/%21room%3Alocalhost/state/m.room.power_levels/",
            )
            .match_body(Matcher::Json(json!({
                "users": {"@admin:localhost": 100, "@bob:localhost": 100},
                "events_default": 0
            })))
            .with_status(200)
            .with_body(json!({"event_id": "$levels"}).to_string())
            .create_async()
            .await;

        client_for(&server)
            .invite("@bob:localhost", "!room:localhost", true)
            .await?;
        invite.assert_async().await;
        get_levels.assert_async().await;
        put_levels.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_invite_rejects_non_admin_and_uppercase() {
        let client = FractalClient::new("http://localhost:8008", None, None, 0).unwrap();
        assert!(matches!(
            client.invite("@bob:localhost", "!room:localhost", false).await,
            Err(AppError::Unsupported(_))
        ));
        match client.invite("@Bob:localhost", "!room:localhost", true).await {
            Err(AppError::InvalidInput(msg)) => assert_eq!(msg, "Matrix ids must be lowercase."),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invite_power_levels_errcode_is_error() {
        let mut server = Server::new_async().await;
        let _invite = server
            .mock("POST", "/_matrix/client/v3/rooms/%21room%3Alocalhost/invite")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let _levels = server
            .mock(
                "GET",
                "/_matrix/client/v3/rooms/%21room%3Alocalhost/state/m.room.power_levels/",
            )
            .with_status(200)
            .with_body(json!({"errcode": "M_NOT_FOUND", "error": "no power levels"}).to_string())
            .create_async()
            .await;

        match client_for(&server)
            .invite("@bob:localhost", "!room:localhost", true)
            .await
        {
            Err(AppError::Matrix { errcode, message, .. }) => {
                assert_eq!(errcode, "M_NOT_FOUND");
                assert_eq!(message, "no power levels");
            },
            other => panic!("expected Matrix error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_room_invites_preserves_next_batch() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("timeout".into(), "0".into()),
                Matcher::Regex("filter=".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "next_batch": "s_new",
                    "rooms": {"invite": {"!invited:localhost": {"invite_state": {"events": [
                        {"type": "m.room.member", "state_key": "@me:localhost",
                         "sender": "@admin:localhost", "content": {"membership": "invite"}}
                    ]}}}}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut client = client_for(&server);
        client.set_next_batch(Some("s_old".to_string()));
        let invites = client.get_room_invites().await?;

        assert_eq!(invites.len(), 1);
        assert_eq!(
            invites["!invited:localhost"].inviter(),
            Some("@admin:localhost")
        );
        assert_eq!(client.next_batch(), Some("s_old"));
        m.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_get_room_invites_sync_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(json!({"errcode": "M_UNKNOWN_TOKEN", "error": "Invalid token"}).to_string())
            .create_async()
            .await;

        let mut client = client_for(&server);
        let result = client.get_room_invites().await;
        assert!(matches!(result, Err(AppError::Matrix { status: 401, .. })));
        assert_eq!(client.next_batch(), None);
    }

    #[tokio::test]
    async fn test_join_room() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_matrix/client/v3/join/%21room%3Alocalhost")
            .with_status(200)
            .with_body(json!({"room_id": "!room:localhost"}).to_string())
            .create_async()
            .await;

        let joined = client_for(&server).join_room("!room:localhost").await?;
        assert_eq!(joined, "!room:localhost");
        Ok(())
    }

    #[tokio::test]
    async fn test_join_room_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_matrix/client/v3/join/%21room%3Alocalhost")
            .with_status(403)
            .with_body(json!({"errcode": "M_FORBIDDEN", "error": "banned"}).to_string())
            .create_async()
            .await;

        let result = client_for(&server).join_room("!room:localhost").await;
        assert!(matches!(result, Err(AppError::Matrix { status: 403, .. })));
    }

    #[tokio::test]
    async fn test_http_error_status_is_not_retried() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/_matrix/client/v3/join/%21room%3Alocalhost")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let client = FractalClient::new(&server.url(), Some(TOKEN.to_string()), None, 3).unwrap();
        match client.join_room("!room:localhost").await {
            Err(AppError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            },
            other => panic!("expected Http error, got {:?}", other),
        }
        m.assert_async().await;
    }

    // --- Synapse admin ---

    #[tokio::test]
    async fn test_disable_ratelimiting() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock(
                "POST",
                "/_synapse/admin/v1/users/%40bob%3Alocalhost/override_ratelimit",
            )
            .match_header("authorization", bearer().as_str())
            .match_body(Matcher::Json(json!({})))
            .with_status(200)
            .with_body(json!({"messages_per_second": 0, "burst_count": 0}).to_string())
            .create_async()
            .await;

        client_for(&server).disable_ratelimiting("@bob:localhost").await?;
        m.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_disable_ratelimiting_failure() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        match client_for(&server).disable_ratelimiting("@bob:localhost").await {
            Err(AppError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            },
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_registration_token() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_synapse/admin/v1/registration_tokens/new")
            .with_status(200)
            .with_body(json!({"token": "abcd", "uses_allowed": null}).to_string())
            .create_async()
            .await;

        assert_eq!(client_for(&server).generate_registration_token().await?, "abcd");
        Ok(())
    }

    #[tokio::test]
    async fn test_register_with_token_keeps_client_token() -> Result<()> {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::Json(json!({"username": "newuser", "password": "pass"})))
            .with_status(401)
            .with_body(
                json!({"session": "sess1", "flows": [{"stages": ["m.login.registration_token"]}], "completed": []})
                    .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::PartialJson(json!({
                "auth": {"type": "m.login.registration_token", "token": "reg", "session": "sess1"}
            })))
            .with_status(200)
            .with_body(
                json!({"user_id": "@newuser:localhost", "access_token": "new_token", "device_id": "D"})
                    .to_string(),
            )
            .create_async()
            .await;
        let ratelimit = server
            .mock(
                "POST",
                "/_synapse/admin/v1/users/%40newuser%3Alocalhost/override_ratelimit",
            )
            .match_header("authorization", bearer().as_str())
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = client_for(&server);
        let token = client
            .register_with_token("@NewUser:localhost", "pass", "reg", "", true)
            .await?;

        assert_eq!(token, "new_token");
        assert_eq!(client.access_token(), Some(TOKEN));
        second.assert_async().await;
        first.assert_async().await;
        ratelimit.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_register_with_token_completes_dummy_stage() -> Result<()> {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::Json(json!({
                "username": "u",
                "password": "pass",
                "initial_device_display_name": "laptop"
            })))
            .with_status(401)
            .with_body(json!({"session": "sess2", "flows": []}).to_string())
            .create_async()
            .await;
        let _token_stage = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::PartialJson(json!({"auth": {"type": "m.login.registration_token"}})))
            .with_status(401)
            .with_body(
                json!({"session": "sess2", "completed": ["m.login.registration_token"], "flows": []})
                    .to_string(),
            )
            .create_async()
            .await;
        let dummy = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::PartialJson(json!({"auth": {"type": "m.login.dummy", "session": "sess2"}})))
            .with_status(200)
            .with_body(json!({"user_id": "@u:localhost", "access_token": "tok"}).to_string())
            .create_async()
            .await;

        let token = client_for(&server)
            .register_with_token("@u:localhost", "pass", "reg", "laptop", false)
            .await?;
        assert_eq!(token, "tok");
        dummy.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_register_with_bad_token_is_rejected() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::Json(json!({"username": "u", "password": "pass"})))
            .with_status(401)
            .with_body(json!({"session": "s", "flows": []}).to_string())
            .create_async()
            .await;
        let _rejected = server
            .mock("POST", "/_matrix/client/v3/register")
            .match_body(Matcher::PartialJson(json!({"auth": {"type": "m.login.registration_token"}})))
            .with_status(401)
            .with_body(
                json!({"session": "s", "flows": [], "errcode": "M_FORBIDDEN", "error": "Invalid token"})
                    .to_string(),
            )
            .create_async()
            .await;

        match client_for(&server)
            .register_with_token("@u:localhost", "pass", "bad", "", false)
            .await
        {
            Err(AppError::Matrix { errcode, .. }) => assert_eq!(errcode, "M_FORBIDDEN"),
            other => panic!("expected Matrix error, got {:?}", other),
        }
    }

    // --- Media ---

    #[tokio::test]
    async fn test_upload_file_reports_progress() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile()?;
        file.write_all(b"some file contents")?;

        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/_matrix/media/v3/upload")
            .match_query(Matcher::UrlEncoded("filename".into(), "notes.txt".into()))
            .match_header("content-type", "text/plain")
            .match_body("some file contents")
            .with_status(200)
            .with_body(json!({"content_uri": "mxc://localhost/abc"}).to_string())
            .create_async()
            .await;

        let bar = ProgressBar::hidden();
        let uri = client_for(&server)
            .upload_file(file.path(), Some(&bar), Some("notes.txt"))
            .await?;

        assert_eq!(uri, "mxc://localhost/abc");
        assert_eq!(bar.length(), Some(18));
        assert_eq!(bar.position(), 18);
        m.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_io_error() {
        let client = FractalClient::new("http://localhost:8008", None, None, 0).unwrap();
        let result = client
            .upload_file(std::path::Path::new("/definitely/not/here.bin"), None, None)
            .await;
        assert!(matches!(result, Err(AppError::Io(_))));
    }

    // --- MatrixAdminClient ---

    #[tokio::test]
    async fn test_check_user_availability() -> Result<()> {
        let mut server = Server::new_async().await;
        let _free = server
            .mock("GET", "/_synapse/admin/v1/username_available")
            .match_query(Matcher::UrlEncoded("username".into(), "free".into()))
            .with_status(200)
            .with_body(json!({"available": true}).to_string())
            .create_async()
            .await;
        let _taken = server
            .mock("GET", "/_synapse/admin/v1/username_available")
            .match_query(Matcher::UrlEncoded("username".into(), "taken".into()))
            .with_status(400)
            .with_body(json!({"errcode": "M_USER_IN_USE", "error": "taken"}).to_string())
            .create_async()
            .await;

        let admin = MatrixAdminClient::new(&server.url(), TOKEN)?;
        assert!(admin.check_user_availability("@free:localhost").await?);
        assert!(!admin.check_user_availability("@taken:localhost").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_or_modify_user() -> Result<()> {
        let mut server = Server::new_async().await;
        let _available = server
            .mock("GET", "/_synapse/admin/v1/username_available")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"available": true}).to_string())
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/_synapse/admin/v2/users/%40alice%3Alocalhost")
            .match_header("authorization", bearer().as_str())
            .match_body(Matcher::PartialJson(json!({
                "displayname": "Alice",
                "admin": true,
                "logout_devices": true
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let admin = MatrixAdminClient::new(&server.url(), TOKEN)?;
        admin
            .create_or_modify_user(
                "@alice:localhost",
                UserOptions {
                    displayname: Some("Alice".to_string()),
                    admin: true,
                    ..UserOptions::default()
                },
            )
            .await?;
        put.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_user_with_empty_password_generates_one() -> Result<()> {
        let mut server = Server::new_async().await;
        let _available = server
            .mock("GET", "/_synapse/admin/v1/username_available")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"available": true}).to_string())
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/_synapse/admin/v2/users/%40carol%3Alocalhost")
            .match_body(Matcher::Regex(r#""password":"[0-9a-f]{32}""#.to_string()))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let admin = MatrixAdminClient::new(&server.url(), TOKEN)?;
        admin
            .create_or_modify_user(
                "@carol:localhost",
                UserOptions {
                    password: Some(String::new()),
                    ..UserOptions::default()
                },
            )
            .await?;
        put.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_user_that_is_taken_fails() {
        let mut server = Server::new_async().await;
        let _taken = server
            .mock("GET", "/_synapse/admin/v1/username_available")
            .match_query(Matcher::Any)
            .with_status(400)
            .create_async()
            .await;

        let admin = MatrixAdminClient::new(&server.url(), TOKEN).unwrap();
        match admin
            .create_or_modify_user("@alice:localhost", UserOptions::default())
            .await
        {
            Err(AppError::InvalidInput(msg)) => assert!(msg.contains("is not available")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_admin_login() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/_matrix/client/v3/login")
            .with_status(200)
            .with_body(
                json!({"user_id": "@alice:localhost", "access_token": "alice_token", "device_id": "D"})
                    .to_string(),
            )
            .create_async()
            .await;

        let admin = MatrixAdminClient::new(&server.url(), TOKEN)?;
        let (user_id, access_token) = admin.login("@alice:localhost", "pw").await?;
        assert_eq!(user_id, "@alice:localhost");
        assert_eq!(access_token, "alice_token");
        Ok(())
    }
}
