//! End-to-end session flows against mocked identity-provider and directory
//! servers.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use wiremock::{
    Match, Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

use crate::{
    auth::{
        AuthError, AuthState, ClaimsSynchronizer, HttpIdentityProvider, MemorySessionStore,
        Principal, SessionSnapshot, SessionState, SessionStore,
    },
    config::IdpConfig,
    directory::DirectoryClient,
};

/// Build an unsigned test token whose payload is `claims`.
fn fake_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.sig")
}

struct Harness {
    idp_server: MockServer,
    dir_server: MockServer,
    state: AuthState,
    store: Arc<MemorySessionStore>,
    sync: ClaimsSynchronizer,
}

impl Harness {
    async fn new() -> Self {
        let idp_server = MockServer::start().await;
        let dir_server = MockServer::start().await;
        let state = AuthState::new();
        let store = Arc::new(MemorySessionStore::new());

        // One shared HTTP client across both collaborators, as an embedding
        // application would wire it.
        let http = reqwest::Client::new();
        let idp = HttpIdentityProvider::with_client(
            IdpConfig {
                api_key: "test-key".to_string(),
                identity_url: idp_server.uri().parse().unwrap(),
                token_url: idp_server.uri().parse().unwrap(),
            },
            http.clone(),
        );
        let directory = DirectoryClient::with_client(
            http,
            dir_server.uri().parse().unwrap(),
            Some(state.clone()),
        );
        let sync = ClaimsSynchronizer::new(
            Arc::new(idp),
            Arc::new(directory),
            store.clone(),
            state.clone(),
        );

        Self {
            idp_server,
            dir_server,
            state,
            store,
            sync,
        }
    }

    /// Mount the provider's sign-in and forced-refresh endpoints. The
    /// refreshed token, not the sign-in token, carries `claim_roles`.
    async fn mount_idp(&self, claim_roles: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "idToken": fake_token(serde_json::json!({"roles": "Guest"})),
                "refreshToken": "refresh-1",
                "localId": "uid-1",
                "email": "jdoe@example.com",
                "expiresIn": "3600",
            })))
            .mount(&self.idp_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id_token": fake_token(serde_json::json!({"roles": claim_roles, "name": "Jane Doe"})),
                "refresh_token": "refresh-2",
                "user_id": "uid-1",
                "expires_in": "3600",
            })))
            .mount(&self.idp_server)
            .await;
    }

    async fn mount_exchange(&self, backend_roles: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/auth/login/firebase-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "backend-tok",
                "user": {
                    "id": "7",
                    "userName": "jdoe",
                    "fullName": "Jane Doe",
                    "email": "jdoe@example.com",
                    "providerId": "uid-1",
                    "roles": backend_roles,
                },
            })))
            .mount(&self.dir_server)
            .await;
    }

    async fn mount_mirror_put(&self) {
        Mock::given(method("PUT"))
            .and(path("/users/by-firebase-uid/uid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "7",
            })))
            .mount(&self.dir_server)
            .await;
    }

    /// Wait until the background mirror task has made `count` requests
    /// matching `http_method`.
    async fn wait_for_mirror(&self, http_method: &str, count: usize) {
        for _ in 0..200 {
            let hits = self
                .dir_server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|r| r.method.as_str() == http_method && r.url.path().contains("/users"))
                .count();
            if hits >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mirror request never arrived");
    }

    fn seeded_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            token: "cached-tok".to_string(),
            principal: Principal {
                id: Some("7".to_string()),
                provider_id: "uid-1".to_string(),
                username: Some("jdoe".to_string()),
                name: "Jane Doe".to_string(),
                email: "jdoe@example.com".to_string(),
                roles: vec!["User".to_string()],
                active: true,
                created_at: None,
            },
        }
    }
}

#[tokio::test]
async fn from_config_wires_a_file_backed_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::config::ClaimgateConfig::from_str(&format!(
        r#"
        [idp]
        api_key = "key-123"

        [directory]
        base_url = "http://localhost:3000/api"

        [session]
        cache_path = "{}"
    "#,
        dir.path().join("session.json").display()
    ))
    .unwrap();

    let sync = ClaimsSynchronizer::from_config(&config);
    assert_eq!(sync.state().current(), SessionState::Unauthenticated);
    // Nothing cached yet, so restore finds no session.
    assert!(!sync.restore().await.unwrap());
}

#[tokio::test]
async fn sign_in_takes_roles_from_claims_not_the_backend() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["Admin", "User"])).await;
    // The backend's own role field disagrees on purpose.
    h.mount_exchange(serde_json::json!(["Guest"])).await;
    h.mount_mirror_put().await;

    let session = h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();

    assert_eq!(session.principal.roles, vec!["Administrator", "User"]);
    assert_eq!(session.token, "backend-tok");
    assert_eq!(session.principal.id.as_deref(), Some("7"));
    assert!(h.state.current().is_confirmed());

    // The cached pair matches what was published.
    let snapshot = h.store.load().await.unwrap().unwrap();
    assert_eq!(snapshot.token, "backend-tok");
    assert_eq!(snapshot.principal.roles, vec!["Administrator", "User"]);

    h.wait_for_mirror("PUT", 1).await;
}

#[tokio::test]
async fn username_sign_in_resolves_through_the_directory() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/users/by-username/jdoe"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"email": "jdoe@example.com"})),
        )
        .mount(&h.dir_server)
        .await;
    h.mount_idp(serde_json::json!("User")).await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;

    let session = h.sync.sign_in("jdoe", "s3cret").await.unwrap();
    assert_eq!(session.principal.email, "jdoe@example.com");

    // The provider saw the resolved email, not the username.
    let sign_ins: Vec<_> = h
        .idp_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().ends_with(":signInWithPassword"))
        .collect();
    assert!(body_string_contains("jdoe@example.com").matches(&sign_ins[0]));
}

#[tokio::test]
async fn unknown_username_fails_before_the_provider() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/users/by-username/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.dir_server)
        .await;

    let err = h.sync.sign_in("ghost", "s3cret").await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
    assert!(h.idp_server.received_requests().await.unwrap().is_empty());
    assert!(!h.state.is_authenticated());
}

#[tokio::test]
async fn failed_token_exchange_leaves_no_session_behind() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["User"])).await;
    Mock::given(method("POST"))
        .and(path("/auth/login/firebase-token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.dir_server)
        .await;

    let err = h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap_err();
    assert!(matches!(err, AuthError::Directory(_)));
    assert!(!h.state.is_authenticated());
    assert!(h.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn restore_publishes_the_cached_pair_without_a_round_trip() {
    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    h.mount_mirror_put().await;

    assert!(h.sync.restore().await.unwrap());
    // Running it again with a live session changes nothing.
    assert!(h.sync.restore().await.unwrap());

    let current = h.state.current();
    assert!(current.is_authenticated());
    assert!(!current.is_confirmed());
    assert_eq!(h.state.bearer_token().as_deref(), Some("cached-tok"));

    h.wait_for_mirror("PUT", 1).await;

    // No provider traffic at all.
    assert!(h.idp_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn restore_with_an_empty_cache_stays_signed_out() {
    let h = Harness::new().await;
    assert!(!h.sync.restore().await.unwrap());
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn revalidate_falls_back_to_the_directory_record() {
    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    h.mount_mirror_put().await;
    Mock::given(method("GET"))
        .and(path("/users/by-firebase-uid/uid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "7",
            "userName": "jdoe",
            "fullName": "Jane Doe",
            "email": "jdoe@example.com",
            "providerId": "uid-1",
            "roles": ["Admin", "User"],
            "isActive": true,
        })))
        .mount(&h.dir_server)
        .await;

    h.sync.restore().await.unwrap();
    // No provider credential survives a restart, so the claims path cannot
    // run and the directory supplies provisional roles.
    let session = h.sync.revalidate().await.unwrap();

    assert_eq!(session.principal.roles, vec!["Administrator", "User"]);
    assert!(h.state.is_authenticated());
    assert!(!h.state.current().is_confirmed());
}

#[tokio::test]
async fn fallback_synthesizes_a_default_principal_when_unknown() {
    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    Mock::given(method("GET"))
        .and(path("/users/by-firebase-uid/uid-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.dir_server)
        .await;
    h.mount_mirror_put().await;

    h.sync.restore().await.unwrap();
    let session = h.sync.revalidate().await.unwrap();

    assert_eq!(session.principal.roles, vec!["User"]);
    assert_eq!(session.principal.name, "jdoe");
    assert!(session.principal.id.is_none());
}

#[tokio::test]
async fn revalidate_without_any_session_is_not_signed_in() {
    let h = Harness::new().await;
    let err = h.sync.revalidate().await.unwrap_err();
    assert!(matches!(err, AuthError::NotSignedIn));
}

#[tokio::test]
async fn refresh_claims_replaces_only_the_role_list() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "idToken": fake_token(serde_json::json!({"roles": "User"})),
            "refreshToken": "refresh-1",
            "localId": "uid-1",
            "email": "jdoe@example.com",
        })))
        .mount(&h.idp_server)
        .await;
    // First forced refresh (during sign-in) grants User; the one after the
    // administrative change grants Administrator too.
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id_token": fake_token(serde_json::json!({"roles": ["User"]})),
            "refresh_token": "refresh-2",
        })))
        .up_to_n_times(1)
        .mount(&h.idp_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id_token": fake_token(serde_json::json!({"roles": ["Admin", "User"]})),
            "refresh_token": "refresh-3",
        })))
        .mount(&h.idp_server)
        .await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;

    let before = h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    assert_eq!(before.principal.roles, vec!["User"]);

    let after = h.sync.refresh_claims().await.unwrap();
    assert_eq!(after.principal.roles, vec!["Administrator", "User"]);
    assert_eq!(after.principal.name, before.principal.name);
    assert_eq!(after.principal.email, before.principal.email);
    assert_eq!(after.token, before.token);
    assert!(h.state.current().is_confirmed());

    let snapshot = h.store.load().await.unwrap().unwrap();
    assert_eq!(snapshot.principal.roles, vec!["Administrator", "User"]);
}

#[tokio::test]
async fn resync_after_a_cold_restore_applies_the_repaired_record() {
    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    h.mount_mirror_put().await;
    Mock::given(method("POST"))
        .and(path("/users/by-firebase-uid/uid-1/sync-roles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "7",
            "userName": "jdoe",
            "fullName": "Jane Doe",
            "email": "jdoe@example.com",
            "providerId": "uid-1",
            "roles": ["Admin", "User"],
            "isActive": true,
        })))
        .mount(&h.dir_server)
        .await;

    h.sync.restore().await.unwrap();
    // No provider credential survives a restart; the repaired record must
    // still land in the live principal.
    let session = h.sync.resync_directory().await.unwrap();

    assert_eq!(session.principal.roles, vec!["Administrator", "User"]);
    assert!(h.state.is_authenticated());
    assert!(!h.state.current().is_confirmed());

    let snapshot = h.store.load().await.unwrap().unwrap();
    assert_eq!(snapshot.principal.roles, vec!["Administrator", "User"]);
}

#[tokio::test]
async fn resync_with_a_live_credential_prefers_claims() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["Admin"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;
    // The backend's repaired record disagrees with claims on purpose.
    Mock::given(method("POST"))
        .and(path("/users/by-firebase-uid/uid-1/sync-roles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "7",
            "roles": ["Guest"],
        })))
        .mount(&h.dir_server)
        .await;

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    let session = h.sync.resync_directory().await.unwrap();

    assert_eq!(session.principal.roles, vec!["Administrator"]);
    assert!(h.state.current().is_confirmed());
}

#[tokio::test]
async fn resync_without_a_session_is_not_signed_in() {
    let h = Harness::new().await;
    let err = h.sync.resync_directory().await.unwrap_err();
    assert!(matches!(err, AuthError::NotSignedIn));
    assert!(h.dir_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_claims_without_a_session_is_not_signed_in() {
    let h = Harness::new().await;
    let err = h.sync.refresh_claims().await.unwrap_err();
    assert!(matches!(err, AuthError::NotSignedIn));
}

#[tokio::test]
async fn handle_unauthorized_clears_the_session_once() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["User"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    assert!(h.state.is_authenticated());

    h.sync.handle_unauthorized().await;
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
    assert!(h.store.load().await.unwrap().is_none());

    // Already signed out: a second rejection is a no-op.
    h.sync.handle_unauthorized().await;
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn with_session_translates_a_rejected_token() {
    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    h.mount_mirror_put().await;
    h.sync.restore().await.unwrap();

    let err = h
        .sync
        .with_session(|_session| async {
            Err::<(), _>(crate::directory::DirectoryError::Unauthorized)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::TokenExchange));
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
    assert!(h.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn sign_out_discards_everything() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["User"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    h.sync.sign_out().await;

    assert_eq!(h.state.current(), SessionState::Unauthenticated);
    assert!(h.store.load().await.unwrap().is_none());
    // A refresh after sign-out has nothing to work with.
    assert!(matches!(
        h.sync.refresh_claims().await.unwrap_err(),
        AuthError::NotSignedIn
    ));
}

#[tokio::test]
async fn mirror_falls_back_to_create_when_the_record_is_missing() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["User"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    Mock::given(method("PUT"))
        .and(path("/users/by-firebase-uid/uid-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.dir_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "8"})),
        )
        .mount(&h.dir_server)
        .await;

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    h.wait_for_mirror("POST", 1).await;
}

#[tokio::test]
async fn guard_decisions_follow_the_live_session() {
    use crate::authz::{GuardDecision, RouteGuard, RouteRequirement};

    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["Admin"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    h.mount_mirror_put().await;

    let guard = RouteGuard::new(h.state.clone());
    let admin_only = RouteRequirement::all_of(["Administrator"]);
    assert_eq!(
        guard.check(&admin_only),
        GuardDecision::Redirect("/".to_string())
    );

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    assert!(guard.check(&admin_only).is_allowed());

    h.sync.sign_out().await;
    assert!(!guard.check(&admin_only).is_allowed());
}

#[tokio::test]
async fn gate_visibility_flips_with_a_role_refresh() {
    use crate::authz::{RoleGate, RouteRequirement};

    let h = Harness::new().await;
    h.store.store(&Harness::seeded_snapshot()).await.unwrap();
    h.mount_mirror_put().await;
    h.sync.restore().await.unwrap();

    let gate = RoleGate::new(&h.state, RouteRequirement::any_of(["Administrator"]));
    assert!(!gate.visible());

    // An administrative change lands in the directory record; the fallback
    // path picks it up.
    Mock::given(method("GET"))
        .and(path("/users/by-firebase-uid/uid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "7",
            "roles": ["Administrator"],
        })))
        .mount(&h.dir_server)
        .await;
    h.sync.revalidate().await.unwrap();
    assert!(gate.visible());
}

#[tokio::test]
async fn mirror_failure_does_not_disturb_the_session() {
    let h = Harness::new().await;
    h.mount_idp(serde_json::json!(["User"])).await;
    h.mount_exchange(serde_json::Value::Null).await;
    Mock::given(method("PUT"))
        .and(path("/users/by-firebase-uid/uid-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.dir_server)
        .await;

    h.sync.sign_in("jdoe@example.com", "s3cret").await.unwrap();
    h.wait_for_mirror("PUT", 1).await;
    assert!(h.state.is_authenticated());
}
