//! Firebase backend against a mocked Identity Toolkit, token endpoint and key set.

mod common;

use common::*;
use identity_gateway::backend::firebase::{CUSTOM_TOKEN_AUDIENCE, FirebaseBackend, FirebaseEndpoints};
use identity_gateway::backend::{IdentityBackend, NewIdentity, SessionClaims};
use identity_gateway::config::ServiceAccount;
use identity_gateway::error::{BackendError, VerifyError};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "demo-proj";
const CLIENT_EMAIL: &str = "svc@demo-proj.iam.gserviceaccount.com";
const LOOKUP_PATH: &str = "/v1/projects/demo-proj/accounts:lookup";
const CREATE_PATH: &str = "/v1/projects/demo-proj/accounts";

fn backend(server: &MockServer) -> FirebaseBackend {
    FirebaseBackend::new(
        ServiceAccount {
            project_id: PROJECT.to_string(),
            client_email: CLIENT_EMAIL.to_string(),
            private_key: PRIVATE_KEY_PEM.to_string(),
        },
        FirebaseEndpoints {
            identity_toolkit_url: format!("{}/v1", server.uri()),
            oauth_token_url: format!("{}/token", server.uri()),
            jwks_url: format!("{}/jwks", server.uri()),
            issuer_prefix: "https://securetoken.google.com/".to_string(),
        },
    )
    .expect("backend from fixture key")
}

async fn mount_access_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.service",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .mount(server)
        .await;
}

fn account(uid: &str) -> Value {
    json!({
        "localId": uid,
        "email": "a@b.com",
        "emailVerified": true,
        "displayName": "Test User",
        "createdAt": "1700000000000",
        "lastLoginAt": "1700000500000",
        "providerUserInfo": [{"providerId": "google.com", "rawId": "123", "email": "a@b.com"}],
    })
}

fn id_token(overrides: Value) -> String {
    let mut claims = json!({
        "iss": format!("https://securetoken.google.com/{PROJECT}"),
        "aud": PROJECT,
        "sub": "google:123",
        "email": "a@b.com",
        "email_verified": true,
        "iat": now(),
        "exp": now() + 3600,
        "auth_time": now(),
        "provider": "google",
        "firebase": {"identities": {"email": ["a@b.com"]}, "sign_in_provider": "custom"},
    });
    if let (Some(base), Some(extra)) = (claims.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    sign(&claims)
}

// =============================================================================
// Identity records
// =============================================================================

#[tokio::test]
async fn test_lookup_maps_account_and_reuses_access_token() {
    let server = MockServer::start().await;
    mount_access_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(LOOKUP_PATH))
        .and(header("authorization", "Bearer ya29.service"))
        .and(body_partial_json(json!({"localId": ["google:123"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetAccountInfoResponse",
            "users": [account("google:123")],
        })))
        .expect(2)
        .mount(&server)
        .await;
    let backend = backend(&server);

    let first = backend.get_identity("google:123").await.expect("lookup");
    let second = backend.get_identity("google:123").await.expect("lookup");

    assert_eq!(first, second);
    assert_eq!(first.uid, "google:123");
    assert_eq!(first.display_name.as_deref(), Some("Test User"));
    assert_eq!(
        first.metadata.creation_time.map(|t| t.unix_timestamp()),
        Some(1_700_000_000)
    );
    assert_eq!(first.provider_data[0].provider_id, "google.com");
}

#[tokio::test]
async fn test_lookup_of_unknown_uid_is_not_found() {
    let server = MockServer::start().await;
    mount_access_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(LOOKUP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetAccountInfoResponse",
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .get_identity("google:404")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::NotFound(uid) if uid == "google:404"));
}

#[tokio::test]
async fn test_create_posts_account_then_reads_it_back() {
    let server = MockServer::start().await;
    mount_access_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(body_partial_json(json!({
            "localId": "google:123",
            "email": "a@b.com",
            "emailVerified": true,
            "displayName": "Test User",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"localId": "google:123"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOOKUP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [account("google:123")],
        })))
        .mount(&server)
        .await;

    let created = backend(&server)
        .create_identity(NewIdentity {
            uid: "google:123".to_string(),
            email: "a@b.com".to_string(),
            email_verified: true,
            display_name: Some("Test User".to_string()),
            photo_url: None,
        })
        .await
        .expect("create");

    assert_eq!(created.uid, "google:123");
    assert_eq!(created.email.as_deref(), Some("a@b.com"));
}

#[tokio::test]
async fn test_create_of_existing_uid_is_already_exists() {
    let server = MockServer::start().await;
    mount_access_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "DUPLICATE_LOCAL_ID", "errors": []},
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .create_identity(NewIdentity {
            uid: "google:123".to_string(),
            email: "a@b.com".to_string(),
            email_verified: false,
            display_name: None,
            photo_url: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_failed_access_token_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .get_identity("google:123")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Upstream(_)), "{err:?}");
}

// =============================================================================
// Session credentials
// =============================================================================

#[tokio::test]
async fn test_minted_credential_is_a_signed_custom_token() {
    let server = MockServer::start().await;
    let claims = SessionClaims {
        provider: "google".to_string(),
        email: "a@b.com".to_string(),
    };

    let token = backend(&server)
        .mint_session_credential("google:123", &claims)
        .await
        .expect("mint");

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[CUSTOM_TOKEN_AUDIENCE]);
    validation.set_issuer(&[CLIENT_EMAIL]);
    let key = DecodingKey::from_rsa_pem(PUBLIC_KEY_PEM.as_bytes()).expect("public key");
    let decoded = decode::<Value>(&token, &key, &validation).expect("valid custom token");

    assert_eq!(decoded.claims["uid"], "google:123");
    assert_eq!(decoded.claims["sub"], CLIENT_EMAIL);
    assert_eq!(decoded.claims["claims"], json!({"provider": "google", "email": "a@b.com"}));
    let lifetime = decoded.claims["exp"].as_i64().unwrap() - decoded.claims["iat"].as_i64().unwrap();
    assert_eq!(lifetime, 3600);
}

#[tokio::test]
async fn test_mint_rejects_oversized_uid() {
    let server = MockServer::start().await;
    let claims = SessionClaims {
        provider: "google".to_string(),
        email: "a@b.com".to_string(),
    };

    let err = backend(&server)
        .mint_session_credential(&"x".repeat(129), &claims)
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::InvalidArgument(_)));
}

// =============================================================================
// Bearer verification
// =============================================================================

#[tokio::test]
async fn test_valid_id_token_is_accepted() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let claims = backend(&server)
        .verify_bearer_token(&id_token(json!({})))
        .await
        .expect("verified");

    assert_eq!(claims.uid, "google:123");
    assert_eq!(claims.email.as_deref(), Some("a@b.com"));
    assert_eq!(claims.firebase.expect("firebase claim").sign_in_provider, "custom");
    assert_eq!(claims.custom.get("provider"), Some(&Value::from("google")));
}

#[tokio::test]
async fn test_expired_id_token_is_reported_as_expired() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let token = id_token(json!({"iat": now() - 7200, "exp": now() - 3600}));
    let err = backend(&server).verify_bearer_token(&token).await.unwrap_err();

    assert!(matches!(err, VerifyError::Expired), "{err:?}");
}

#[tokio::test]
async fn test_undecodable_token_is_malformed() {
    let server = MockServer::start().await;

    let err = backend(&server)
        .verify_bearer_token("not-a-jwt")
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Malformed(_)), "{err:?}");
}

#[tokio::test]
async fn test_token_for_other_project_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server).await;

    let token = id_token(json!({"aud": "other-proj"}));
    let err = backend(&server).verify_bearer_token(&token).await.unwrap_err();

    assert!(matches!(err, VerifyError::Other(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_key_set_is_other_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = backend(&server)
        .verify_bearer_token(&id_token(json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Other(_)), "{err:?}");
}
