//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use identity_gateway::AppResources;
use identity_gateway::backend::IdentityBackend;
use identity_gateway::config::{AppConfig, ClientCredentials};
use identity_gateway::provider::google::{GoogleEndpoints, GoogleProvider};
use identity_gateway::users::InMemoryUserRepository;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "client-123";
pub const CLIENT_SECRET: &str = "client-secret";
pub const KID: &str = "test-key-1";
pub const VALID_CODE: &str = "VALIDCODE";

pub const PRIVATE_KEY_PEM: &str = include_str!("../fixtures/test_rsa_key.pem");
pub const PUBLIC_KEY_PEM: &str = include_str!("../fixtures/test_rsa_pub.pem");
const JWKS: &str = include_str!("../fixtures/test_jwks.json");

pub fn jwks() -> Value {
    serde_json::from_str(JWKS).expect("fixture JWKS is valid JSON")
}

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// RS256 token signed with the fixture key under [`KID`].
pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes()).expect("fixture key");
    encode(&header, claims, &key).expect("sign token")
}

/// Google ID token for `sub`/`email` issued to [`CLIENT_ID`].
pub fn google_id_token(sub: &str, email: &str) -> String {
    sign(&json!({
        "iss": "https://accounts.google.com",
        "aud": CLIENT_ID,
        "sub": sub,
        "email": email,
        "email_verified": true,
        "name": "Test User",
        "picture": "https://example.com/a.png",
        "iat": now(),
        "exp": now() + 3600,
    }))
}

pub fn google_endpoints(server: &MockServer) -> GoogleEndpoints {
    GoogleEndpoints {
        auth_url: format!("{}/o/oauth2/v2/auth", server.uri()),
        token_url: format!("{}/token", server.uri()),
        jwks_url: format!("{}/certs", server.uri()),
    }
}

pub fn google_provider(server: &MockServer) -> GoogleProvider {
    GoogleProvider::new(
        Some(ClientCredentials {
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
        }),
        google_endpoints(server),
    )
}

pub async fn mount_google_certs(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks()))
        .mount(server)
        .await;
}

/// Token endpoint accepting [`VALID_CODE`] and answering with `token_body`.
pub async fn mount_google_token(server: &MockServer, token_body: Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=VALIDCODE"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body))
        .mount(server)
        .await;
}

/// Token endpoint and key set for a successful sign-in of `sub`.
pub async fn mount_google_sign_in(server: &MockServer, sub: &str, email: &str) {
    mount_google_token(
        server,
        json!({
            "access_token": "ya29.access",
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "openid email profile",
            "id_token": google_id_token(sub, email),
        }),
    )
    .await;
    mount_google_certs(server).await;
}

pub fn resources(
    provider: GoogleProvider,
    backend: Arc<dyn IdentityBackend>,
    config: AppConfig,
) -> AppResources {
    AppResources {
        config: Arc::new(config),
        provider: Arc::new(provider),
        backend,
        users: Arc::new(InMemoryUserRepository::new()),
    }
}

/// Config with provider credentials and a fixed callback URI.
pub fn configured() -> AppConfig {
    AppConfig {
        google_client_id: Some(CLIENT_ID.to_string()),
        google_client_secret: Some(CLIENT_SECRET.to_string()),
        google_redirect_uri: Some("https://gw.example/api/auth/google/callback".to_string()),
        ..AppConfig::default()
    }
}
