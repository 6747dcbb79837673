//! In-process identity backend for tests and local development.

use super::{
    BearerClaims, IdentityBackend, IdentityMetadata, InternalIdentity, NewIdentity, ProviderInfo,
    SessionClaims,
};
use crate::error::{BackendError, VerifyError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use uuid::Uuid;

const BEARER_PREFIX: &str = "mem-bearer-";
const SESSION_PREFIX: &str = "mem-session-";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Expired bearers are kept this long so they still verify as expired.
const EXPIRED_RETENTION_SECS: i64 = 300;

struct IssuedBearer {
    uid: String,
    exp: i64,
    session: Option<SessionClaims>,
}

struct MintedSession {
    uid: String,
    exp: i64,
    claims: SessionClaims,
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Keeps identities and credentials in concurrent maps.
///
/// Bearer tokens are opaque strings issued by [`MemoryBackend::issue_bearer_token`];
/// minted session credentials can be swapped for a bearer token once, the way a
/// client would sign in with a custom token. Session credentials expire like
/// custom tokens do. Expired credentials are pruned whenever a new one is issued.
pub struct MemoryBackend {
    identities: DashMap<String, InternalIdentity>,
    bearers: DashMap<String, IssuedBearer>,
    sessions: DashMap<String, MintedSession>,
    session_ttl_secs: i64,
    creates: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            identities: DashMap::new(),
            bearers: DashMap::new(),
            sessions: DashMap::new(),
            session_ttl_secs: TOKEN_LIFETIME_SECS,
            creates: AtomicUsize::new(0),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of minted session credentials; one hour by default.
    pub fn with_session_ttl(mut self, secs: i64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    fn next_token(prefix: &str) -> String {
        format!("{prefix}{}", Uuid::new_v4().simple())
    }

    fn prune_expired(&self) {
        let now = now();
        self.bearers
            .retain(|_, b| b.exp + EXPIRED_RETENTION_SECS > now);
        self.sessions.retain(|_, s| s.exp > now);
    }

    /// Issue a bearer token for `uid` that expires `ttl_secs` from now.
    /// A negative ttl yields an already-expired token.
    pub fn issue_bearer_token(&self, uid: &str, ttl_secs: i64) -> String {
        self.issue(uid, ttl_secs, None)
    }

    fn issue(&self, uid: &str, ttl_secs: i64, session: Option<SessionClaims>) -> String {
        self.prune_expired();
        let token = Self::next_token(BEARER_PREFIX);
        self.bearers.insert(
            token.clone(),
            IssuedBearer {
                uid: uid.to_string(),
                exp: now() + ttl_secs,
                session,
            },
        );
        token
    }

    /// Exchange a minted session credential for a one-hour bearer token.
    /// Each credential can be exchanged once, and only before it expires.
    pub fn exchange_session_credential(&self, credential: &str) -> Option<String> {
        let (_, session) = self.sessions.remove(credential)?;
        if session.exp <= now() {
            return None;
        }
        Some(self.issue(&session.uid, TOKEN_LIFETIME_SECS, Some(session.claims)))
    }

    /// Claims embedded in a live session credential that has not been exchanged.
    pub fn session_claims(&self, credential: &str) -> Option<(String, SessionClaims)> {
        self.sessions
            .get(credential)
            .filter(|s| s.exp > now())
            .map(|s| (s.uid.clone(), s.claims.clone()))
    }

    /// Unexchanged session credentials and issued bearers still held.
    pub fn outstanding_credentials(&self) -> usize {
        self.sessions.len() + self.bearers.len()
    }

    /// Insert or replace a record directly.
    pub fn insert_identity(&self, identity: InternalIdentity) {
        self.identities.insert(identity.uid.clone(), identity);
    }

    /// Number of successful [`IdentityBackend::create_identity`] calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityBackend for MemoryBackend {
    async fn verify_bearer_token(&self, raw: &str) -> Result<BearerClaims, VerifyError> {
        if !raw.starts_with(BEARER_PREFIX) {
            return Err(VerifyError::Malformed(
                "not a bearer token issued by this backend".to_string(),
            ));
        }
        let issued = self
            .bearers
            .get(raw)
            .ok_or_else(|| VerifyError::Other("unknown bearer token".to_string()))?;
        if issued.exp <= now() {
            return Err(VerifyError::Expired);
        }

        let mut claims = BearerClaims::for_uid(issued.uid.clone(), issued.exp);
        if let Some(identity) = self.identities.get(&issued.uid) {
            claims.email = identity.email.clone();
            claims.email_verified = Some(identity.email_verified);
            claims.name = identity.display_name.clone();
            claims.picture = identity.photo_url.clone();
            if let Some(custom) = &identity.custom_claims {
                claims.custom.extend(custom.clone());
            }
        }
        if let Some(session) = &issued.session {
            claims
                .custom
                .insert("provider".to_string(), Value::from(session.provider.clone()));
            claims.email.get_or_insert_with(|| session.email.clone());
        }
        Ok(claims)
    }

    async fn get_identity(&self, uid: &str) -> Result<InternalIdentity, BackendError> {
        self.identities
            .get(uid)
            .map(|r| r.value().clone())
            .ok_or_else(|| BackendError::NotFound(uid.to_string()))
    }

    async fn create_identity(&self, fields: NewIdentity) -> Result<InternalIdentity, BackendError> {
        match self.identities.entry(fields.uid.clone()) {
            Entry::Occupied(_) => Err(BackendError::AlreadyExists(fields.uid)),
            Entry::Vacant(slot) => {
                let now = OffsetDateTime::now_utc();
                let provider_data = fields
                    .uid
                    .split_once(':')
                    .map(|(provider, subject)| ProviderInfo {
                        provider_id: format!("{provider}.com"),
                        uid: Some(subject.to_string()),
                        email: Some(fields.email.clone()),
                        display_name: fields.display_name.clone(),
                        photo_url: fields.photo_url.clone(),
                    })
                    .into_iter()
                    .collect();
                let identity = InternalIdentity {
                    uid: fields.uid,
                    email: Some(fields.email),
                    email_verified: fields.email_verified,
                    display_name: fields.display_name,
                    photo_url: fields.photo_url,
                    phone_number: None,
                    disabled: false,
                    custom_claims: None,
                    metadata: IdentityMetadata {
                        creation_time: Some(now),
                        last_sign_in_time: None,
                        last_refresh_time: None,
                    },
                    provider_data,
                };
                slot.insert(identity.clone());
                self.creates.fetch_add(1, Ordering::SeqCst);
                Ok(identity)
            }
        }
    }

    async fn mint_session_credential(
        &self,
        uid: &str,
        claims: &SessionClaims,
    ) -> Result<String, BackendError> {
        if uid.is_empty() {
            return Err(BackendError::InvalidArgument("uid must not be empty".into()));
        }
        self.prune_expired();
        let token = Self::next_token(SESSION_PREFIX);
        self.sessions.insert(
            token.clone(),
            MintedSession {
                uid: uid.to_string(),
                exp: now() + self.session_ttl_secs,
                claims: claims.clone(),
            },
        );
        if let Some(mut identity) = self.identities.get_mut(uid) {
            identity.metadata.last_sign_in_time = Some(OffsetDateTime::now_utc());
        }
        Ok(token)
    }
}
