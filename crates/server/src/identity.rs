//! Mapping external identities onto backend identity records.
//!
//! The internal uid is derived from the provider id and the provider's subject,
//! so signing in twice with the same external account always lands on the same
//! record. Records are created on first sign-in and never updated afterwards.

use crate::backend::{IdentityBackend, InternalIdentity, NewIdentity};
use crate::error::BackendError;
use crate::provider::ExternalIdentity;

/// Deterministic uid for an external account: `<provider>:<subject>`.
pub fn federated_uid(provider: &str, subject: &str) -> String {
    format!("{provider}:{subject}")
}

/// Get the record for `external`, creating it when it does not exist yet.
///
/// Only [`BackendError::NotFound`] leads to creation; any other lookup failure
/// is returned as is. When two callbacks for the same account race, the losing
/// create reports [`BackendError::AlreadyExists`] and the winner's record is
/// read back instead.
#[tracing::instrument(skip(backend, external), fields(subject = %external.subject))]
pub async fn resolve_identity(
    backend: &dyn IdentityBackend,
    provider: &str,
    external: &ExternalIdentity,
) -> Result<InternalIdentity, BackendError> {
    let uid = federated_uid(provider, &external.subject);
    match backend.get_identity(&uid).await {
        Ok(identity) => {
            tracing::debug!(%uid, "found existing identity");
            return Ok(identity);
        }
        Err(BackendError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let fields = NewIdentity {
        uid: uid.clone(),
        email: external.email.clone(),
        email_verified: external.email_verified,
        display_name: external.name.clone(),
        photo_url: external.picture.clone(),
    };
    match backend.create_identity(fields).await {
        Ok(identity) => {
            tracing::info!(%uid, "created identity on first sign-in");
            Ok(identity)
        }
        Err(BackendError::AlreadyExists(_)) => {
            tracing::debug!(%uid, "identity created concurrently, reading it back");
            backend.get_identity(&uid).await
        }
        Err(e) => Err(e),
    }
}
