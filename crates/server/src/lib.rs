//! Identity federation gateway.
//!
//! Users sign in with an external OAuth provider (Google); the external account
//! is mapped onto an identity record held by the identity backend (Firebase
//! Auth), and the backend mints a session credential the client exchanges for
//! a bearer token. Protected endpoints verify that bearer token.

use std::sync::Arc;

use crate::backend::{BackendAdapter, IdentityBackend};
use crate::config::AppConfig;
use crate::provider::IdentityProvider;
use crate::provider::google::GoogleProvider;
use crate::users::{InMemoryUserRepository, UserRepository};

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod jwks;
pub mod provider;
pub mod redirect;
pub mod users;

/// Shared handles passed to every handler as router state.
#[derive(Clone)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn IdentityProvider>,
    pub backend: Arc<dyn IdentityBackend>,
    pub users: Arc<dyn UserRepository>,
}

impl AppResources {
    /// Production wiring: Google as provider, Firebase as a lazily-built backend.
    pub fn from_config(config: AppConfig) -> Self {
        let provider = GoogleProvider::from_config(&config);
        let backend = BackendAdapter::firebase(&config);
        Self {
            config: Arc::new(config),
            provider: Arc::new(provider),
            backend: Arc::new(backend),
            users: Arc::new(InMemoryUserRepository::new()),
        }
    }
}
