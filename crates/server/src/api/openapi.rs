//! OpenAPI/Utoipa configuration.

use crate::api::{auth::AUTH_TAG, health::MISC_TAG, users::DEMO_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Identity backend ID token, obtained by exchanging the `sessionCredential` \
                     returned from `/api/auth/google/callback`.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Identity Gateway API",
        version = "1.0.0",
        description = "Google sign-in federated onto Firebase Auth identities."
    ),
    tags(
        (name = AUTH_TAG, description = "Sign-in flow and bearer-token protected endpoints"),
        (name = DEMO_TAG, description = "Demo endpoints"),
        (name = MISC_TAG, description = "Miscellaneous endpoints")
    )
)]
pub struct ApiDoc;
