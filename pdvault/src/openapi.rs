//! OpenAPI documentation for the account API.
//!
//! This module defines the OpenAPI spec for the `/account/*` endpoints. The
//! rendered docs are served at `/docs`, and the raw document at
//! `/api-docs/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, methods};

/// Security scheme for the account API (personal access token).
struct PersonalTokenAddon;

impl Modify for PersonalTokenAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "PersonalToken".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("Personal token")
                        .description(Some(
                            "Personal access token authentication. Include the token in the \
                            `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_TOKEN\n```\n\n\
                            The `Bearer ` prefix is optional; a bare token is accepted too.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&PersonalTokenAddon),
    paths(
        api::handlers::account::get_account,
        api::handlers::account::update_account,
        api::handlers::account::change_password,
        api::handlers::account::request_password_reset,
        api::handlers::account::reset_password,
    ),
    components(
        schemas(
            methods::MethodResult,
            api::models::account::AccountDetails,
            api::models::account::StorageUsed,
            api::models::account::UpdateAccountParams,
            api::models::account::ChangePasswordParams,
            api::models::account::RequestPasswordResetParams,
            api::models::account::ResetPasswordParams,
        )
    ),
    tags(
        (name = "account", description = "Self-service operations on a single account.

Authenticated endpoints (`GET /account`, `PUT /account`, `POST /account/change-password`) require
a personal access token. The password reset endpoints are unauthenticated but restricted to
trusted applications, identified by the `appId` field and the caller's `Origin`/`Referer` header."),
    ),
    info(
        title = "Account API",
        version = "1.4.0",
        description = "Account self-service: profile details, password changes, and the
trusted-app password reset flow.

## Authentication

Authenticated endpoints expect a personal access token in the `Authorization` header:

```
Authorization: Bearer YOUR_TOKEN
```

## Errors

Errors are returned as a JSON object with `error.id`, `error.message`, and optional
`error.data` fields:

```json
{
  \"error\": {
    \"id\": \"invalid-access-token\",
    \"message\": \"The access token is missing or invalid\"
  }
}
```",
    ),
)]
pub struct ApiDoc;
