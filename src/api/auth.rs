//! Session introspection endpoint. The identity-provider exchange that
//! produces the underlying session token is out of scope (spec.md §1,
//! `auth::IdentityProvider`); this just reflects back the capability
//! context a valid session already carries.

use crate::auth::AuthContext;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub id: String,
    /// No separate identity-provider profile is wired up (`IdentityProvider`
    /// is unimplemented), so this mirrors `id` rather than a display name.
    pub username: String,
    pub is_admin: bool,
    pub guilds: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current session", body = MeResponse),
        (status = 401, description = "No session"),
    ),
    tag = "auth"
)]
pub async fn me(ctx: AuthContext) -> Json<MeResponse> {
    Json(MeResponse {
        username: ctx.user_id.clone(),
        id: ctx.user_id,
        is_admin: ctx.is_admin,
        guilds: ctx.guild_ids.into_iter().collect(),
    })
}
