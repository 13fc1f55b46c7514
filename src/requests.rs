//! `UserRequest` lifecycle: creation, listing, comments, and the
//! approve/deny/cancel/close status machine. Backed by `MetaStore` JSON
//! records the same way `gradient::meta` backs gradient records; the
//! validate-then-mutate-then-log handler shape is grounded on
//! `api/delete_versions.rs`.

use crate::auth::{self, AuthContext};
use crate::error::{Error, Result};
use crate::meta_store::MetaStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Approved,
    Denied,
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRequest {
    pub id: String,
    pub guild_id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub gallery_id: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: String,
    pub request_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRequest {
    pub guild_id: String,
    pub title: String,
    pub description: String,
    pub gallery_id: Option<String>,
}

/// One of `approve`, `deny`, `cancel`, `close` — not the raw target
/// status, so the transition table owns which targets each action reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Approve,
    Deny,
    Cancel,
    Close,
}

impl RequestAction {
    fn as_str(&self) -> &'static str {
        match self {
            RequestAction::Approve => "approve",
            RequestAction::Deny => "deny",
            RequestAction::Cancel => "cancel",
            RequestAction::Close => "close",
        }
    }

    fn target(&self) -> RequestStatus {
        match self {
            RequestAction::Approve => RequestStatus::Approved,
            RequestAction::Deny => RequestStatus::Denied,
            RequestAction::Cancel => RequestStatus::Cancelled,
            RequestAction::Close => RequestStatus::Closed,
        }
    }

    fn target_name(&self) -> &'static str {
        status_name(self.target())
    }
}

fn status_name(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Open => "open",
        RequestStatus::Approved => "approved",
        RequestStatus::Denied => "denied",
        RequestStatus::Cancelled => "cancelled",
        RequestStatus::Closed => "closed",
    }
}

/// The table in spec.md §4.7: only `open` accepts cancel/approve/deny,
/// only `approved`/`denied` accept close, everything else is terminal.
fn allowed_target(from: RequestStatus, action: RequestAction) -> bool {
    use RequestAction::*;
    use RequestStatus::*;
    matches!(
        (from, action),
        (Open, Cancel) | (Open, Approve) | (Open, Deny) | (Approved, Close) | (Denied, Close)
    )
}

fn request_key(id: &str) -> String {
    format!("request:{id}")
}

fn guild_index_key(guild_id: &str) -> String {
    format!("requests:by-guild:{guild_id}")
}

fn comments_key(request_id: &str) -> String {
    format!("request:{request_id}:comments")
}

pub struct RequestService<'a> {
    store: &'a dyn MetaStore,
}

impl<'a> RequestService<'a> {
    pub fn new(store: &'a dyn MetaStore) -> Self {
        Self { store }
    }

    async fn put(&self, request: &UserRequest) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| Error::internal(format!("request serialize failed: {e}")))?;
        self.store.set(&request_key(&request.id), &json).await
    }

    pub async fn create(&self, ctx: &AuthContext, req: CreateRequest) -> Result<UserRequest> {
        auth::require_create_request(ctx, &req.guild_id)?;

        let now = Utc::now();
        let request = UserRequest {
            id: uuid::Uuid::new_v4().to_string(),
            guild_id: req.guild_id.clone(),
            user_id: ctx.user_id.clone(),
            title: req.title,
            description: req.description,
            gallery_id: req.gallery_id,
            status: RequestStatus::Open,
            created_at: now,
            updated_at: now,
            closed_at: None,
            closed_by: None,
        };

        self.put(&request).await?;
        self.store.list_push(&guild_index_key(&req.guild_id), &request.id).await?;

        tracing::info!(request_id = %request.id, guild_id = %req.guild_id, "created request");
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> Result<UserRequest> {
        let raw = self.store.get(&request_key(id)).await?;
        raw.and_then(|json| serde_json::from_str(&json).ok())
            .ok_or_else(|| Error::not_found(format!("request {id}")))
    }

    pub async fn get_authorized(&self, ctx: &AuthContext, id: &str) -> Result<UserRequest> {
        let request = self.get(id).await?;
        auth::require_view_request(ctx, &request)?;
        Ok(request)
    }

    pub async fn list_for_guild(&self, ctx: &AuthContext, guild_id: &str) -> Result<Vec<UserRequest>> {
        auth::require_list_requests(ctx)?;
        auth::require_guild_membership(ctx, guild_id)?;

        let ids = self.store.list_all(&guild_index_key(guild_id)).await?;
        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(request) = self.get(&id).await {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    pub async fn cancel(&self, ctx: &AuthContext, id: &str) -> Result<UserRequest> {
        let request = self.get(id).await?;
        auth::require_cancel_request(ctx, &request)?;
        self.transition(request, RequestAction::Cancel, ctx).await
    }

    pub async fn change_status(&self, ctx: &AuthContext, id: &str, action: RequestAction) -> Result<UserRequest> {
        let request = self.get(id).await?;
        auth::require_change_request_status(ctx, &request)?;
        self.transition(request, action, ctx).await
    }

    async fn transition(&self, mut request: UserRequest, action: RequestAction, ctx: &AuthContext) -> Result<UserRequest> {
        if !allowed_target(request.status, action) {
            return Err(Error::invalid_status_transition(status_name(request.status), action.target_name()));
        }

        let now = Utc::now();
        request.status = action.target();
        request.updated_at = now;
        if action == RequestAction::Close {
            request.closed_at = Some(now);
            request.closed_by = Some(ctx.user_id.clone());
        }

        self.put(&request).await?;
        tracing::info!(request_id = %request.id, action = action.as_str(), "request status changed");
        Ok(request)
    }

    pub async fn delete(&self, ctx: &AuthContext, id: &str) -> Result<()> {
        let request = self.get(id).await?;
        auth::require_delete_request(ctx, &request)?;

        self.store.delete(&request_key(id)).await?;
        self.store.delete(&comments_key(id)).await?;
        self.store.list_remove(&guild_index_key(&request.guild_id), id).await?;
        Ok(())
    }

    pub async fn add_comment(&self, ctx: &AuthContext, request_id: &str, content: String) -> Result<Comment> {
        let request = self.get(request_id).await?;
        auth::require_comment_on_request(ctx, &request)?;

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            user_id: ctx.user_id.clone(),
            content,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&comment)
            .map_err(|e| Error::internal(format!("comment serialize failed: {e}")))?;
        self.store.list_push(&comments_key(request_id), &json).await?;
        Ok(comment)
    }

    pub async fn list_comments(&self, ctx: &AuthContext, request_id: &str) -> Result<Vec<Comment>> {
        let request = self.get(request_id).await?;
        auth::require_view_request(ctx, &request)?;

        let raw = self.store.list_all(&comments_key(request_id)).await?;
        Ok(raw.iter().filter_map(|json| serde_json::from_str(json).ok()).collect())
    }
}
