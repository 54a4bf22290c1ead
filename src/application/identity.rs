//! Caller identity asserted by the upstream gateway.
//!
//! The gateway authenticates the user and forwards `X-User-Id` and
//! `X-User-Role`; this service trusts them as given.

use axum::http::HeaderMap;

use crate::domain::{
    entities::{Role, UserId},
    error::DomainError,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `Ok(None)` when the request carries no identity at all.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, DomainError> {
        let Some(raw_id) = headers.get(USER_ID_HEADER) else {
            return Ok(None);
        };

        let user_id = raw_id
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                DomainError::validation(USER_ID_HEADER, "x-user-id must be a positive integer")
            })?;

        let role = match headers.get(USER_ROLE_HEADER) {
            Some(raw) => Role::parse(raw.to_str().map_err(|_| {
                DomainError::validation(USER_ROLE_HEADER, "x-user-role is not valid text")
            })?)?,
            None => Role::default(),
        };

        Ok(Some(Self { user_id, role }))
    }
}
