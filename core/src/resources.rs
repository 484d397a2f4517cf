//! Alma resource types: users and the loans, requests and fees hanging off
//! them.
//!
//! The declarations are data. `User` and `Users` are thin typed wrappers over
//! the generic `Resource` so callers write `user.loans()` instead of
//! `resource.sub_resource_map("loans")`.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{AlmaError, Result};
use crate::resource::{ChildSpec, Registry, Resource, ResourceConfig, ResourceKind};

pub const USER: ResourceKind = ResourceKind::new("user");
pub const USER_LOAN: ResourceKind = ResourceKind::new("user_loan");
pub const USER_REQUEST: ResourceKind = ResourceKind::new("user_request");
pub const USER_FEE: ResourceKind = ResourceKind::new("user_fee");

/// Child collection names declared on `USER`.
pub const LOANS: &str = "loans";
pub const REQUESTS: &str = "requests";
pub const FEES: &str = "fees";

/// Exactly `N` non-empty identifiers, percent-encoded as path segments.
fn segments<const N: usize>(ids: &[&str]) -> Result<[String; N]> {
    let parts: [&str; N] = ids.try_into().map_err(|_| {
        AlmaError::InvalidIdentifiers(format!("expected {N}, got {}", ids.len()))
    })?;
    if parts.iter().any(|id| id.is_empty()) {
        return Err(AlmaError::InvalidIdentifiers("empty identifier".to_string()));
    }
    Ok(parts.map(|id| urlencoding::encode(id).into_owned()))
}

pub fn user_config() -> ResourceConfig {
    ResourceConfig::new("primary_id", |ids| {
        let [user] = segments(ids)?;
        Ok(format!("/users/{user}"))
    })
    .with_child(
        LOANS,
        ChildSpec::new(USER_LOAN, "item_loan", "loan_id", |user| {
            format!("/users/{}/loans", urlencoding::encode(user))
        }),
    )
    .with_child(
        REQUESTS,
        ChildSpec::new(USER_REQUEST, "user_request", "request_id", |user| {
            format!("/users/{}/requests", urlencoding::encode(user))
        }),
    )
    .with_child(
        FEES,
        ChildSpec::new(USER_FEE, "fee", "id", |user| {
            format!("/users/{}/fees", urlencoding::encode(user))
        }),
    )
}

pub fn user_loan_config() -> ResourceConfig {
    ResourceConfig::new("loan_id", |ids| {
        let [user, loan] = segments(ids)?;
        Ok(format!("/users/{user}/loans/{loan}"))
    })
}

pub fn user_request_config() -> ResourceConfig {
    ResourceConfig::new("request_id", |ids| {
        let [user, request] = segments(ids)?;
        Ok(format!("/users/{user}/requests/{request}"))
    })
}

pub fn user_fee_config() -> ResourceConfig {
    ResourceConfig::new("id", |ids| {
        let [user, fee] = segments(ids)?;
        Ok(format!("/users/{user}/fees/{fee}"))
    })
}

/// Registry with every Alma resource type declared and no transport yet.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .declare(USER, user_config())
        .declare(USER_LOAN, user_loan_config())
        .declare(USER_REQUEST, user_request_config())
        .declare(USER_FEE, user_fee_config());
    registry
}

/// Entry point for user lookups, exposed as `AlmaClient::users`.
#[derive(Debug, Clone)]
pub struct Users {
    registry: Arc<Registry>,
}

impl Users {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// GET `/users/{id}`.
    pub async fn get(&self, id: &str) -> Result<User> {
        self.registry.fetch_by_id(USER, &[id]).await.map(User)
    }

    /// A user handle without fetching the user record itself, for reaching
    /// its loans, requests or fees.
    pub fn for_id(&self, id: &str) -> Result<User> {
        self.registry.for_id(USER, id).map(User)
    }
}

/// An Alma user.
#[derive(Debug, Clone)]
pub struct User(Resource);

impl User {
    pub fn into_resource(self) -> Resource {
        self.0
    }

    pub async fn loans(&mut self) -> Result<&HashMap<String, Resource>> {
        self.0.sub_resource_map(LOANS).await
    }

    pub async fn get_loan(&mut self, loan_id: &str) -> Result<&Resource> {
        self.0.sub_resource(LOANS, loan_id).await
    }

    pub async fn get_loan_from_api(&mut self, loan_id: &str) -> Result<&Resource> {
        self.0.sub_resource_from_api(LOANS, loan_id).await
    }

    pub async fn requests(&mut self) -> Result<&HashMap<String, Resource>> {
        self.0.sub_resource_map(REQUESTS).await
    }

    pub async fn get_request(&mut self, request_id: &str) -> Result<&Resource> {
        self.0.sub_resource(REQUESTS, request_id).await
    }

    pub async fn get_request_from_api(&mut self, request_id: &str) -> Result<&Resource> {
        self.0.sub_resource_from_api(REQUESTS, request_id).await
    }

    pub async fn fees(&mut self) -> Result<&HashMap<String, Resource>> {
        self.0.sub_resource_map(FEES).await
    }

    pub async fn get_fee(&mut self, fee_id: &str) -> Result<&Resource> {
        self.0.sub_resource(FEES, fee_id).await
    }

    pub async fn get_fee_from_api(&mut self, fee_id: &str) -> Result<&Resource> {
        self.0.sub_resource_from_api(FEES, fee_id).await
    }
}

impl Deref for User {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.0
    }
}

impl From<User> for Resource {
    fn from(user: User) -> Self {
        user.0
    }
}
