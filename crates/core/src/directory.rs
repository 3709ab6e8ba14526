use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authorization::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user `{0}` was not found")]
    UserNotFound(String),
    #[error("no user holds role `{0}`")]
    RoleNotFound(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Identity lookups used for approver resolution and display names.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, id: &UserId) -> Result<DirectoryUser, DirectoryError>;
    async fn get_user_by_role(&self, role: &str) -> Result<UserId, DirectoryError>;
}

/// Directory backed by a fixed user list, typically loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    users: BTreeMap<UserId, DirectoryUser>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        Self { users: users.into_iter().map(|user| (user.id.clone(), user)).collect() }
    }

    pub fn with_user(mut self, id: &str, username: &str, roles: &[&str]) -> Self {
        let user = DirectoryUser {
            id: UserId::new(id),
            username: username.to_string(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
        };
        self.users.insert(user.id.clone(), user);
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn get_user(&self, id: &UserId) -> Result<DirectoryUser, DirectoryError> {
        self.users.get(id).cloned().ok_or_else(|| DirectoryError::UserNotFound(id.0.clone()))
    }

    async fn get_user_by_role(&self, role: &str) -> Result<UserId, DirectoryError> {
        let wanted = role.trim();
        self.users
            .values()
            .find(|user| user.roles.iter().any(|candidate| candidate.eq_ignore_ascii_case(wanted)))
            .map(|user| user.id.clone())
            .ok_or_else(|| DirectoryError::RoleNotFound(wanted.to_string()))
    }
}
