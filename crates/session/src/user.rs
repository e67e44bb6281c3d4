//! Authenticated user profile

use serde::{Deserialize, Serialize};

/// Role granted to a user by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
    ReadOnly,
    /// Any role this client does not know about. Grants nothing.
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::User => "User",
            Role::ReadOnly => "ReadOnly",
            Role::Unknown => "Unknown",
        }
    }
}

/// Profile returned alongside tokens on login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
