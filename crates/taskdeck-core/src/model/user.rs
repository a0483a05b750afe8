use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{ParseEnumError, normalize};

/// Role of a user, both globally and per project membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Default for Role {
    fn default() -> Self {
        Self::Member
    }
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(ParseEnumError {
                expected: "role",
                got: s.to_string(),
            }),
        }
    }
}

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub role: Role,
    pub project_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `users`. A missing `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: Option<String>,
    pub user_name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

impl NewUser {
    #[must_use]
    pub fn member(user_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            user_name: user_name.into(),
            email: email.into(),
            role: Role::Member,
            is_active: true,
        }
    }
}

/// The signed-in user's profile as held by the session cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub project_id: Option<String>,
    pub is_active: bool,
}

impl Identity {
    /// Profile for a user the session provider knows but whose `users` row
    /// is missing: a member named after the email's local part.
    #[must_use]
    pub fn fallback(id: impl Into<String>, email: Option<&str>) -> Self {
        let email = email.unwrap_or_default();
        let name = email
            .split('@')
            .next()
            .filter(|local| !local.is_empty())
            .unwrap_or("user");
        Self {
            id: id.into(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Member,
            project_id: None,
            is_active: true,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<UserRecord> for Identity {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.user_name,
            email: user.email,
            role: user.role,
            project_id: user.project_id,
            is_active: user.is_active,
        }
    }
}

/// A row of the `project` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Short join code shared with teammates.
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub code: String,
}

/// A row of the `project_members` join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub project_id: String,
    pub user_id: String,
    pub role: Role,
    pub is_active: bool,
}

/// Role change or (de)activation of a membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChanges {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl MemberChanges {
    pub fn apply_to(self, member: &mut ProjectMember) {
        if let Some(role) = self.role {
            member.role = role;
        }
        if let Some(is_active) = self.is_active {
            member.is_active = is_active;
        }
    }
}

/// Membership joined with the member's display name and email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}
