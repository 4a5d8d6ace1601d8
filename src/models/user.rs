use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    PrincipalAdmin,
    Administrative,
    #[default]
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PrincipalAdmin => "principal_admin",
            Role::Administrative => "administrative",
            Role::Driver => "driver",
        }
    }

    /// Both administrative roles manage trips and vehicles.
    pub fn is_admin(&self) -> bool {
        match self {
            Role::PrincipalAdmin | Role::Administrative => true,
            Role::Driver => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Address used by the out-of-band messaging gateway.
    pub contact_address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            email: email.into(),
            role,
            contact_address: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_contact(mut self, address: impl Into<String>) -> Self {
        self.contact_address = Some(address.into());
        self
    }

    /// Trimmed contact address, `None` when missing or blank.
    pub fn contact(&self) -> Option<&str> {
        self.contact_address
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub contact_address: Option<String>,
}

/// Partial account edit. An empty `contact_address` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub contact_address: Option<String>,
    pub is_active: Option<bool>,
}

impl User {
    /// Whether this account counts towards the administrators that must remain.
    pub fn is_active_admin(&self) -> bool {
        self.is_active && self.role.is_admin()
    }

    pub fn apply_update(&mut self, update: UserUpdate) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = update.email {
            self.email = email.trim().to_lowercase();
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(address) = update.contact_address {
            let address = address.trim();
            self.contact_address = (!address.is_empty()).then(|| address.to_string());
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
    }
}
