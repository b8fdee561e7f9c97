//! Identity entities watched by the default audit configuration.

use serde::{Deserialize, Serialize};

use crate::{
    services::audit_watch::{Auditable, EntityCatalog},
    utils::normalize::{AuditEnum, AuditValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Invited,
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Invited => "invited",
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl AuditEnum for UserStatus {
    fn audit_value(&self) -> AuditValue {
        self.as_str().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub email: String,
    pub status: UserStatus,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_service_account: bool,
    pub locale_preference: Option<String>,
    pub theme_preference: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            status: UserStatus::Invited,
            first_name: None,
            last_name: None,
            is_service_account: false,
            locale_preference: None,
            theme_preference: None,
        }
    }
}

impl Auditable for User {
    fn field(&self, name: &str) -> Option<AuditValue> {
        let value: AuditValue = match name {
            "id" => self.id.into(),
            "email" => self.email.as_str().into(),
            "status" => AuditValue::tagged(&self.status),
            "first_name" => self.first_name.clone().into(),
            "last_name" => self.last_name.clone().into(),
            "is_service_account" => self.is_service_account.into(),
            "locale_preference" => self.locale_preference.clone().into(),
            "theme_preference" => self.theme_preference.clone().into(),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
}

impl Auditable for Role {
    fn field(&self, name: &str) -> Option<AuditValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "description" => Some(self.description.clone().into()),
            _ => None,
        }
    }
}

/// Catalog resolving the identity type references used in watch tables.
pub fn identity_catalog() -> EntityCatalog {
    EntityCatalog::new()
        .register::<User>("identity.User")
        .register::<Role>("identity.Role")
}
