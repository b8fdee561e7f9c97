use serde::{Deserialize, Serialize};

/// The authenticated principal as seen by the audit layer.
///
/// The authentication layer inserts one of these into the request
/// extensions; explicit callers may also pass one directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl ActorProfile {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    pub fn with_names(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Provenance attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedActor {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
}
