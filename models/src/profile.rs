// models/src/profile.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Role;

/// One profile per authenticated identity. The `id` is the identity key
/// shared with the auth subsystem; the row is provisioned by that subsystem
/// when an identity is created, and `role` / `email_confirmed` are owned by
/// it from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Builds the row the identity subsystem hands over at provisioning time.
    pub fn provisioned(id: Uuid, full_name: impl Into<String>, role: Role) -> Self {
        Profile {
            id,
            full_name: full_name.into(),
            phone: None,
            role,
            email_confirmed: false,
            created_at: Utc::now(),
        }
    }
}

/// Fields a profile owner (or an admin) may change. `role` and
/// `email_confirmed` are deliberately absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(ref name) = self.full_name {
            profile.full_name = name.clone();
        }
        if let Some(ref phone) = self.phone {
            profile.phone = Some(phone.clone());
        }
    }
}
