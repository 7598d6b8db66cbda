//! User-related models

use serde::{Deserialize, Serialize};

use super::{RecordError, UserId};

/// Display name used when a profile is missing or has no name.
pub const UNKNOWN_USER: &str = "Unknown user";

/// Profile row as returned by the `profiles` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileRow {
    pub id: Option<UserId>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Public profile of a marketplace user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: UserId,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = RecordError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.ok_or(RecordError::missing("profile", "id"))?,
            full_name: row.full_name.filter(|n| !n.trim().is_empty()),
            avatar_url: row.avatar_url.filter(|u| !u.trim().is_empty()),
        })
    }
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(UNKNOWN_USER)
    }
}

/// The authenticated user of this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Principal {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            display_name: None,
            avatar_url: None,
        }
    }

    /// Name for display, falling back to the email address.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(UNKNOWN_USER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_profile_blank_name_is_placeholder() {
        let profile = Profile::try_from(ProfileRow {
            id: Some(Uuid::new_v4()),
            full_name: Some("  ".to_string()),
            avatar_url: None,
        })
        .unwrap();
        assert_eq!(profile.display_name(), UNKNOWN_USER);
    }

    #[test]
    fn test_profile_without_id_rejected() {
        assert!(Profile::try_from(ProfileRow::default()).is_err());
    }

    #[test]
    fn test_principal_label_falls_back_to_email() {
        let mut p = Principal::new(Uuid::new_v4());
        assert_eq!(p.label(), UNKNOWN_USER);
        p.email = Some("a@b.c".to_string());
        assert_eq!(p.label(), "a@b.c");
        p.display_name = Some("Amira".to_string());
        assert_eq!(p.label(), "Amira");
    }
}
