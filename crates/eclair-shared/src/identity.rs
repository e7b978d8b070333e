use serde::{Deserialize, Serialize};

/// The signed-in user as supplied by the auth/session provider.
///
/// Any change of identity tears the notification layer down and brings it
/// back up for the new user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub pseudo: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, pseudo: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            pseudo: pseudo.into(),
        }
    }

    /// Whether `other` is the same account (pseudo changes do not count).
    pub fn same_account(&self, other: &Identity) -> bool {
        self.user_id == other.user_id
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.pseudo, self.user_id)
    }
}
