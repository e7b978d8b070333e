use crate::database::Database;
use crate::error::Result;
use crate::models::PushToken;
use crate::records::KEY_PUSH_TOKEN;

impl Database {
    pub fn load_push_token(&self) -> Result<Option<PushToken>> {
        self.get_record(KEY_PUSH_TOKEN)
    }

    /// Persist a token.  Callers only hand over validated tokens.
    pub fn save_push_token(&self, token: &PushToken) -> Result<()> {
        self.put_record(KEY_PUSH_TOKEN, token)
    }

    pub fn clear_push_token(&self) -> Result<bool> {
        self.delete_record(KEY_PUSH_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Platform;

    #[test]
    fn token_save_load_clear() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_push_token().unwrap().is_none());

        let mut token = PushToken::new("ExpoPushToken[abc123]", Platform::Ios);
        token.last_validated_at = Some(Utc::now());
        db.save_push_token(&token).unwrap();
        assert_eq!(db.load_push_token().unwrap(), Some(token));

        assert!(db.clear_push_token().unwrap());
        assert!(db.load_push_token().unwrap().is_none());
    }
}
