use crate::database::Database;
use crate::error::Result;
use crate::records::KEY_LAST_USER;

impl Database {
    /// User id of the last account that signed in on this installation.
    pub fn last_user_id(&self) -> Result<Option<String>> {
        self.get_record(KEY_LAST_USER)
    }

    pub fn set_last_user_id(&self, user_id: &str) -> Result<()> {
        self.put_record(KEY_LAST_USER, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.last_user_id().unwrap(), None);

        db.set_last_user_id("u1").unwrap();
        db.set_last_user_id("u2").unwrap();
        assert_eq!(db.last_user_id().unwrap().as_deref(), Some("u2"));
    }
}
