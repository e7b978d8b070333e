use crate::database::Database;
use crate::error::Result;
use crate::models::NotificationSettings;
use crate::records::KEY_NOTIFICATION_SETTINGS;

impl Database {
    /// Stored settings, or the defaults (everything on) when never saved.
    pub fn notification_settings(&self) -> Result<NotificationSettings> {
        Ok(self
            .get_record(KEY_NOTIFICATION_SETTINGS)?
            .unwrap_or_default())
    }

    pub fn save_notification_settings(&self, settings: &NotificationSettings) -> Result<()> {
        self.put_record(KEY_NOTIFICATION_SETTINGS, settings)
    }
}
