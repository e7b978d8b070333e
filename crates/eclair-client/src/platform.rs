//! Device push platform abstraction (OS permission prompt, token issuance,
//! Android channels).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eclair_shared::constants::AGGRESSIVE_OEMS;
use eclair_store::{DeviceSeverity, Platform};

use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// What the host knows about the handset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub manufacturer: String,
    /// The OS reports the app as restricted from background work.
    pub background_restricted: bool,
}

impl DeviceProfile {
    pub fn new(manufacturer: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            background_restricted: false,
        }
    }

    pub fn is_aggressive_oem(&self) -> bool {
        let manufacturer = self.manufacturer.trim().to_ascii_lowercase();
        AGGRESSIVE_OEMS.iter().any(|oem| manufacturer.contains(oem))
    }

    pub fn severity(&self) -> DeviceSeverity {
        match (self.is_aggressive_oem(), self.background_restricted) {
            (_, true) => DeviceSeverity::Critical,
            (true, false) => DeviceSeverity::Warning,
            (false, false) => DeviceSeverity::None,
        }
    }
}

#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn platform(&self) -> Platform;

    /// Obtain a push token; `force_new` asks the OS for a fresh registration.
    async fn obtain_token(&self, force_new: bool) -> Result<String, PlatformError>;

    async fn permission_status(&self) -> PermissionStatus;

    /// Prompt the user.  Returns the status after the prompt.
    async fn request_permission(&self) -> PermissionStatus;

    /// Channel ids currently registered.  Always empty on iOS.
    async fn existing_channels(&self) -> Vec<String>;

    async fn create_channel(&self, id: &str) -> Result<(), PlatformError>;

    fn device_profile(&self) -> DeviceProfile;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_from_manufacturer_and_restriction() {
        assert_eq!(DeviceProfile::new("Google").severity(), DeviceSeverity::None);
        assert_eq!(DeviceProfile::new("Xiaomi").severity(), DeviceSeverity::Warning);
        assert_eq!(DeviceProfile::new(" HUAWEI ").severity(), DeviceSeverity::Warning);

        let restricted = DeviceProfile {
            manufacturer: "Google".into(),
            background_restricted: true,
        };
        assert_eq!(restricted.severity(), DeviceSeverity::Critical);
    }
}
