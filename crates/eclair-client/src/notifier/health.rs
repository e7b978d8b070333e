//! Turning diagnostic findings into a [`HealthReport`].

use chrono::{DateTime, Utc};

use eclair_store::{DeviceSeverity, HealthReport, OverallHealth};

use crate::platform::{DeviceProfile, PermissionStatus};

/// Raw observations of one diagnostic pass.
#[derive(Debug, Clone)]
pub(crate) struct Findings {
    /// Current OS notification permission.
    pub permission: PermissionStatus,
    /// Required delivery channels absent on the device.  Always empty on iOS.
    pub missing_channels: Vec<String>,
    /// A stored, well-formed token the backend did not reject.
    pub token_healthy: bool,
    /// Manufacturer and background restriction, for power management checks.
    pub device: DeviceProfile,
}

impl Findings {
    pub fn into_report(self, timestamp: DateTime<Utc>) -> HealthReport {
        let permissions_healthy = self.permission.is_granted();
        let channels_healthy = self.missing_channels.is_empty();
        let device_severity = self.device.severity();

        let mut remediation = Vec::new();
        if !permissions_healthy {
            remediation.push(
                "Autorisez les notifications d'Eclair dans les réglages du téléphone.".to_string(),
            );
        }
        if !channels_healthy {
            remediation.push(format!(
                "Canaux de notification manquants, recréation en cours : {}.",
                self.missing_channels.join(", ")
            ));
        }
        if !self.token_healthy {
            remediation.push(
                "Le jeton de notification est invalide et va être régénéré.".to_string(),
            );
        }
        match device_severity {
            DeviceSeverity::None => {}
            DeviceSeverity::Warning => remediation.push(format!(
                "Désactivez l'optimisation de batterie pour Eclair ({}).",
                self.device.manufacturer.trim()
            )),
            DeviceSeverity::Critical => remediation.push(
                "L'activité en arrière-plan d'Eclair est restreinte : autorisez-la pour recevoir les notifications."
                    .to_string(),
            ),
        }

        let healthy = permissions_healthy
            && channels_healthy
            && self.token_healthy
            && device_severity < DeviceSeverity::Critical;

        HealthReport {
            timestamp,
            permissions_healthy,
            token_healthy: self.token_healthy,
            channels_healthy,
            device_severity,
            overall: if healthy {
                OverallHealth::Healthy
            } else {
                OverallHealth::RequiresAttention
            },
            remediation,
        }
    }
}

/// Short advisory shown with a `healthAlert`.
pub(crate) fn alert_message(report: &HealthReport, limited_mode: bool) -> String {
    if limited_mode {
        return "Notifications limitées : Eclair fonctionne mais ne peut pas vous prévenir en arrière-plan."
            .to_string();
    }
    report
        .remediation
        .first()
        .cloned()
        .unwrap_or_else(|| "Les notifications d'Eclair nécessitent votre attention.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings() -> Findings {
        Findings {
            permission: PermissionStatus::Granted,
            missing_channels: Vec::new(),
            token_healthy: true,
            device: DeviceProfile::new("Google"),
        }
    }

    #[test]
    fn all_good_is_healthy_without_remediation() {
        let report = findings().into_report(Utc::now());
        assert!(report.is_healthy());
        assert!(report.remediation.is_empty());
    }

    #[test]
    fn each_finding_gets_a_remediation_line() {
        let report = Findings {
            permission: PermissionStatus::Denied,
            missing_channels: vec!["messages".into()],
            token_healthy: false,
            device: DeviceProfile::new("Xiaomi"),
        }
        .into_report(Utc::now());

        assert!(!report.is_healthy());
        assert!(!report.permissions_healthy);
        assert!(!report.channels_healthy);
        assert_eq!(report.device_severity, DeviceSeverity::Warning);
        assert_eq!(report.remediation.len(), 4);
    }

    #[test]
    fn aggressive_oem_alone_stays_healthy() {
        let report = Findings {
            device: DeviceProfile::new("Samsung"),
            ..findings()
        }
        .into_report(Utc::now());
        assert!(report.is_healthy());
        assert_eq!(report.remediation.len(), 1);
    }

    #[test]
    fn background_restriction_requires_attention() {
        let report = Findings {
            device: DeviceProfile {
                manufacturer: "Google".into(),
                background_restricted: true,
            },
            ..findings()
        }
        .into_report(Utc::now());
        assert_eq!(report.overall, OverallHealth::RequiresAttention);
    }
}
