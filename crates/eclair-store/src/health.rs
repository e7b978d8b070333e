//! Rolling history of notification health reports.

use eclair_shared::constants::HEALTH_HISTORY_LEN;

use crate::database::Database;
use crate::error::Result;
use crate::models::HealthReport;
use crate::records::KEY_HEALTH_HISTORY;

impl Database {
    /// Oldest first.
    pub fn health_history(&self) -> Result<Vec<HealthReport>> {
        Ok(self
            .get_record::<Vec<HealthReport>>(KEY_HEALTH_HISTORY)?
            .unwrap_or_default())
    }

    /// Append a report, dropping the oldest ones beyond the ring capacity.
    pub fn append_health_report(&self, report: &HealthReport) -> Result<()> {
        let mut history = self.health_history()?;
        history.push(report.clone());
        if history.len() > HEALTH_HISTORY_LEN {
            let excess = history.len() - HEALTH_HISTORY_LEN;
            history.drain(..excess);
        }
        self.put_record(KEY_HEALTH_HISTORY, &history)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{DeviceSeverity, OverallHealth};

    fn report(offset_secs: i64) -> HealthReport {
        HealthReport {
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            permissions_healthy: true,
            token_healthy: true,
            channels_healthy: true,
            device_severity: DeviceSeverity::None,
            overall: OverallHealth::Healthy,
            remediation: Vec::new(),
        }
    }

    #[test]
    fn history_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        let reports: Vec<_> = (0..(HEALTH_HISTORY_LEN as i64 + 7)).map(report).collect();
        for r in &reports {
            db.append_health_report(r).unwrap();
        }

        let history = db.health_history().unwrap();
        assert_eq!(history.len(), HEALTH_HISTORY_LEN);
        assert_eq!(history.first(), Some(&reports[7]));
        assert_eq!(history.last(), reports.last());
    }
}
