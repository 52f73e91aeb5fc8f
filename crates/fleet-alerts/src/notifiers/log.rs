use crate::check::{CheckResultEvent, Severity};
use crate::dispatch::Notifier;

/// LogNotifier records each notification as a structured log event.
pub struct LogNotifier;

impl LogNotifier {
    pub const NAME: &'static str = "log";
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn notify(&self, event: &CheckResultEvent) -> anyhow::Result<()> {
        let CheckResultEvent {
            app_id,
            check_name,
            severity,
            message,
            timestamp,
            labels: _,
            times,
        } = event;

        match severity {
            Severity::Critical => tracing::error!(
                %app_id, %check_name, %severity, times, %timestamp, %message, "check notification"
            ),
            Severity::Warning => tracing::warn!(
                %app_id, %check_name, %severity, times, %timestamp, %message, "check notification"
            ),
            Severity::Resolved | Severity::Pass => tracing::info!(
                %app_id, %check_name, %severity, times, %timestamp, %message, "check notification"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_notifier_accepts_every_severity() {
        assert_eq!(LogNotifier.name(), "log");

        for severity in [
            Severity::Critical,
            Severity::Warning,
            Severity::Resolved,
            Severity::Pass,
        ] {
            let event = CheckResultEvent {
                app_id: "/foo".to_string(),
                check_name: "min-healthy".to_string(),
                severity,
                message: "Only 1 are healthy out of total 4".to_string(),
                timestamp: "2024-03-01T12:00:00Z".parse().unwrap(),
                labels: Default::default(),
                times: 1,
            };
            LogNotifier.notify(&event).unwrap();
        }
    }
}
