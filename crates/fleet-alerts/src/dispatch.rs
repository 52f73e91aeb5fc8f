use crate::check::CheckResultEvent;
use crate::routes::Route;

/// Notifier delivers notifications of check results.
///
/// Notifiers are invoked while the alert engine holds its state lock,
/// and must not block: implementations with slow delivery should queue
/// notifications for delivery elsewhere.
pub trait Notifier: Send + Sync {
    /// Name of this Notifier, which is matched against route notifier patterns.
    fn name(&self) -> &str;

    /// Notify of the check result. An error is logged by the Dispatcher
    /// and is not retried.
    fn notify(&self, event: &CheckResultEvent) -> anyhow::Result<()>;
}

/// Deliveries tallies the notifier invocations of a single dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deliveries {
    pub succeeded: usize,
    pub failed: usize,
}

/// Dispatcher fans out check results to the Notifiers selected by routes.
pub struct Dispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn notifier_names(&self) -> impl Iterator<Item = &str> {
        self.notifiers.iter().map(|n| n.name())
    }

    /// Dispatch `event` to every notifier matched by every matching route.
    /// A notifier matched by multiple routes is notified once per route.
    ///
    /// Delivery is best-effort: a failed notifier is logged and dispatch
    /// continues with the remaining notifiers.
    pub fn dispatch(&self, routes: &[Route], event: &CheckResultEvent) -> Deliveries {
        metrics::counter!("notifications_total", "severity" => event.severity.as_str())
            .increment(1);

        let mut deliveries = Deliveries::default();

        for route in routes.iter().filter(|route| route.matches(event)) {
            for notifier in self
                .notifiers
                .iter()
                .filter(|notifier| route.matches_notifier(notifier.name()))
            {
                match notifier.notify(event) {
                    Ok(()) => deliveries.succeeded += 1,
                    Err(err) => {
                        tracing::warn!(
                            notifier = notifier.name(),
                            app_id = %event.app_id,
                            check_name = %event.check_name,
                            ?err,
                            "failed to notify (will not retry)"
                        );
                        metrics::counter!(
                            "notification_failures_total",
                            "notifier" => notifier.name().to_string()
                        )
                        .increment(1);

                        deliveries.failed += 1;
                    }
                }
            }
        }
        deliveries
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::check::Severity;
    use crate::routes;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Severity)>>>;

    struct Recording {
        name: &'static str,
        fail: bool,
        log: Log,
    }

    impl Notifier for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn notify(&self, event: &CheckResultEvent) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.name.to_string(), event.severity));

            if self.fail {
                anyhow::bail!("{} is unavailable", self.name)
            }
            Ok(())
        }
    }

    fn dispatcher(log: &Log, notifiers: &[(&'static str, bool)]) -> Dispatcher {
        Dispatcher::new(
            notifiers
                .iter()
                .map(|&(name, fail)| {
                    Box::new(Recording {
                        name,
                        fail,
                        log: log.clone(),
                    }) as Box<dyn Notifier>
                })
                .collect(),
        )
    }

    fn event(check_name: &str, severity: Severity) -> CheckResultEvent {
        CheckResultEvent {
            app_id: "/foo".to_string(),
            check_name: check_name.to_string(),
            severity,
            message: "something happened".to_string(),
            timestamp: "2024-03-01T12:00:00Z".parse().unwrap(),
            labels: Default::default(),
            times: 1,
        }
    }

    #[test]
    fn test_fan_out_by_route() {
        let log = Log::default();
        let dispatcher = dispatcher(&log, &[("slack", false), ("email", false)]);
        assert_eq!(
            dispatcher.notifier_names().collect::<Vec<_>>(),
            vec!["slack", "email"]
        );

        let routes = routes::parse("*/warning/*;min-healthy/critical/slack").unwrap();

        let out = dispatcher.dispatch(&routes, &event("min-instances", Severity::Warning));
        assert_eq!(out, Deliveries { succeeded: 2, failed: 0 });

        let out = dispatcher.dispatch(&routes, &event("min-healthy", Severity::Critical));
        assert_eq!(out, Deliveries { succeeded: 1, failed: 0 });

        let out = dispatcher.dispatch(&routes, &event("min-instances", Severity::Critical));
        assert_eq!(out, Deliveries::default());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("slack".to_string(), Severity::Warning),
                ("email".to_string(), Severity::Warning),
                ("slack".to_string(), Severity::Critical),
            ]
        );
    }

    #[test]
    fn test_overlapping_routes_notify_per_route() {
        let log = Log::default();
        let dispatcher = dispatcher(&log, &[("slack", false)]);
        let routes = routes::parse("*/critical/*;min-*/critical/slack").unwrap();

        let out = dispatcher.dispatch(&routes, &event("min-healthy", Severity::Critical));
        assert_eq!(out, Deliveries { succeeded: 2, failed: 0 });
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_notifier_does_not_stop_dispatch() {
        let log = Log::default();
        let dispatcher = dispatcher(&log, &[("pager", true), ("slack", false)]);
        let routes = routes::parse(routes::DEFAULT_ROUTES).unwrap();

        let out = dispatcher.dispatch(&routes, &event("suspended", Severity::Resolved));
        assert_eq!(out, Deliveries { succeeded: 1, failed: 1 });
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("pager".to_string(), Severity::Resolved),
                ("slack".to_string(), Severity::Resolved),
            ]
        );
    }
}
