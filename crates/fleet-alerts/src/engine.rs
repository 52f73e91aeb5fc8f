use crate::check::{self, CheckResultEvent, Severity};
use crate::dispatch::{Deliveries, Dispatcher};
use crate::routes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("check {check_name:?} of app {app_id:?} arrived with severity {severity}, which only the engine may assign")]
    SyntheticSeverity {
        app_id: String,
        check_name: String,
        severity: Severity,
    },
}

/// CheckKey identifies a check of an application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckKey {
    pub app_id: String,
    pub check_name: String,
}

impl CheckKey {
    pub fn of(event: &CheckResultEvent) -> Self {
        Self {
            app_id: event.app_id.clone(),
            check_name: event.check_name.clone(),
        }
    }
}

/// SuppressionKey identifies a notified severity of an application check.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SuppressionKey {
    pub check: CheckKey,
    pub severity: Severity,
}

/// State is the mutable state of the Engine.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct State {
    /// Time of the last notification of each (app, check, severity).
    /// At most one severity is expected for an (app, check).
    pub suppressed: BTreeMap<SuppressionKey, DateTime<Utc>>,
    /// Consecutive notifications of each (app, check) since its last resolution.
    /// Entries of an application which stops reporting while failing are
    /// retained for the life of the process.
    pub counts: BTreeMap<CheckKey, u32>,
}

/// Transition is a state change of an application check which is notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A check began failing, with no active suppression.
    NewFailure,
    /// A failing check changed its failing severity.
    Escalation,
    /// A failing check passed.
    Resolution,
}

/// Outcome of processing a CheckResultEvent.
#[derive(Debug)]
pub enum Outcome {
    /// Alerting is disabled for the event's application.
    Disabled,
    /// The application's routing specification is malformed.
    /// The event was dropped without changing state.
    InvalidRoutes(routes::Error),
    /// The event repeats an already-notified severity and was suppressed.
    Suppressed,
    /// The event passed, and there was no failure to resolve.
    Healthy,
    /// The event was notified. `event` is as dispatched, with its
    /// `times` and (for resolutions) `severity` assigned by the Engine.
    Notified {
        transition: Transition,
        event: CheckResultEvent,
        deliveries: Deliveries,
    },
}

/// Engine decides which check results are notified, tracking suppressions
/// of already-notified failures and the escalation count of each check.
///
/// All state is held behind a single lock, which is also held while
/// notified events are dispatched. `process` and `sweep` may be called
/// concurrently from any number of callers.
pub struct Engine {
    state: Mutex<State>,
    dispatcher: Dispatcher,
    default_routes: String,
    suppress_duration: std::time::Duration,
}

impl Engine {
    pub fn new(
        dispatcher: Dispatcher,
        default_routes: impl Into<String>,
        suppress_duration: std::time::Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            dispatcher,
            default_routes: default_routes.into(),
            suppress_duration,
        }
    }

    /// Process a check result, updating state and dispatching it to
    /// notifiers if it's a new failure, escalation, or resolution.
    ///
    /// State is committed before dispatch and is not rolled back if
    /// notifiers fail to deliver.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(app_id = %event.app_id, check_name = %event.check_name, severity = %event.severity),
    )]
    pub fn process(&self, mut event: CheckResultEvent) -> Result<Outcome, Error> {
        let mut state = self.lock();

        if !event.alerts_enabled() {
            tracing::info!(
                "alerting is disabled via the {} application label",
                check::ALERTS_ENABLED
            );
            return Ok(Outcome::Disabled);
        }

        if event.severity == Severity::Resolved {
            tracing::error!("refusing check result with engine-assigned severity");
            return Err(Error::SyntheticSeverity {
                app_id: event.app_id,
                check_name: event.check_name,
                severity: event.severity,
            });
        }

        let routes = match routes::parse(event.routes_spec(&self.default_routes)) {
            Ok(routes) => routes,
            Err(err) => {
                tracing::warn!(%err, "dropping check result with invalid routes");
                return Ok(Outcome::InvalidRoutes(err));
            }
        };

        let key = CheckKey::of(&event);

        let transition = match (state.suppressed_severity(&key), event.severity) {
            (Some(prior), Severity::Pass) => {
                event.times = state.increment(&key);
                event.severity = Severity::Resolved;

                state.suppressed.remove(&SuppressionKey {
                    check: key.clone(),
                    severity: prior,
                });
                state.counts.remove(&key);

                Transition::Resolution
            }
            (Some(prior), severity) if prior != severity => {
                state.suppressed.remove(&SuppressionKey {
                    check: key.clone(),
                    severity: prior,
                });
                state.suppressed.insert(
                    SuppressionKey {
                        check: key.clone(),
                        severity,
                    },
                    event.timestamp,
                );
                event.times = state.increment(&key);

                Transition::Escalation
            }
            (Some(_), _) => return Ok(Outcome::Suppressed),
            (None, Severity::Pass) => {
                state.counts.remove(&key);
                return Ok(Outcome::Healthy);
            }
            (None, severity) => {
                state.suppressed.insert(
                    SuppressionKey {
                        check: key.clone(),
                        severity,
                    },
                    event.timestamp,
                );
                event.times = state.increment(&key);

                Transition::NewFailure
            }
        };

        tracing::debug!(?transition, times = event.times, "notifying check result");
        let deliveries = self.dispatcher.dispatch(&routes, &event);

        Ok(Outcome::Notified {
            transition,
            event,
            deliveries,
        })
    }

    /// Remove suppressions which are older than the suppression duration as of `now`,
    /// returning the number removed. Escalation counts are retained, so that a
    /// persistent failure is re-notified with an increasing count.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.suppressed.len();

        state.suppressed.retain(|_key, notified_at| {
            // A negative age (a timestamp ahead of `now`) is never expired.
            match (now - *notified_at).to_std() {
                Ok(age) => age <= self.suppress_duration,
                Err(_) => true,
            }
        });
        let expired = before - state.suppressed.len();

        if expired != 0 {
            metrics::counter!("suppressions_expired_total").increment(expired as u64);
            tracing::debug!(expired, "expired suppressed alerts");
        }
        expired
    }

    /// Snapshot a copy of the current State.
    pub fn snapshot(&self) -> State {
        self.lock().clone()
    }

    // State is committed before notifiers are invoked, so a notifier which
    // panics leaves the State consistent and it remains usable.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("recovering alert engine state after a panic while it was held");
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }
}

impl State {
    // Find the suppressed severity of `key`, if any, in priority order.
    fn suppressed_severity(&self, key: &CheckKey) -> Option<Severity> {
        let mut found = check::SUPPRESSED_SEVERITIES.into_iter().filter(|severity| {
            self.suppressed.contains_key(&SuppressionKey {
                check: key.clone(),
                severity: *severity,
            })
        });
        let first = found.next();

        if let Some(other) = found.next() {
            tracing::error!(
                ?first,
                ?other,
                "invariant violated: check has suppressions of multiple severities"
            );
        }
        first
    }

    fn increment(&mut self, key: &CheckKey) -> u32 {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }
}
