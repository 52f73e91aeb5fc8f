//! Alerting for a fleet of applications.
//!
//! Check results of applications are processed by an [`Engine`], which
//! suppresses repeats of already-notified failures, counts escalations, and
//! turns passing checks of failed applications into resolutions. Notified
//! check results are routed to [`Notifier`]s by each application's routes.

pub mod check;
pub mod dispatch;
pub mod engine;
pub mod notifiers;
pub mod routes;
pub mod service;

pub use check::{CheckResultEvent, Severity};
pub use dispatch::{Dispatcher, Notifier};
pub use engine::{Engine, Outcome, Transition};
pub use routes::Route;
pub use service::{run, serve, Args};
