use fleet_alerts::{
    check,
    dispatch::Dispatcher,
    engine::{Outcome, State},
    CheckResultEvent, Engine, Notifier, Severity,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Sent = Arc<Mutex<Vec<(String, String, Severity, u32)>>>;

struct Recording {
    name: &'static str,
    sent: Sent,
}

impl Notifier for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn notify(&self, event: &CheckResultEvent) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((
            self.name.to_string(),
            event.check_name.clone(),
            event.severity,
            event.times,
        ));
        Ok(())
    }
}

fn engine(suppress: std::time::Duration) -> (Arc<Engine>, Sent) {
    let sent = Sent::default();
    let notifiers: Vec<Box<dyn Notifier>> = vec![
        Box::new(Recording {
            name: "slack",
            sent: sent.clone(),
        }),
        Box::new(Recording {
            name: "pager",
            sent: sent.clone(),
        }),
    ];
    let engine = Engine::new(
        Dispatcher::new(notifiers),
        "*/warning/slack;*/critical/*;*/resolved/*",
        suppress,
    );
    (Arc::new(engine), sent)
}

fn event(app_id: &str, check_name: &str, severity: Severity) -> CheckResultEvent {
    CheckResultEvent {
        app_id: app_id.to_string(),
        check_name: check_name.to_string(),
        severity,
        message: String::new(),
        timestamp: chrono::Utc::now(),
        labels: Default::default(),
        times: 0,
    }
}

fn tuple(
    name: &str,
    check_name: &str,
    severity: Severity,
    times: u32,
) -> (String, String, Severity, u32) {
    (name.to_string(), check_name.to_string(), severity, times)
}

#[tokio::test]
async fn test_serve_processes_events_in_order() {
    let (engine, sent) = engine(std::time::Duration::from_secs(3600));
    let (tx, rx) = mpsc::channel(16);

    let mut disabled = event("/bar", "min-healthy", Severity::Critical);
    disabled
        .labels
        .insert(check::ALERTS_ENABLED.to_string(), "false".to_string());

    for event in [
        event("/foo", "min-healthy", Severity::Warning),
        event("/foo", "min-healthy", Severity::Warning),
        event("/foo", "min-healthy", Severity::Critical),
        disabled,
        event("/foo", "min-healthy", Severity::Critical),
        event("/foo", "min-healthy", Severity::Pass),
        event("/foo", "min-healthy", Severity::Pass),
    ] {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    // Serving stops once all senders are dropped and events are drained.
    fleet_alerts::serve(
        engine.clone(),
        rx,
        std::time::Duration::from_secs(3600),
        futures::future::pending(),
    )
    .await;

    assert_eq!(
        *sent.lock().unwrap(),
        vec![
            tuple("slack", "min-healthy", Severity::Warning, 1),
            tuple("slack", "min-healthy", Severity::Critical, 2),
            tuple("pager", "min-healthy", Severity::Critical, 2),
            tuple("slack", "min-healthy", Severity::Resolved, 3),
            tuple("pager", "min-healthy", Severity::Resolved, 3),
        ]
    );
    assert_eq!(engine.snapshot(), State::default());
}

#[tokio::test(start_paused = true)]
async fn test_serve_sweeps_periodically() {
    let (engine, sent) = engine(std::time::Duration::ZERO);
    let (tx, rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let serve = tokio::spawn(fleet_alerts::serve(
        engine.clone(),
        rx,
        std::time::Duration::from_secs(5),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut failing = event("/foo", "suspended", Severity::Critical);
    failing.timestamp = chrono::Utc::now() - chrono::Duration::seconds(60);
    tx.send(failing.clone()).await.unwrap();

    // Let the event be processed, and then a further sweep run.
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;

    // The suppression expired, and the persistent failure is re-notified.
    tx.send(failing).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    stop_tx.send(()).unwrap();
    serve.await.unwrap();

    assert_eq!(
        *sent.lock().unwrap(),
        vec![
            tuple("slack", "suspended", Severity::Critical, 1),
            tuple("pager", "suspended", Severity::Critical, 1),
            tuple("slack", "suspended", Severity::Critical, 2),
            tuple("pager", "suspended", Severity::Critical, 2),
        ]
    );

    // With serving stopped, further sends fail rather than block.
    assert!(tx
        .send(event("/foo", "suspended", Severity::Pass))
        .await
        .is_err());
}

#[test]
fn test_direct_callers_share_engine_state() {
    let (engine, sent) = engine(std::time::Duration::from_secs(3600));

    let outcome = engine
        .process(event("/foo", "min-instances", Severity::Warning))
        .unwrap();
    assert!(matches!(outcome, Outcome::Notified { .. }));

    let mut bad_routes = event("/foo", "min-instances", Severity::Critical);
    bad_routes
        .labels
        .insert(check::ALERTS_ROUTES.to_string(), "min-instances/critical".to_string());
    assert!(matches!(
        engine.process(bad_routes).unwrap(),
        Outcome::InvalidRoutes(_)
    ));

    assert_eq!(
        *sent.lock().unwrap(),
        vec![tuple("slack", "min-instances", Severity::Warning, 1)]
    );
}
