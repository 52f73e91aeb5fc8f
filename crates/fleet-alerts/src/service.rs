use crate::check::CheckResultEvent;
use crate::dispatch::{Dispatcher, Notifier};
use crate::engine::Engine;
use crate::notifiers::{webhook, LogNotifier, WebhookNotifier};
use crate::routes;
use anyhow::Context;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

#[derive(clap::Parser, Debug, serde::Serialize)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Once notified, repeats of a check result at the same severity
    /// are suppressed for this duration.
    #[clap(
        long = "suppress-duration",
        env = "ALERTS_SUPPRESS_DURATION",
        default_value = "30m"
    )]
    #[serde(with = "humantime_serde")]
    #[arg(value_parser = humantime::parse_duration)]
    pub suppress_duration: std::time::Duration,
    /// Interval between sweeps of expired suppressions.
    #[clap(
        long = "sweep-interval",
        env = "ALERTS_SWEEP_INTERVAL",
        default_value = "5s"
    )]
    #[serde(with = "humantime_serde")]
    #[arg(value_parser = humantime::parse_duration)]
    pub sweep_interval: std::time::Duration,
    /// Routes of applications which don't set an `alerts.routes` label.
    #[clap(
        long = "default-routes",
        env = "ALERTS_DEFAULT_ROUTES",
        default_value = routes::DEFAULT_ROUTES
    )]
    pub default_routes: String,
    /// Notifiers to enable. May be repeated.
    #[clap(long = "notifier", value_enum, default_value = "log")]
    pub notifiers: Vec<NotifierKind>,
    /// Default destinations of the webhook notifier. May be repeated.
    #[clap(
        long = "webhook-url",
        env = "ALERTS_WEBHOOK_URLS",
        value_delimiter = ','
    )]
    pub webhook_urls: Vec<url::Url>,
    /// Number of webhook notifications which may be queued for delivery.
    #[clap(long = "webhook-queue", default_value = "64")]
    pub webhook_queue: usize,
    /// Timeout of each webhook delivery. Also bounds the time spent
    /// draining queued deliveries on exit.
    #[clap(
        long = "webhook-timeout",
        env = "ALERTS_WEBHOOK_TIMEOUT",
        default_value = "30s"
    )]
    #[serde(with = "humantime_serde")]
    #[arg(value_parser = humantime::parse_duration)]
    pub webhook_timeout: std::time::Duration,
    /// File of newline-delimited JSON check results to read.
    /// Check results are read from stdin if not set.
    #[clap(long = "input")]
    pub input: Option<std::path::PathBuf>,
    /// Port on which to serve Prometheus metrics.
    #[clap(long = "metrics-port", env = "ALERTS_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[derive(
    clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Log,
    Webhook,
}

/// Run the alert service until its input is exhausted or it's signaled to stop.
pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(args = %serde_json::to_string(&args)?, "started!");

    routes::parse(&args.default_routes).context("parsing --default-routes")?;

    if let Some(port) = args.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("installing Prometheus metrics exporter")?;
    }

    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    let mut deliveries = None;

    let mut kinds = args.notifiers.clone();
    kinds.sort();
    kinds.dedup();

    for kind in kinds {
        match kind {
            NotifierKind::Log => notifiers.push(Box::new(LogNotifier)),
            NotifierKind::Webhook => {
                let (notifier, rx) =
                    WebhookNotifier::new(args.webhook_urls.clone(), args.webhook_queue);
                notifiers.push(Box::new(notifier));

                deliveries = Some(tokio::spawn(webhook::serve_deliveries(
                    webhook::client(args.webhook_timeout)?,
                    rx,
                )));
            }
        }
    }

    let engine = Arc::new(Engine::new(
        Dispatcher::new(notifiers),
        args.default_routes,
        args.suppress_duration,
    ));

    let (events_tx, events_rx) = mpsc::channel(EVENTS_BUFFER);

    let source = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            tokio::spawn(read_events(file, events_tx))
        }
        None => tokio::spawn(read_events(tokio::io::stdin(), events_tx)),
    };

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("caught shutdown signal, stopping...");
            }
            Err(err) => {
                tracing::error!(?err, "error subscribing to shutdown signal");
            }
        }
    };

    serve(engine, events_rx, args.sweep_interval, shutdown).await;

    // The source may be blocked on a read which will never complete.
    source.abort();
    match source.await {
        Ok(result) => result?,
        Err(err) if err.is_cancelled() => (),
        Err(err) => return Err(err).context("check result source panicked"),
    }

    // `serve` dropped the Engine and its WebhookNotifier sender,
    // which allows queued deliveries to drain and finish.
    if let Some(deliveries) = deliveries {
        match tokio::time::timeout(args.webhook_timeout, deliveries).await {
            Ok(result) => result.context("webhook delivery task panicked")?,
            Err(_) => tracing::warn!(
                timeout = ?args.webhook_timeout,
                "abandoning webhook deliveries which didn't drain in time"
            ),
        }
    }

    tracing::info!("alert service stopped");
    Ok(())
}

/// Serve the Engine, processing each received CheckResultEvent and
/// periodically sweeping expired suppressions, until `shutdown` resolves or
/// all senders of `events` are dropped.
///
/// Upon return `events` is dropped and senders will observe a closed
/// channel. Check results sent after `shutdown` are not processed.
pub async fn serve(
    engine: Arc<Engine>,
    mut events: mpsc::Receiver<CheckResultEvent>,
    sweep_interval: std::time::Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut sweeps = tokio::time::interval(sweep_interval);
    sweeps.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("check results are exhausted, stopping...");
                    break;
                };
                if let Err(err) = engine.process(event) {
                    tracing::error!(?err, "failed to process check result");
                }
            }
            _ = sweeps.tick() => {
                engine.sweep(chrono::Utc::now());
            }
            () = &mut shutdown => {
                tracing::info!("alert engine signaled to stop");
                break;
            }
        }
    }
}

/// Read newline-delimited JSON CheckResultEvents from `reader`, sending each
/// to `tx`. Lines which fail to decode are logged and skipped.
/// Returns when `reader` is exhausted or the receiver is dropped.
pub async fn read_events<R>(reader: R, tx: mpsc::Sender<CheckResultEvent>) -> anyhow::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = tokio::io::BufReader::new(reader).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await.context("reading check results")? {
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }
        let event: CheckResultEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(line_no, %err, "skipping undecodable check result");
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("check results receiver was dropped");
            break;
        }
    }
    Ok(())
}

const EVENTS_BUFFER: usize = 128;
