use anyhow::Context;
use futures::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use newsletter::config::RunConfig;
use newsletter::{Event, Newsletter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // ── Logging ─────────────────────────────────────────────────────────
    // Console always; a daily rolling file as well when NEWSLETTER_LOG_DIR is set.
    let (file_layer, _guard) = match std::env::var("NEWSLETTER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "newsletter.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    // ── Configuration ───────────────────────────────────────────────────
    let config = RunConfig::load(std::env::args().nth(1)).context("Failed to load run configuration")?;
    let mut events = Newsletter::from_env()?.run(config)?;

    // ── Run ─────────────────────────────────────────────────────────────
    while let Some(event) = events.next().await {
        match event {
            Event::QuotaError(e) => {
                anyhow::bail!("Unable to fetch send quota: {e}");
            }
            Event::Start {
                list_id,
                recipients,
                ..
            } => info!("{list_id} - starting, {recipients} recipients"),
            Event::Batch(batch) => info!(
                "{} - batch {}/{}, {} recipients",
                batch.list_id,
                batch.iteration,
                batch.cycle,
                batch.recipients.len()
            ),
            Event::Sent {
                list_id,
                recipient,
                elapsed,
                ..
            } => info!("{list_id} - sent to {recipient} in {elapsed:?}"),
            Event::Error { list_id, failure } => warn!(
                "{list_id} - failed to send to {} after {:?}: {}",
                failure.recipient, failure.elapsed, failure.detail
            ),
            Event::Complete(completion) => {
                let report = &completion.report;
                info!(
                    "{} - complete, {} sent, {} failed",
                    completion.list.id,
                    report.sent.len(),
                    report.errors.len()
                );
                match newsletter::report::render_dump(&completion) {
                    Ok(json) => debug!("{} - report\n{json}", completion.list.id),
                    Err(e) => warn!("{} - could not serialize report: {e}", completion.list.id),
                }
            }
            Event::Finish => info!("All lists delivered"),
        }
    }

    Ok(())
}
