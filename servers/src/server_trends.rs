use anyhow::{Context, Result};
use lib_trends::configs::load_secrets;
use lib_trends::core::{Hub, Notifier, Scheduler, Store};
use lib_trends::ingestors::{GitHubTrendSource, TrendSource};
use lib_trends::mailers::{EmailTransport, HttpMailConfig, HttpMailTransport, LogTransport};
use lib_trends::subscribers::SubscriberStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod trends_logic;
use trends_logic::{config, downstream, logger, state};

/// Per-request timeout of the mail API client.
const MAIL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config()?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let secrets = load_secrets(settings.secrets_path.as_deref()).context("failed to load secrets")?;
    info!(component = "main", secrets = ?secrets, "secrets loaded");

    let store = Arc::new(Store::new());
    let hub = Arc::new(Hub::new(settings.hub));
    let subscribers = Arc::new(SubscriberStore::new());

    let transport: Arc<dyn EmailTransport> = match secrets.mail.clone() {
        Some(mail) => Arc::new(
            HttpMailTransport::new(HttpMailConfig {
                api_url: mail.api_url,
                api_key: mail.api_key,
                from: mail.from,
                request_timeout: MAIL_REQUEST_TIMEOUT,
            })
            .context("failed to build the mail client")?,
        ),
        None => {
            warn!(component = "main", "no mail credentials configured, digests are only logged");
            Arc::new(LogTransport)
        }
    };
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&store),
        subscribers.clone(),
        transport,
        settings.notifier,
    ));

    let source: Arc<dyn TrendSource> = Arc::new(
        GitHubTrendSource::new(settings.github.clone(), secrets.github_token.clone())
            .context("failed to build the GitHub client")?,
    );
    let scheduler = Scheduler::new(source, Arc::clone(&store), Arc::clone(&hub), settings.scheduler);

    let app_state = state::AppState::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&subscribers),
        settings.static_dir.clone(),
    )
    .with_notifier(Arc::clone(&notifier));

    // Bind before spawning anything so a taken port fails the process.
    let listener = downstream::bind(settings.port).await?;

    let shutdown = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.child_token()));
    let notifier_handle = tokio::spawn(Arc::clone(&notifier).run(shutdown.child_token()));
    let downstream_handle = tokio::spawn(downstream::run(listener, app_state, shutdown.child_token()));

    wait_for_signal().await;
    shutdown.cancel();

    let (scheduler_done, notifier_done) = tokio::join!(scheduler_handle, notifier_handle);
    if let Err(e) = scheduler_done {
        warn!(component = "main", error = %e, "scheduler task failed");
    }
    if let Err(e) = notifier_done {
        warn!(component = "main", error = %e, "notifier task failed");
    }

    let stragglers = hub.shutdown(settings.shutdown_grace).await;
    if stragglers > 0 {
        warn!(component = "main", stragglers, "clients force-closed after the grace period");
    }

    match downstream_handle.await {
        Ok(Err(e)) => warn!(component = "main", error = %e, "http server stopped with an error"),
        Err(e) => warn!(component = "main", error = %e, "http server task failed"),
        Ok(Ok(())) => {}
    }

    info!(component = "main", "shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(component = "main", error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!(component = "main", "Ctrl-C received, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                info!(component = "main", "SIGTERM received, initiating shutdown");
            }
            Err(e) => {
                warn!(component = "main", error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
