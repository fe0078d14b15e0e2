//! `code-relay` daemon: scans the configured mailbox until Ctrl-C.

use code_relay::logging::{self, LogFormat};
use code_relay::{
    HistoryStore, LoginCodeTemplate, Pop3Source, RelayConfig, Result, Scanner, WebhookNotifier,
};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init(LogFormat::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, category = %err.category(), "code-relay stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = RelayConfig::from_env()?;
    info!(
        host = %config.host,
        port = config.port,
        account = %config.account,
        database = %config.database_path.display(),
        interval_secs = config.scan_interval.as_secs(),
        policy = ?config.notify_policy,
        "code-relay starting"
    );

    let store = HistoryStore::open(&config.database_path).await?;
    let notifier = WebhookNotifier::from_config(&config)?;

    let scanner = Scanner::new(
        Pop3Source::new(&config),
        notifier,
        store,
        LoginCodeTemplate::streamyard(),
    )
    .with_policy(config.notify_policy)
    .with_interval(config.scan_interval);

    scanner
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    scanner.into_store().close().await;
    info!("code-relay stopped cleanly");
    Ok(())
}
