use clap::Parser;
use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use tilt_relay::app::{self, Options};
use tilt_relay::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        info!("Shutdown requested");
        shutdown.cancel();
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Sink panics are caught by the dispatch loop, so the hook only reports.
    // Anything reaching the top level exits with EXIT_PANIC below.
    panic::set_hook(Box::new(|info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
    }));

    let options = Options::parse();

    if let Err(e) = logging::init(options.log_format, options.verbose) {
        eprintln!("error: {e}");
        std::process::exit(EXIT_ERROR);
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    match AssertUnwindSafe(app::run(options, shutdown))
        .catch_unwind()
        .await
    {
        Ok(Ok(summary)) => {
            info!(
                reason = ?summary.reason,
                received = summary.stats.received,
                delivered = summary.stats.delivered,
                failed = summary.stats.failed,
                "Exiting"
            );
            std::process::exit(EXIT_SUCCESS)
        }
        Ok(Err(why)) => {
            error!(error = %why, "Run failed");
            std::process::exit(EXIT_ERROR);
        }
        Err(_) => std::process::exit(EXIT_PANIC),
    }
}
