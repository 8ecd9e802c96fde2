use std::process::ExitCode;

use clap::Parser;
use secrecy::SecretString;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

use args::Args;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Some(listen_address) = args.listen_address {
        config.server.listen_address = Some(listen_address);
    }
    if let Some(log_filter) = args.log_filter {
        config.server.log_filter = log_filter;
    }
    if let Some(client_secret) = args.client_secret {
        config.server.client_secret = SecretString::from(client_secret);
    }

    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    let Some(listen_address) = config.server.listen_address else {
        eprintln!(
            "no listen address configured: pass --listen-address, set GATEWAY_LISTEN_ADDRESS, or set server.listen_address in the config file"
        );
        return ExitCode::FAILURE;
    };

    let shutdown_signal = CancellationToken::new();
    spawn_signal_watcher(shutdown_signal.clone());

    let serve_config = ServeConfig {
        listen_address,
        log_filter: config.server.log_filter.clone(),
        config,
        shutdown_signal,
        version: VERSION.to_string(),
        bound_addr_sender: None,
    };

    match server::serve(serve_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gateway exited with an error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_watcher(shutdown_signal: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        log::info!("shutdown signal received");
        shutdown_signal.cancel();
    });
}
