#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use runbatch::Scheduler;
use server::action::RunAction;
use server::config::{CliArgs, ServerConfig};
use server::gateway::{handler::GatewayState, router};
use server::telemetry::{TelemetryProviders, init_telemetry, spawn_event_recorder};
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let scheduler = Scheduler::spawn(
        RunAction::new(config.run_mode.clone()),
        config.scheduler.clone(),
    );
    let recorder = spawn_event_recorder(scheduler.subscribe());
    let app = router(GatewayState::new(scheduler.clone(), config.max_delay));

    let res = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            log_startup_info(&uds_path, &config);
            let res = axum::serve(uds, app)
                .with_graceful_shutdown(shutdown_signal(scheduler))
                .await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        log_startup_info(&tcp_path, &config);
        axum::serve(tcp, app)
            .with_graceful_shutdown(shutdown_signal(scheduler))
            .await
    };

    // Every scheduler handle is gone once serving stops, which closes the
    // event channel and lets the recorder drain.
    let _ = tokio::time::timeout(Duration::from_secs(1), recorder).await;
    shutdown_telemetry(providers);

    res?;
    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting run gateway on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting run gateway on {} running {:?}",
            _addr,
            _config.run_mode
        );
    }
}

async fn shutdown_signal(scheduler: Scheduler) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Waiting `/sync` callers are answered here, before the listener drains
    // connections.
    if let Err(_e) = scheduler.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during scheduler shutdown: {:?}", _e);
    }
}

fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.force_flush() {
            eprintln!("Error flushing traces: {:#?}", err);
        }
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {:#?}", err);
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.force_flush() {
            eprintln!("Error flushing metrics: {:#?}", err);
        }
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {:#?}", err);
        }
    }
}
