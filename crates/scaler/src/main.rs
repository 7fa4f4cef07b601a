use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dynamic_device_scaler::app::Application;
use dynamic_device_scaler::app::Reconciler;
use dynamic_device_scaler::config::Cli;
use dynamic_device_scaler::config::Commands;
use dynamic_device_scaler::config::DaemonArgs;
use dynamic_device_scaler::domain::SystemClock;
use dynamic_device_scaler::k8s::KubeStore;
use tokio_util::sync::CancellationToken;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    logging::init(daemon_args.log_format);

    tracing::info!("Starting dynamic device scaler {}", &**version::VERSION);

    let store = KubeStore::connect(
        daemon_args.kubeconfig.as_deref(),
        daemon_args.config_namespace.clone(),
        daemon_args.config_name.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;
    let reconciler = Reconciler::new(
        Arc::new(store),
        Arc::new(SystemClock),
        daemon_args.nodes.clone(),
    );
    let app = Application::new(reconciler, daemon_args.reconcile_interval());

    if daemon_args.once {
        return app.run_once().await;
    }

    let cancellation_token = CancellationToken::new();
    let signal_handler = tokio::spawn(Application::wait_for_shutdown(cancellation_token.clone()));

    app.run(cancellation_token).await;
    signal_handler.await??;

    tracing::info!("Dynamic device scaler stopped");
    Ok(())
}
