use anyhow::Context;
use mimalloc::MiMalloc;
use tracing::{error, info, warn};

use monitor_encoder::api::{ApiServer, ApiServerConfig};
use monitor_encoder::codecs::CodecRegistry;
use monitor_encoder::config::Cli;
use monitor_encoder::console::Console;
use monitor_encoder::services::ServiceContainer;
use monitor_encoder::tools::ToolPaths;
use monitor_encoder::{logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::load();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let (logging_config, _guard) =
        logging::init_logging(&cli.log_dir).context("failed to initialize logging")?;
    panic_hook::install(&cli.log_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = cli.workers,
        active_time = %cli.active_time,
        "monitor-encoder starting"
    );

    let tools = ToolPaths::from_env();
    if cli.skip_tool_check {
        warn!("External tool check skipped");
    } else {
        tools.check_availability()?;
    }

    let mut container = ServiceContainer::new(
        cli.directories(),
        cli.pipeline_settings(),
        cli.active_time,
        CodecRegistry::external(&tools),
    )
    .with_logging_config(logging_config);

    if let Err(e) = container.initialize() {
        error!(error = %e, "Failed to start job pipeline");
        container.shutdown().await;
        return Err(e.into());
    }

    let token = container.cancellation_token();

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.bind_addr(),
            ..Default::default()
        },
        container.api_state(),
        token.child_token(),
    );
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "API server stopped");
        }
    });

    Console::new(
        container.registry.clone(),
        container.gate.clone(),
        container.logging_config.clone(),
        token.clone(),
    )
    .spawn_stdin()
    .context("failed to start console")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Ctrl-C received");
        }
        _ = token.cancelled() => {}
    }

    container.shutdown().await;
    let _ = server_handle.await;

    info!("monitor-encoder stopped");
    Ok(())
}
