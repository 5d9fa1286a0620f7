use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use sage_domain::config::{Config, ObservabilityConfig};
use sage_kernel_cli::bootstrap;
use sage_kernel_cli::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, _config_path) = sage_kernel_cli::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            run_server(Arc::new(config), tracer_provider).await
        }
        Some(Command::Doctor) => {
            init_cli_tracing();
            let (config, config_path) = sage_kernel_cli::cli::load_config()?;
            let passed = sage_kernel_cli::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = sage_kernel_cli::cli::load_config()?;
            if !sage_kernel_cli::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = sage_kernel_cli::cli::load_config()?;
            sage_kernel_cli::cli::config::show(&config)
        }
        Some(Command::Kernels(cmd)) => {
            init_cli_tracing();
            let (config, _) = sage_kernel_cli::cli::load_config()?;
            sage_kernel_cli::cli::kernels::run(Arc::new(config), cmd).await
        }
        Some(Command::Exec {
            kernel,
            uuid,
            json,
            code,
        }) => {
            init_cli_tracing();
            let (config, _) = sage_kernel_cli::cli::load_config()?;
            sage_kernel_cli::cli::exec::exec(Arc::new(config), kernel, uuid, code, json).await
        }
        Some(Command::Interrupt { kernel }) => {
            init_cli_tracing();
            let (config, _) = sage_kernel_cli::cli::load_config()?;
            sage_kernel_cli::cli::exec::interrupt(Arc::new(config), kernel).await
        }
        Some(Command::Version) => {
            println!("sage-kernel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
///
/// When `otlp_endpoint` is configured, an OpenTelemetry layer is added so
/// every `tracing` span is also exported over OTLP/gRPC. The returned
/// provider must be shut down on exit to flush pending spans.
fn init_tracing(obs: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sage_kernel_proxy=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let Some(endpoint) = obs.endpoint() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                 starting without OpenTelemetry"
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.sampling_ratio(),
        ))
        .with_resource(resource)
        .build();

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("sage-kernel"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

/// Compact stderr-only tracing for one-shot commands, `warn` by default
/// so stdout stays clean.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Host the proxy until SIGINT/SIGTERM.
async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!(environment = %config.environment, "sage-kernel starting");

    let runtime = bootstrap::build_runtime(config.clone()).await?;
    let shutdown = CancellationToken::new();

    // ── Background loops ─────────────────────────────────────────────
    let sweeper = config
        .proxy
        .pending_deadline()
        .map(|_| runtime.proxy.spawn_sweeper(shutdown.clone()));
    let reconciler = bootstrap::spawn_reconciler(&runtime, shutdown.clone());

    match runtime.proxy.get_kernels().await {
        Ok(kernels) => tracing::info!(live = kernels.len(), "kernel gateway reachable"),
        Err(e) => tracing::warn!(error = %e, "kernel gateway not reachable yet"),
    }

    shutdown_signal().await;
    shutdown.cancel();
    for task in [sweeper, reconciler].into_iter().flatten() {
        let _ = task.await;
    }

    // ── Shutdown ─────────────────────────────────────────────────────
    let cleanup = runtime.proxy.cleanup().await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    if let Err(e) = cleanup {
        tracing::error!(error = %e, "kernel sessions did not close; forcing exit");
        std::process::exit(1);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for SIGINT only");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
