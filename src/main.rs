// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use kube::Client;
use multus::{
    cli::{CleanupArgs, Cli, Command, RunArgs, RunSummary, ValidationCommand},
    mover::{Mover, MoverConfig},
    validation::{
        ConfigTemplate, KubeTestResources, TestNetworks, ValidationError, ValidationTest,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("multus")
        .enable_all()
        .build()?;

    let code = runtime.block_on(async_main(cli))?;
    drop(runtime);
    std::process::exit(code)
}

fn init_tracing() {
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level.
    // RUST_LOG_FORMAT=json switches to JSON output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

/// Returns the process exit code.
async fn async_main(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Mover => {
            init_tracing();
            run_mover().await?;
            Ok(0)
        }
        // Templates go to stdout untouched
        Command::Validation {
            command: ValidationCommand::Config { template },
        } => Ok(print_config_template(template)),
        Command::Validation {
            command: ValidationCommand::Run(args),
        } => {
            init_tracing();
            run_validation(&args).await
        }
        Command::Validation {
            command: ValidationCommand::Cleanup(args),
        } => {
            init_tracing();
            run_cleanup(&args).await
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let sigterm = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, initiating graceful shutdown...");
            }
            () = sigterm => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        token.cancel();
    });
}

async fn run_mover() -> Result<()> {
    info!("Starting multus interface mover");
    let config = MoverConfig::from_env()?;
    debug!(node = %config.node_name, namespace = %config.namespace, "Mover configuration loaded");

    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let token = CancellationToken::new();
    cancel_on_shutdown_signal(token.clone());

    if let Err(e) = Mover::new(config).run(client, token).await {
        error!(error = %e, "CRITICAL: multus mover exited with an error");
        return Err(e.into());
    }
    info!("multus mover stopped");
    Ok(())
}

fn print_config_template(template: ConfigTemplate) -> i32 {
    match template.config().to_yaml() {
        Ok(yaml) => {
            print!("{yaml}");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

async fn run_validation(args: &RunArgs) -> Result<i32> {
    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => return Ok(invalid_config(&e)),
    };
    let networks = match TestNetworks::resolve(
        &config.public_network,
        &config.cluster_network,
        &config.namespace,
    ) {
        Ok(networks) => networks,
        Err(e) => return Ok(invalid_config(&e)),
    };

    let client = Client::try_default().await?;
    let resources = KubeTestResources::new(client, config.clone(), networks);
    let test = match ValidationTest::new(config, resources) {
        Ok(test) => test,
        Err(e) => return Ok(invalid_config(&e)),
    };

    let token = CancellationToken::new();
    cancel_on_shutdown_signal(token.clone());

    let (results, outcome) = test.run(&token).await;
    let summary = RunSummary::new(&results, &outcome);
    print!("{}", summary.output);

    if summary.clean_up && !clean_up(&test).await {
        return Ok(1);
    }
    Ok(summary.exit_code)
}

async fn run_cleanup(args: &CleanupArgs) -> Result<i32> {
    let config = args.to_config();
    let client = Client::try_default().await?;
    let resources = KubeTestResources::new(client, config.clone(), TestNetworks::default());
    let test = ValidationTest::for_cleanup(config, resources);
    Ok(if clean_up(&test).await { 0 } else { 1 })
}

async fn clean_up(test: &ValidationTest<KubeTestResources>) -> bool {
    println!(
        "cleaning up multus validation test resources in namespace {:?}",
        test.config().namespace
    );
    let (results, outcome) = test.clean_up().await;
    match outcome {
        Ok(()) => {
            println!("multus validation test resources were successfully cleaned up");
            true
        }
        Err(e) => {
            println!("multus validation test cleanup failed: {e}\n");
            println!("{}", results.suggested_debugging_report());
            false
        }
    }
}

fn invalid_config(err: &ValidationError) -> i32 {
    eprintln!("{err}");
    err.exit_code()
}
