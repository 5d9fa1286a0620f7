//! `sage-kernel kernels …`: the dashboard's kernel management actions.

use std::sync::Arc;

use sage_domain::config::Config;
use sage_kernel_proxy::NewKernel;

use crate::bootstrap;
use crate::cli::KernelsCommand;

pub async fn run(config: Arc<Config>, cmd: KernelsCommand) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(config).await?;

    match cmd {
        KernelsCommand::List { user: Some(user), json } => {
            let kernels = runtime.registry.get_available_kernels(&user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&kernels)?);
            } else if kernels.is_empty() {
                println!("no kernels available to {user}");
            } else {
                for k in &kernels {
                    println!("{}  {}", k.key, k.label);
                }
            }
        }
        KernelsCommand::List { user: None, json } => {
            let kernels = runtime.proxy.get_kernels().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&kernels)?);
            } else {
                for k in &kernels {
                    println!(
                        "{}  {:<10} {:<8} connections={}",
                        k.id,
                        k.name,
                        k.execution_state.as_deref().unwrap_or("-"),
                        k.connections.unwrap_or(0),
                    );
                }
            }
        }
        KernelsCommand::Add {
            name,
            room,
            board,
            owner,
            alias,
            private,
        } => {
            let record = runtime
                .registry
                .add_kernel(NewKernel {
                    kernel_name: name,
                    kernel_alias: alias,
                    room_id: room,
                    board_id: board,
                    owner_uuid: owner,
                    is_private: private,
                    ..Default::default()
                })
                .await?;
            println!("{}", record.kernel_id);
        }
        KernelsCommand::Delete { kernel, user } => {
            runtime.registry.delete_kernel(&kernel, &user).await?;
            println!("deleted {kernel}");
        }
        KernelsCommand::Restart { kernel } => {
            let model = runtime.proxy.restart(&kernel).await?;
            println!(
                "restarted {} ({})",
                model.id,
                model.execution_state.as_deref().unwrap_or("unknown")
            );
        }
        KernelsCommand::Specs => {
            let specs = runtime.registry.kernelspecs().await?;
            for name in specs.kernelspecs.keys() {
                let marker = if *name == specs.default { " (default)" } else { "" };
                println!("{name}{marker}");
            }
        }
    }
    Ok(())
}
