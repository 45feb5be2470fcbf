//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, StorageSettings};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Settings info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    queue: QueueInfo,
    storage: String,
    dispatcher: DispatcherInfo,
    routes: Vec<RouteInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transforms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    resources: Vec<String>,
}

#[derive(Serialize)]
struct QueueInfo {
    name: String,
    redelivery_delay_secs: u64,
}

#[derive(Serialize)]
struct DispatcherInfo {
    workers: usize,
    min_attempts: u32,
    max_attempts: u32,
    wait_forever: bool,
    keep_unknown_on_queue: bool,
}

#[derive(Serialize)]
struct RouteInfo {
    name: String,
    source_bucket: String,
    transform: String,
    kind: String,
    destination: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notify: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading settings info");

    if !args.config.exists() {
        anyhow::bail!("Settings file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;

    let info = build_config_info(&blueprint, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize settings info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn describe_storage(storage: &StorageSettings) -> String {
    match storage {
        StorageSettings::Memory => "memory".to_string(),
        StorageSettings::Local { root } => format!("local ({})", root.display()),
    }
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let routes = blueprint
        .routes
        .iter()
        .map(|route| RouteInfo {
            name: route.name.clone(),
            source_bucket: route.source.bucket.clone(),
            transform: route.transform.clone(),
            kind: format!("{:?}", route.transform_kind),
            destination: route.destination.name().to_string(),
            notify: if args.notify {
                route
                    .notify
                    .iter()
                    .map(|target| format!("{}/{}", target.queue, target.bucket))
                    .collect()
            } else {
                Vec::new()
            },
        })
        .collect();

    let transforms = if args.transforms {
        transforms::builtin_registry()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let mut resources: Vec<String> = blueprint.resources.keys().cloned().collect();
    resources.sort_unstable();

    let dispatcher = &blueprint.dispatcher;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        queue: QueueInfo {
            name: blueprint.queue.name.clone(),
            redelivery_delay_secs: blueprint.queue.redelivery_delay_secs,
        },
        storage: describe_storage(&blueprint.storage),
        dispatcher: DispatcherInfo {
            workers: dispatcher.workers,
            min_attempts: dispatcher.min_attempts,
            max_attempts: dispatcher.max_attempts,
            wait_forever: dispatcher.wait_forever,
            keep_unknown_on_queue: dispatcher.keep_unknown_on_queue,
        },
        routes,
        transforms,
        resources,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                ETL Dispatcher Settings                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📥 Queue");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Name: {}", info.queue.name);
    println!("   ├─ Redelivery delay: {}s", info.queue.redelivery_delay_secs);
    println!("   └─ Storage: {}", info.storage);

    let d = &info.dispatcher;
    println!("\n⚙️  Dispatcher");
    println!("   ├─ Workers: {}", d.workers);
    println!("   ├─ Attempts: quiet < {} <= warn <= {} < drop", d.min_attempts, d.max_attempts);
    println!("   ├─ Wait forever: {}", d.wait_forever);
    println!("   └─ Keep unknown on queue: {}", d.keep_unknown_on_queue);

    println!("\n🔀 Routes ({})", info.routes.len());
    for (i, route) in info.routes.iter().enumerate() {
        let is_last = i == info.routes.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {}: {} -> {} ({}, {})",
            prefix, route.name, route.source_bucket, route.destination, route.transform, route.kind
        );
        for (j, target) in route.notify.iter().enumerate() {
            let target_prefix = if j == route.notify.len() - 1 { "└─" } else { "├─" };
            println!("   {}  {} notify {}", child_prefix, target_prefix, target);
        }
    }

    if !info.transforms.is_empty() {
        println!("\n🧩 Transforms: {}", info.transforms.join(", "));
    }
    if !info.resources.is_empty() {
        println!("\n📚 Resources: {}", info.resources.join(", "));
    }

    println!();
}
