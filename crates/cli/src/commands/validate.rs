//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, SinkSettings, TransformKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    queue: String,
    route_count: usize,
    source_buckets: usize,
    workers: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating settings");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Settings validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    let blueprint = match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => blueprint,
        Err(e) => {
            return ValidationResult {
                valid: false,
                config_path,
                error: Some(e.to_string()),
                warnings: None,
                summary: None,
            }
        }
    };

    // Transform ids are only known once the registry exists
    let registry = transforms::builtin_registry();
    if let Some(route) = blueprint
        .routes
        .iter()
        .find(|route| !registry.contains(&route.transform))
    {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!(
                "route '{}' uses unknown transform '{}' (known: {})",
                route.name,
                route.transform,
                registry.ids().join(", ")
            )),
            warnings: None,
            summary: None,
        };
    }

    let warnings = collect_warnings(&blueprint);
    let source_buckets = blueprint
        .routes
        .iter()
        .map(|route| route.source.bucket.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    ValidationResult {
        valid: true,
        config_path,
        error: None,
        warnings: (!warnings.is_empty()).then_some(warnings),
        summary: Some(ConfigSummary {
            version: format!("{:?}", blueprint.version),
            queue: blueprint.queue.name.clone(),
            route_count: blueprint.routes.len(),
            source_buckets,
            workers: blueprint.dispatcher.workers,
        }),
    }
}

/// Collect settings warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    for route in &blueprint.routes {
        if route.transform_kind == TransformKind::Bulk
            && matches!(route.destination, SinkSettings::Bucket { .. })
        {
            warnings.push(format!(
                "Route '{}' is bulk but writes to a bucket - stale keys will not be reported",
                route.name
            ));
        }

        if route.source.bucket == route.destination.name() {
            warnings.push(format!(
                "Route '{}' writes back into its own source bucket",
                route.name
            ));
        }
    }

    if matches!(blueprint.storage, contracts::StorageSettings::Memory) {
        warnings.push("Memory storage starts empty and is lost on exit".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Settings are valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Queue: {}", summary.queue);
            println!("  Routes: {}", summary.route_count);
            println!("  Source buckets: {}", summary.source_buckets);
            println!("  Workers: {}", summary.workers);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Settings are invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
