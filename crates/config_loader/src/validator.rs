//! Settings validation
//!
//! Rules:
//! - at least one route; route names unique and non-empty
//! - bucket, queue and transform names non-empty
//! - workers >= 1, 1 <= min_attempts <= max_attempts
//! - notify targets unique per route
//! - `keep_unknown_on_queue` needs a redelivery delay, or unrouted items
//!   come straight back
//!
//! Transform ids are checked against the registry when the route table is
//! built, since the registry is assembled at runtime.

use std::collections::HashSet;

use contracts::{ContractError, PipelineBlueprint, RouteSettings, SinkSettings, StorageSettings};

/// Returns the first violation found
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_dispatcher(blueprint)?;
    validate_queue(blueprint)?;
    validate_storage(blueprint)?;
    validate_route_names(blueprint)?;
    for (idx, route) in blueprint.routes.iter().enumerate() {
        validate_route(idx, route)?;
    }
    Ok(())
}

fn validate_dispatcher(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let settings = &blueprint.dispatcher;

    if settings.workers == 0 {
        return Err(ContractError::config_validation(
            "dispatcher.workers",
            "workers must be >= 1",
        ));
    }

    if settings.min_attempts == 0 || settings.min_attempts > settings.max_attempts {
        return Err(ContractError::config_validation(
            "dispatcher.min_attempts / dispatcher.max_attempts",
            format!(
                "need 1 <= min_attempts ({}) <= max_attempts ({})",
                settings.min_attempts, settings.max_attempts
            ),
        ));
    }
    Ok(())
}

fn validate_queue(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.queue.name.is_empty() {
        return Err(ContractError::config_validation(
            "queue.name",
            "queue name cannot be empty",
        ));
    }

    if blueprint.dispatcher.keep_unknown_on_queue && blueprint.queue.redelivery_delay_secs == 0 {
        return Err(ContractError::config_validation(
            "queue.redelivery_delay_secs",
            "must be > 0 when dispatcher.keep_unknown_on_queue is set",
        ));
    }
    Ok(())
}

fn validate_storage(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if let StorageSettings::Local { root } = &blueprint.storage {
        if root.as_os_str().is_empty() {
            return Err(ContractError::config_validation(
                "storage.root",
                "local storage root cannot be empty",
            ));
        }
    }
    Ok(())
}

fn validate_route_names(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.routes.is_empty() {
        return Err(ContractError::config_validation(
            "routes",
            "at least one route is required",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, route) in blueprint.routes.iter().enumerate() {
        if route.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("routes[{idx}].name"),
                "route name cannot be empty",
            ));
        }
        if !seen.insert(route.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("routes[name={}]", route.name),
                "duplicate route name",
            ));
        }
    }
    Ok(())
}

fn validate_route(idx: usize, route: &RouteSettings) -> Result<(), ContractError> {
    if route.source.bucket.is_empty() {
        return Err(ContractError::config_validation(
            format!("routes[{idx}].source.bucket"),
            "source bucket cannot be empty",
        ));
    }

    if route.transform.is_empty() {
        return Err(ContractError::config_validation(
            format!("routes[{idx}].transform"),
            "transform id cannot be empty",
        ));
    }

    let destination_empty = match &route.destination {
        SinkSettings::Bucket { bucket, .. } => bucket.is_empty(),
        SinkSettings::Noop { name } => name.is_empty(),
    };
    if destination_empty {
        return Err(ContractError::config_validation(
            format!("routes[{idx}].destination"),
            "destination name cannot be empty",
        ));
    }

    let mut seen = HashSet::new();
    for (n, target) in route.notify.iter().enumerate() {
        if target.queue.is_empty() || target.bucket.is_empty() {
            return Err(ContractError::config_validation(
                format!("routes[{idx}].notify[{n}]"),
                "notify queue and bucket cannot be empty",
            ));
        }
        if !seen.insert((&target.queue, &target.bucket)) {
            return Err(ContractError::config_validation(
                format!("routes[{idx}].notify[{n}]"),
                "duplicate notify target",
            ));
        }
    }
    Ok(())
}
