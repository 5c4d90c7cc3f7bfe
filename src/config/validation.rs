//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check route ids, patterns, methods and static targets
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Detect routes shadowed by an earlier, broader route
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Shadowing is a warning unless `routing.reject_shadowed_routes` is set;
//!   the table itself stays first-match-wins either way

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::config::schema::{GatewayConfig, StoreKind};
use crate::routing::matcher::RouteMatcher;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A later route that can never match because an earlier one covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedRoute {
    pub route: String,
    pub shadowed_by: String,
}

/// Validate a configuration, returning every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut ids = HashSet::new();
    let mut compiled: Vec<(String, RouteMatcher)> = Vec::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "route id must not be empty"));
        } else if !ids.insert(route.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate route id '{}'", route.id)));
        }
        if route.service.trim().is_empty() {
            errors.push(ValidationError::new(&field, "service must not be empty"));
        }
        if route.timeout_ms == Some(0) {
            errors.push(ValidationError::new(&field, "timeout_ms must be greater than 0"));
        }
        if let Some(target) = &route.target {
            if let Err(msg) = check_http_url(target) {
                errors.push(ValidationError::new(&field, format!("target: {}", msg)));
            }
        }
        if let Some(limit) = route.rate_limit {
            if limit.window_ms == 0 || limit.max_requests == 0 {
                errors.push(ValidationError::new(
                    &field,
                    "rate_limit window_ms and max_requests must be greater than 0",
                ));
            }
        }
        match RouteMatcher::parse(&route.path, &route.method) {
            Ok(matcher) => compiled.push((route.id.clone(), matcher)),
            Err(e) => errors.push(ValidationError::new(&field, e.to_string())),
        }
    }

    if config.routing.reject_shadowed_routes {
        for shadow in find_shadowed(&compiled) {
            errors.push(ValidationError::new(
                format!("routes.{}", shadow.route),
                format!("shadowed by earlier route '{}'", shadow.shadowed_by),
            ));
        }
    }

    let mut instances = HashSet::new();
    for (i, svc) in config.services.iter().enumerate() {
        let field = format!("services[{}]", i);
        if svc.name.trim().is_empty() || svc.id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "name and id must not be empty"));
        }
        if !instances.insert((svc.name.as_str(), svc.id.as_str())) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate instance '{}:{}'", svc.name, svc.id),
            ));
        }
        if let Err(msg) = check_http_url(&svc.url) {
            errors.push(ValidationError::new(&field, format!("url: {}", msg)));
        }
    }

    if config.registry.store == StoreKind::Redis && config.registry.redis_url.is_none() {
        errors.push(ValidationError::new("registry.redis_url", "required for the redis store"));
    }
    if config.registry.ttl_secs == 0 {
        errors.push(ValidationError::new("registry.ttl_secs", "must be greater than 0"));
    }
    if config.registry.reconcile_interval_secs == 0 || config.registry.expire_interval_secs == 0 {
        errors.push(ValidationError::new("registry", "intervals must be greater than 0"));
    }
    if config.health_check.interval_secs == 0 || config.health_check.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check", "interval and timeout must be greater than 0"));
    }
    if config.health_check.max_concurrent_probes == 0 {
        errors.push(ValidationError::new(
            "health_check.max_concurrent_probes",
            "must be greater than 0",
        ));
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be greater than 0"));
    }
    if config.circuit_breaker.half_open_max_requests == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_requests",
            "must be greater than 0",
        ));
    }
    if config.timeouts.route_ms == 0 {
        errors.push(ValidationError::new("timeouts.route_ms", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Routes that are entirely covered by an earlier route in the list.
pub fn shadowed_routes(config: &GatewayConfig) -> Vec<ShadowedRoute> {
    let compiled: Vec<(String, RouteMatcher)> = config
        .routes
        .iter()
        .filter_map(|r| {
            RouteMatcher::parse(&r.path, &r.method)
                .ok()
                .map(|m| (r.id.clone(), m))
        })
        .collect();
    find_shadowed(&compiled)
}

fn find_shadowed(compiled: &[(String, RouteMatcher)]) -> Vec<ShadowedRoute> {
    let mut shadowed = Vec::new();
    for (i, (id, matcher)) in compiled.iter().enumerate() {
        if let Some((earlier, _)) = compiled[..i].iter().find(|(_, m)| m.shadows(matcher)) {
            shadowed.push(ShadowedRoute {
                route: id.clone(),
                shadowed_by: earlier.clone(),
            });
        }
    }
    shadowed
}

fn check_http_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("'{}' is not a valid URL: {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
