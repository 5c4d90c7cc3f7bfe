//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Look up the first route matching a request
//! - Hold per-route static fallback targets (admin override)
//! - Swap the whole table atomically on config reload
//!
//! # Design Decisions
//! - Readers take a snapshot (`ArcSwap`) and never block writers
//! - Admin overrides live in the table, keyed by route id, so a reload racing
//!   an override cannot drop it
//! - First match wins; no specificity ranking (shadowing is reported by
//!   config validation)
//! - Explicit no-match rather than a silent default route

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::Method;
use dashmap::DashMap;
use serde::Serialize;
use url::Url;

use crate::config::RouteConfig;
use crate::error::GatewayError;
use crate::load_balancer::Strategy;
use crate::routing::matcher::RouteMatcher;

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub config: RouteConfig,
    pub matcher: RouteMatcher,
    timeout: Duration,
    configured_target: Option<Url>,
}

impl Route {
    /// Compile a route from configuration.
    pub fn compile(config: RouteConfig, default_timeout_ms: u64) -> Result<Self, GatewayError> {
        let matcher = RouteMatcher::parse(&config.path, &config.method)
            .map_err(|e| GatewayError::Configuration(format!("route '{}': {}", config.id, e)))?;

        let configured_target = config
            .target
            .as_deref()
            .map(|t| parse_target(&config.id, t))
            .transpose()?;

        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(default_timeout_ms));

        Ok(Self {
            config,
            matcher,
            timeout,
            configured_target,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Breaker key for this route: `service:route`.
    pub fn circuit_key(&self) -> String {
        format!("{}:{}", self.config.service, self.config.id)
    }

    pub fn strategy_or(&self, default: Strategy) -> Strategy {
        self.config.strategy.unwrap_or(default)
    }

    fn view(&self, target: Option<Url>) -> RouteView {
        RouteView {
            id: self.config.id.clone(),
            path: self.config.path.clone(),
            method: self.config.method.to_ascii_uppercase(),
            service: self.config.service.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
            retries: self.config.retries,
            circuit_breaker: self.config.circuit_breaker,
            circuit_key: self.circuit_key(),
            strategy: self.config.strategy,
            target: target.map(|u| u.to_string()),
        }
    }
}

fn parse_target(route_id: &str, raw: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(raw).map_err(|e| {
        GatewayError::Configuration(format!("route '{}': invalid target '{}': {}", route_id, raw, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(GatewayError::Configuration(format!(
            "route '{}': unsupported target scheme '{}'",
            route_id, other
        ))),
    }
}

/// Route as exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub id: String,
    pub path: String,
    pub method: String,
    pub service: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub circuit_breaker: bool,
    pub circuit_key: String,
    pub strategy: Option<Strategy>,
    pub target: Option<String>,
}

/// The route table.
#[derive(Debug)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<Route>>>,
    overrides: DashMap<String, Arc<Url>>,
    default_timeout_ms: u64,
}

impl RouteTable {
    /// Compile the given routes, rejecting duplicate ids and malformed patterns.
    pub fn new(configs: Vec<RouteConfig>, default_timeout_ms: u64) -> Result<Self, GatewayError> {
        let routes = compile_all(configs, default_timeout_ms)?;
        Ok(Self {
            routes: ArcSwap::from_pointee(routes),
            overrides: DashMap::new(),
            default_timeout_ms,
        })
    }

    /// First route, in registration order, matching the path and method.
    pub fn match_route(&self, path: &str, method: &Method) -> Option<Arc<Route>> {
        self.routes
            .load()
            .iter()
            .find(|r| r.matcher.matches(path, method))
            .cloned()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Route>> {
        self.routes.load().iter().find(|r| r.id() == id).cloned()
    }

    /// Snapshot of all routes.
    pub fn routes(&self) -> Arc<Vec<Arc<Route>>> {
        self.routes.load_full()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Static fallback target of a route, preferring the admin override.
    pub fn target(&self, route: &Route) -> Option<Url> {
        match self.overrides.get(route.id()) {
            Some(url) => Some((**url).clone()),
            None => route.configured_target.clone(),
        }
    }

    /// Serializable view of a route for the admin API.
    pub fn view(&self, route: &Route) -> RouteView {
        route.view(self.target(route))
    }

    pub fn views(&self) -> Vec<RouteView> {
        self.routes.load().iter().map(|r| self.view(r)).collect()
    }

    /// Override a route's static fallback target. Does not touch the registry.
    pub fn update_target(&self, id: &str, target: &str) -> Result<RouteView, GatewayError> {
        let route = self
            .get(id)
            .ok_or_else(|| GatewayError::NotFound(format!("route '{}'", id)))?;
        let url = parse_target(id, target).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        tracing::info!(route = %id, target = %url, "Route fallback target updated");
        self.overrides.insert(id.to_string(), Arc::new(url));
        Ok(self.view(&route))
    }

    /// Replace the table with a new set of routes.
    ///
    /// Target overrides carry over to routes whose id is unchanged.
    pub fn reload(&self, configs: Vec<RouteConfig>) -> Result<(), GatewayError> {
        let fresh = compile_all(configs, self.default_timeout_ms)?;
        let ids: HashSet<String> = fresh.iter().map(|r| r.id().to_string()).collect();
        let count = fresh.len();
        self.routes.store(Arc::new(fresh));
        self.overrides.retain(|id, _| ids.contains(id));
        tracing::info!(routes = count, "Route table reloaded");
        Ok(())
    }
}

fn compile_all(configs: Vec<RouteConfig>, default_timeout_ms: u64) -> Result<Vec<Arc<Route>>, GatewayError> {
    let mut seen = HashSet::new();
    let mut routes = Vec::with_capacity(configs.len());
    for config in configs {
        if !seen.insert(config.id.clone()) {
            return Err(GatewayError::Configuration(format!(
                "duplicate route id '{}'",
                config.id
            )));
        }
        routes.push(Arc::new(Route::compile(config, default_timeout_ms)?));
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(
            vec![
                RouteConfig::new("users", "/api/users/*", "backend").with_method("GET"),
                RouteConfig::new("users-any", "/api/users/*", "backend-rw"),
                RouteConfig::new("orders", "/api/orders/:id", "orders").with_timeout_ms(500),
            ],
            30_000,
        )
        .unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let t = table();
        let r = t.match_route("/api/users/1", &Method::GET).unwrap();
        assert_eq!(r.id(), "users");

        let r = t.match_route("/api/users/1", &Method::POST).unwrap();
        assert_eq!(r.id(), "users-any");

        assert!(t.match_route("/api/unknown", &Method::GET).is_none());
    }

    #[test]
    fn test_timeouts_and_keys() {
        let t = table();
        assert_eq!(t.get("orders").unwrap().timeout(), Duration::from_millis(500));
        assert_eq!(t.get("users").unwrap().timeout(), Duration::from_secs(30));
        assert_eq!(t.get("users").unwrap().circuit_key(), "backend:users");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = RouteTable::new(
            vec![
                RouteConfig::new("a", "/a/*", "svc"),
                RouteConfig::new("a", "/b/*", "svc"),
            ],
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_update_target() {
        let t = table();
        assert!(t.target(&t.get("users").unwrap()).is_none());

        let view = t.update_target("users", "http://10.1.1.1:8080").unwrap();
        assert_eq!(view.target.as_deref(), Some("http://10.1.1.1:8080/"));
        assert_eq!(
            t.target(&t.get("users").unwrap()).unwrap().as_str(),
            "http://10.1.1.1:8080/"
        );

        assert!(matches!(
            t.update_target("missing", "http://x"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            t.update_target("users", "not a url"),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_reload_keeps_overrides() {
        let t = table();
        t.update_target("users", "http://10.1.1.1:8080").unwrap();

        t.reload(vec![
            RouteConfig::new("users", "/v2/users/*", "backend"),
            RouteConfig::new("new", "/new/*", "fresh"),
        ])
        .unwrap();

        assert_eq!(t.len(), 2);
        let users = t.get("users").unwrap();
        assert_eq!(users.config.path, "/v2/users/*");
        assert!(t.target(&users).is_some());
        assert!(t.get("orders").is_none());
    }

    #[test]
    fn test_override_survives_concurrent_reloads() {
        let t = Arc::new(table());
        let configs = vec![
            RouteConfig::new("users", "/api/users/*", "backend").with_method("GET"),
            RouteConfig::new("orders", "/api/orders/:id", "orders"),
        ];

        let reloader = {
            let t = t.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    t.reload(configs.clone()).unwrap();
                }
            })
        };
        for i in 0..500 {
            t.update_target("users", &format!("http://10.0.0.{}:80", i % 250 + 1))
                .unwrap();
        }
        t.update_target("users", "http://10.9.9.9:80").unwrap();
        reloader.join().unwrap();

        assert_eq!(
            t.target(&t.get("users").unwrap()).unwrap().as_str(),
            "http://10.9.9.9/"
        );
    }

    #[test]
    fn test_reload_drops_overrides_of_removed_routes() {
        let t = table();
        t.update_target("orders", "http://10.1.1.1:8080").unwrap();
        t.reload(vec![RouteConfig::new("users", "/api/users/*", "backend")])
            .unwrap();
        t.reload(vec![RouteConfig::new("orders", "/api/orders/:id", "orders")])
            .unwrap();
        assert!(t.target(&t.get("orders").unwrap()).is_none());
    }
}
