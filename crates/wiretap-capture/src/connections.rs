//! Target id to route mapping.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;
use wiretap_core::{ConnectionRoute, derive_route};

/// Routes for every attached browser target.
///
/// Entries are replaced on navigation and removed on detach.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    routes: RwLock<HashMap<String, ConnectionRoute>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the route for `target_id` showing `url`, replacing
    /// any previous entry.
    pub fn register(&self, target_id: &str, url: &str) -> ConnectionRoute {
        if let Err(e) = derive_route(url) {
            debug!(target_id, error = %e, "falling back to unknown route");
        }
        let route = ConnectionRoute::derive(target_id, url);
        let _ = self
            .routes
            .write()
            .insert(target_id.to_string(), route.clone());
        route
    }

    /// Route for `target_id`, if registered.
    pub fn get(&self, target_id: &str) -> Option<ConnectionRoute> {
        self.routes.read().get(target_id).cloned()
    }

    /// Route for `target_id`, or the `unknown` route.
    pub fn resolve(&self, target_id: &str) -> ConnectionRoute {
        self.get(target_id).unwrap_or_else(ConnectionRoute::unknown)
    }

    /// Forget `target_id`.
    pub fn remove(&self, target_id: &str) -> Option<ConnectionRoute> {
        self.routes.write().remove(target_id)
    }

    /// Number of registered targets.
    pub fn count(&self) -> usize {
        self.routes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let reg = ConnectionRegistry::new();
        let route = reg.register("ABCDEF0123456789", "https://x.com/chart/abc/");
        assert_eq!(route.route_segment, "chart_abc");
        assert_eq!(route.short_identity, "ABCDEF01");
        assert_eq!(reg.get("ABCDEF0123456789"), Some(route));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn navigation_overwrites() {
        let reg = ConnectionRegistry::new();
        let _ = reg.register("T1", "https://x.com/a");
        let _ = reg.register("T1", "https://x.com/b/c");
        assert_eq!(reg.resolve("T1").route_segment, "b_c");
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn unregistered_resolves_unknown() {
        let reg = ConnectionRegistry::new();
        let route = reg.resolve("missing");
        assert_eq!(route.route_segment, "unknown");
        assert_eq!(route.short_identity, "unknown");
    }

    #[test]
    fn malformed_url_registers_unknown_segment() {
        let reg = ConnectionRegistry::new();
        let route = reg.register("T1", "::not a url::");
        assert_eq!(route.route_segment, "unknown");
        assert_eq!(route.short_identity, "T1");
    }

    #[test]
    fn remove_forgets() {
        let reg = ConnectionRegistry::new();
        let _ = reg.register("T1", "https://x.com/");
        assert!(reg.remove("T1").is_some());
        assert!(reg.remove("T1").is_none());
        assert_eq!(reg.count(), 0);
    }
}
