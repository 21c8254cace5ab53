//! Advisory conflict detection across plugin declarations.
//!
//! Only declared values are inspected: routes and middleware produced by
//! factories, and base-path namespacing, are not taken into account.

use crate::plugins::contract::ZapiPlugin;
use std::collections::HashMap;

/// Collect human-readable conflicts between plugins. An empty list means none were found.
pub fn check_plugin_conflicts(plugins: &[ZapiPlugin]) -> Vec<String> {
    let mut conflicts = Vec::new();
    let mut routes: HashMap<String, &str> = HashMap::new();
    let mut middleware: HashMap<&str, &str> = HashMap::new();
    let mut entities: HashMap<&str, &str> = HashMap::new();

    for plugin in plugins {
        let id = plugin.id();

        for route in plugin.routes.declared() {
            let key = route.key();
            if let Some(owner) = routes.get(&key) {
                conflicts.push(format!(
                    "Route \"{}\" is declared by both \"{}\" and \"{}\"",
                    key, owner, id
                ));
            } else {
                routes.insert(key, id);
            }
        }

        for mw in plugin.middleware.declared() {
            let name = mw.name();
            match middleware.get(name) {
                Some(owner) => conflicts.push(format!(
                    "Middleware \"{}\" is declared by both \"{}\" and \"{}\"",
                    name, owner, id
                )),
                None => {
                    middleware.insert(name, id);
                }
            }
        }

        for name in plugin.schema.entities.keys() {
            match entities.get(name.as_str()) {
                Some(owner) => conflicts.push(format!(
                    "Entity \"{}\" is declared by both \"{}\" and \"{}\"",
                    name, owner, id
                )),
                None => {
                    entities.insert(name.as_str(), id);
                }
            }
        }
    }

    conflicts
}
