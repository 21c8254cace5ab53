//! Plugin composition
//!
//! Plugins contribute entities, routes, middleware and hooks. The application
//! reshapes them with a [`PluginExtension`]; the resolver applies it, the
//! registry orders initialization by dependency and cross-plugin references
//! are resolved lazily through [`plugin_entity`].

pub mod builder;
pub mod conflicts;
pub mod contract;
pub mod extension;
pub mod reference;
pub mod registry;
pub mod resolver;

pub use builder::PluginBuilder;
pub use conflicts::check_plugin_conflicts;
pub use contract::{
    MiddlewareSource, PluginEntityDef, PluginFactory, PluginMeta, PluginRoute, PluginSchema,
    RouteHandler, RoutesSource, ZapiPlugin,
};
pub use extension::{
    BasePath, EntityExtension, EntityRouteConfig, ExtensionBuilder, FieldOp, FieldPatch,
    PluginExtension, RouteDecision, RouteOverride,
};
pub use reference::{EntityReference, entity_ref, parse_entity_ref, plugin_entity};
pub use registry::{PluginInstance, PluginRegistry};
pub use resolver::{
    MergedPlugins, ResolvedEntityMeta, ResolvedPlugin, merge_resolved_plugins, resolve_plugin,
    resolve_plugin_with,
};
