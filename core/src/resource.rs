//! Generic resource framework.
//!
//! # Design
//! Every resource type (user, loan, ...) is described by a `ResourceConfig`:
//! how to build its path from identifiers, which JSON field holds its
//! identifier, which transport to use, and which child collections hang off
//! it. Configs live in a `Registry` keyed by `ResourceKind`. The registry is
//! mutable while the client is being set up and is frozen behind an `Arc`
//! afterwards; every `Resource` instance keeps a handle to it so it can fetch
//! children of other kinds.
//!
//! A `Resource` owns its sub-resource cache outright. Children never point
//! back at their parent, so there are no reference cycles. Cache-filling
//! methods take `&mut self`: two overlapping loads of the same collection on
//! one instance cannot be expressed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AlmaError, Result};
use crate::merge::merge;
use crate::transport::Transport;

/// Builds a resource path from its identifiers, outermost first. Rejects an
/// identifier list that does not fit the path before anything is sent.
pub type PathFn = Arc<dyn Fn(&[&str]) -> Result<String> + Send + Sync>;

/// Builds a child collection path from the parent identifier. Path builders
/// are responsible for escaping identifiers into path segments.
pub type ChildPathFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Name of a resource type; the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind(&'static str);

impl ResourceKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// How a named child collection is fetched and indexed.
#[derive(Clone)]
pub struct ChildSpec {
    /// Resource type of every element.
    pub kind: ResourceKind,
    /// Field of the collection response holding the element array.
    pub response_field: String,
    /// Field of each element used as its key in the cache.
    pub id_field: String,
    pub path: ChildPathFn,
}

impl ChildSpec {
    pub fn new(
        kind: ResourceKind,
        response_field: &str,
        id_field: &str,
        path: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            response_field: response_field.to_string(),
            id_field: id_field.to_string(),
            path: Arc::new(path),
        }
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("kind", &self.kind)
            .field("response_field", &self.response_field)
            .field("id_field", &self.id_field)
            .finish_non_exhaustive()
    }
}

/// Per-type configuration.
#[derive(Clone)]
pub struct ResourceConfig {
    pub path: PathFn,
    pub id_field: String,
    pub transport: Option<Arc<dyn Transport>>,
    pub children: BTreeMap<String, ChildSpec>,
    /// Free-form settings, deep-merged by patches.
    pub settings: Value,
}

impl ResourceConfig {
    pub fn new(
        id_field: &str,
        path: impl Fn(&[&str]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: Arc::new(path),
            id_field: id_field.to_string(),
            transport: None,
            children: BTreeMap::new(),
            settings: Value::Object(Map::new()),
        }
    }

    pub fn with_child(mut self, name: &str, child: ChildSpec) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    pub fn path_for(&self, ids: &[&str]) -> Result<String> {
        (self.path)(ids)
    }

    /// Apply a partial configuration. Fields absent from the patch are kept.
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(path) = &patch.path {
            self.path = Arc::clone(path);
        }
        if let Some(id_field) = &patch.id_field {
            self.id_field = id_field.clone();
        }
        if let Some(transport) = &patch.transport {
            self.transport = Some(Arc::clone(transport));
        }
        for (name, child) in &patch.children {
            self.children.insert(name.clone(), child.clone());
        }
        if let Some(settings) = &patch.settings {
            merge(&mut self.settings, settings.clone());
        }
    }
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("id_field", &self.id_field)
            .field("transport", &self.transport.is_some())
            .field("children", &self.children)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A partial `ResourceConfig`.
#[derive(Clone, Default)]
pub struct ConfigPatch {
    pub path: Option<PathFn>,
    pub id_field: Option<String>,
    pub transport: Option<Arc<dyn Transport>>,
    pub children: BTreeMap<String, ChildSpec>,
    pub settings: Option<Value>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_path(
        mut self,
        path: impl Fn(&[&str]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.path = Some(Arc::new(path));
        self
    }

    pub fn with_id_field(mut self, id_field: &str) -> Self {
        self.id_field = Some(id_field.to_string());
        self
    }

    pub fn with_child(mut self, name: &str, child: ChildSpec) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// All resource types known to a client.
#[derive(Clone, Default)]
pub struct Registry {
    types: HashMap<ResourceKind, ResourceConfig>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the default configuration of `kind`.
    pub fn declare(&mut self, kind: ResourceKind, config: ResourceConfig) -> &mut Self {
        self.types.insert(kind, config);
        self
    }

    pub fn config(&self, kind: ResourceKind) -> Option<&ResourceConfig> {
        self.types.get(&kind)
    }

    fn require(&self, kind: ResourceKind) -> Result<&ResourceConfig> {
        self.config(kind)
            .ok_or_else(|| AlmaError::UnknownResource(kind.to_string()))
    }

    /// `kind` followed by every child type reachable from it, depth first,
    /// each listed once. A type listing itself (or an ancestor) as a child
    /// does not appear twice.
    pub fn reachable(&self, kind: ResourceKind) -> Result<Vec<ResourceKind>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![kind];
        while let Some(next) = pending.pop() {
            if !seen.insert(next) {
                continue;
            }
            let config = self.require(next)?;
            order.push(next);
            pending.extend(config.children.values().rev().map(|c| c.kind));
        }
        Ok(order)
    }

    /// Apply `patch` to `kind` and to every child type reachable from it,
    /// once each. Nothing is patched if any reachable kind is undeclared.
    pub fn set_config(&mut self, kind: ResourceKind, patch: &ConfigPatch) -> Result<&mut Self> {
        for target in self.reachable(kind)? {
            if let Some(config) = self.types.get_mut(&target) {
                config.apply(patch);
            }
        }
        Ok(self)
    }

    /// GET one resource of `kind`; `ids` go to its path builder in order.
    pub async fn fetch_by_id(self: &Arc<Self>, kind: ResourceKind, ids: &[&str]) -> Result<Resource> {
        let config = self.require(kind)?;
        let transport = config.transport.clone().ok_or_else(|| {
            AlmaError::Configuration(format!("no transport configured for `{kind}`"))
        })?;
        let path = config.path_for(ids)?;
        debug!(%kind, %path, "fetching resource");
        let data = transport.get(&path).await?;
        Resource::new(Arc::clone(self), kind, data, None)
    }

    /// A handle on a resource known only by identifier. No network access.
    pub fn for_id(self: &Arc<Self>, kind: ResourceKind, id: &str) -> Result<Resource> {
        Resource::for_id(Arc::clone(self), kind, id)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.types.iter()).finish()
    }
}

/// One remote resource: its JSON data plus a cache of fetched children.
#[derive(Clone)]
pub struct Resource {
    kind: ResourceKind,
    data: Map<String, Value>,
    id: String,
    config: ResourceConfig,
    registry: Arc<Registry>,
    sub_resources: HashMap<String, HashMap<String, Resource>>,
}

impl Resource {
    /// Build an instance from (possibly partial) JSON data.
    ///
    /// The instance config is a snapshot of the registered config with
    /// `overrides` applied; the registry itself is never modified.
    pub fn new(
        registry: Arc<Registry>,
        kind: ResourceKind,
        data: Value,
        overrides: Option<&ConfigPatch>,
    ) -> Result<Self> {
        let mut config = registry.require(kind)?.clone();
        if let Some(patch) = overrides {
            config.apply(patch);
        }
        let data = match data {
            Value::Object(map) => map,
            other => {
                return Err(AlmaError::UnexpectedPayload(format!(
                    "expected a JSON object for `{kind}`, got {}",
                    json_type(&other)
                )))
            }
        };
        let id = identifier(&data, &config.id_field)?;
        Ok(Self {
            kind,
            data,
            id,
            config,
            registry,
            sub_resources: HashMap::new(),
        })
    }

    /// Build an instance whose data is just `{ id_field: id }`.
    pub fn for_id(registry: Arc<Registry>, kind: ResourceKind, id: &str) -> Result<Self> {
        let id_field = registry.require(kind)?.id_field.clone();
        let mut data = Map::new();
        data.insert(id_field, Value::String(id.to_string()));
        Self::new(registry, kind, Value::Object(data), None)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Identifier, as text, copied from `data[config.id_field]`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Field of the resource data.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Cached collection for `name`, without touching the network.
    pub fn cached(&self, name: &str) -> Option<&HashMap<String, Resource>> {
        self.sub_resources.get(name)
    }

    /// The child collection `name`, fetched once and cached.
    ///
    /// A response without the collection field is an empty collection. A
    /// failed fetch leaves nothing cached.
    pub async fn sub_resource_map(&mut self, name: &str) -> Result<&HashMap<String, Resource>> {
        let child = self.child(name)?.clone();
        if self.sub_resources.contains_key(name) {
            debug!(kind = %self.kind, id = %self.id, child = name, "sub-resource cache hit");
        } else {
            let transport = self.transport()?;
            let path = (child.path)(&self.id);
            debug!(kind = %self.kind, id = %self.id, child = name, %path, "loading sub-resources");
            let response = transport.get(&path).await?;
            let map = self.collect_children(&child, response)?;
            self.sub_resources.insert(name.to_string(), map);
        }
        self.sub_resources
            .get(name)
            .ok_or_else(|| AlmaError::UnknownChild(name.to_string()))
    }

    /// One child, from the cache if present, otherwise fetched and cached.
    pub async fn sub_resource(&mut self, name: &str, id: &str) -> Result<&Resource> {
        self.child(name)?;
        let hit = self
            .sub_resources
            .get(name)
            .is_some_and(|map| map.contains_key(id));
        if hit {
            debug!(kind = %self.kind, child = name, child_id = id, "sub-resource cache hit");
            return self.cached_child(name, id);
        }
        self.sub_resource_from_api(name, id).await
    }

    /// One child, always fetched; the result replaces any cached entry.
    pub async fn sub_resource_from_api(&mut self, name: &str, id: &str) -> Result<&Resource> {
        let kind = self.child(name)?.kind;
        let fetched = self
            .registry
            .fetch_by_id(kind, &[self.id.as_str(), id])
            .await?;
        self.sub_resources
            .entry(name.to_string())
            .or_default()
            .insert(id.to_string(), fetched);
        self.cached_child(name, id)
    }

    fn child(&self, name: &str) -> Result<&ChildSpec> {
        self.config
            .children
            .get(name)
            .ok_or_else(|| AlmaError::UnknownChild(name.to_string()))
    }

    fn cached_child(&self, name: &str, id: &str) -> Result<&Resource> {
        self.sub_resources
            .get(name)
            .and_then(|map| map.get(id))
            .ok_or_else(|| AlmaError::UnknownChild(format!("{name}/{id}")))
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.config.transport.clone().ok_or_else(|| {
            AlmaError::Configuration(format!("no transport configured for `{}`", self.kind))
        })
    }

    fn collect_children(
        &self,
        child: &ChildSpec,
        mut response: Value,
    ) -> Result<HashMap<String, Resource>> {
        let items = match response.get_mut(&child.response_field).map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            // Single-element collections sometimes arrive unwrapped.
            Some(item @ Value::Object(_)) => vec![item],
            Some(other) => {
                return Err(AlmaError::UnexpectedPayload(format!(
                    "`{}` should be an array, got {}",
                    child.response_field,
                    json_type(&other)
                )))
            }
        };

        let mut map = HashMap::with_capacity(items.len());
        for item in items {
            let key = match &item {
                Value::Object(fields) => identifier(fields, &child.id_field)?,
                other => {
                    return Err(AlmaError::UnexpectedPayload(format!(
                        "`{}` element should be an object, got {}",
                        child.response_field,
                        json_type(other)
                    )))
                }
            };
            let resource = Resource::new(Arc::clone(&self.registry), child.kind, item, None)?;
            map.insert(key, resource);
        }
        Ok(map)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("data", &self.data)
            .field("cached", &self.sub_resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn identifier(data: &Map<String, Value>, field: &str) -> Result<String> {
    match data.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AlmaError::MissingIdentifier {
            field: field.to_string(),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTransport;
    use serde_json::json;
    use uuid::Uuid;

    const THING: ResourceKind = ResourceKind::new("thing");
    const PART: ResourceKind = ResourceKind::new("part");

    fn uuid() -> String {
        Uuid::new_v4().to_string()
    }

    /// A `thing` with a `parts` collection and a self-referencing `related`
    /// collection.
    fn registry(transport: &Arc<StubTransport>) -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .declare(
                THING,
                ResourceConfig::new("resource_id", |ids| Ok(format!("/things/{}", ids.join("/"))))
                    .with_child(
                        "parts",
                        ChildSpec::new(PART, "test_res", "part_id", |id| format!("/things/{id}/parts")),
                    )
                    .with_child(
                        "related",
                        ChildSpec::new(THING, "thing", "resource_id", |id| {
                            format!("/things/{id}/related")
                        }),
                    ),
            )
            .declare(
                PART,
                ResourceConfig::new("part_id", |ids| match ids {
                    [thing, part] => Ok(format!("/things/{thing}/parts/{part}")),
                    _ => Err(AlmaError::InvalidIdentifiers(format!(
                        "expected 2 identifiers, got {}",
                        ids.len()
                    ))),
                }),
            );
        let transport: Arc<dyn Transport> = transport.clone();
        registry
            .set_config(THING, &ConfigPatch::new().with_transport(transport))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn new_keeps_object_data() {
        let registry = registry(&StubTransport::new());
        let data = json!({ "thing1": uuid(), "thing2": uuid(), "resource_id": uuid() });
        let thing = Resource::new(registry, THING, data.clone(), None).unwrap();
        assert_eq!(Value::Object(thing.data().clone()), data);
        assert_eq!(thing.id(), data["resource_id"]);
    }

    #[test]
    fn for_id_wraps_identifier() {
        let registry = registry(&StubTransport::new());
        let id = uuid();
        let thing = registry.for_id(THING, &id).unwrap();
        assert_eq!(thing.id(), id);
        assert_eq!(Value::Object(thing.data().clone()), json!({ "resource_id": id }));
        assert!(thing.cached("parts").is_none());
    }

    #[test]
    fn numeric_identifier_becomes_text() {
        let registry = registry(&StubTransport::new());
        let thing = Resource::new(registry, THING, json!({ "resource_id": 42 }), None).unwrap();
        assert_eq!(thing.id(), "42");
    }

    #[test]
    fn new_rejects_missing_identifier() {
        let registry = registry(&StubTransport::new());
        let err = Resource::new(registry, THING, json!({ "other": 1 }), None).unwrap_err();
        assert!(matches!(err, AlmaError::MissingIdentifier { ref field } if field == "resource_id"));
    }

    #[test]
    fn new_rejects_non_object() {
        let registry = registry(&StubTransport::new());
        let err = Resource::new(registry, THING, json!([1, 2]), None).unwrap_err();
        assert!(matches!(err, AlmaError::UnexpectedPayload(_)));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = registry(&StubTransport::new());
        let err = registry.for_id(ResourceKind::new("nope"), "1").unwrap_err();
        assert!(matches!(err, AlmaError::UnknownResource(ref k) if k == "nope"));
    }

    #[test]
    fn instance_overrides_do_not_leak() {
        let registry = registry(&StubTransport::new());
        let patch = ConfigPatch::new().with_settings(json!({ "lang": "fr" }));
        let first = Resource::new(
            Arc::clone(&registry),
            THING,
            json!({ "resource_id": "a" }),
            Some(&patch),
        )
        .unwrap();
        let second = registry.for_id(THING, "b").unwrap();

        assert_eq!(first.config().settings, json!({ "lang": "fr" }));
        assert_eq!(second.config().settings, json!({}));
        assert_eq!(registry.config(THING).unwrap().settings, json!({}));
    }

    #[test]
    fn set_config_overwrites_and_keeps_unpatched_settings() {
        let mut registry = Registry::new();
        registry.declare(THING, ResourceConfig::new("resource_id", |_| Ok("/".to_string())));
        registry
            .set_config(
                THING,
                &ConfigPatch::new().with_settings(json!({ "a": { "x": 1, "y": 2 }, "b": 1 })),
            )
            .unwrap()
            .set_config(
                THING,
                &ConfigPatch::new()
                    .with_id_field("thing_id")
                    .with_settings(json!({ "a": { "x": 10 } })),
            )
            .unwrap();

        let config = registry.config(THING).unwrap();
        assert_eq!(config.id_field, "thing_id");
        assert_eq!(config.settings, json!({ "a": { "x": 10, "y": 2 }, "b": 1 }));
    }

    #[test]
    fn set_config_reaches_children_and_survives_self_reference() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        assert!(registry.config(THING).unwrap().transport.is_some());
        assert!(registry.config(PART).unwrap().transport.is_some());
    }

    #[test]
    fn self_referencing_kind_is_patched_once() {
        let mut registry = Registry::clone(&registry(&StubTransport::new()));
        // THING lists itself under `related`.
        assert_eq!(registry.reachable(THING).unwrap(), vec![THING, PART]);
        assert_eq!(registry.reachable(PART).unwrap(), vec![PART]);

        registry
            .set_config(THING, &ConfigPatch::new().with_settings(json!({ "tags": ["x"] })))
            .unwrap();
        assert_eq!(registry.config(THING).unwrap().settings, json!({ "tags": ["x"] }));
        assert_eq!(registry.config(PART).unwrap().settings, json!({ "tags": ["x"] }));
    }

    #[test]
    fn undeclared_child_kind_patches_nothing() {
        let ghost = ResourceKind::new("ghost");
        let mut registry = Registry::new();
        registry.declare(
            THING,
            ResourceConfig::new("resource_id", |_| Ok("/".to_string())).with_child(
                "ghosts",
                ChildSpec::new(ghost, "ghost", "ghost_id", |id| format!("/things/{id}/ghosts")),
            ),
        );
        let err = registry
            .set_config(THING, &ConfigPatch::new().with_id_field("thing_id"))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, AlmaError::UnknownResource(ref k) if k == ghost.name()));
        assert_eq!(registry.config(THING).unwrap().id_field, "resource_id");
    }

    #[test]
    fn instance_overrides_replace_path_and_children() {
        let registry = registry(&StubTransport::new());
        let patch = ConfigPatch::new()
            .with_path(|ids| Ok(format!("/archive/{}", ids.join("/"))))
            .with_child(
                "notes",
                ChildSpec::new(PART, "note", "part_id", |id| format!("/things/{id}/notes")),
            );
        let thing =
            Resource::new(Arc::clone(&registry), THING, json!({ "resource_id": "T1" }), Some(&patch))
                .unwrap();

        assert_eq!(thing.config().path_for(&["T1"]).unwrap(), "/archive/T1");
        assert_eq!(thing.config().children.len(), 3);
        assert!(registry.config(THING).unwrap().children.get("notes").is_none());
    }

    #[test]
    fn set_config_on_unknown_kind_fails() {
        let mut registry = Registry::new();
        let err = registry
            .set_config(THING, &ConfigPatch::new())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, AlmaError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn fetch_by_id_passes_every_id_to_path() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        let (a, b, c) = (uuid(), uuid(), uuid());
        transport.respond(&format!("/things/{a}/{b}/{c}"), json!({ "resource_id": a }));

        let thing = registry
            .fetch_by_id(THING, &[a.as_str(), b.as_str(), c.as_str()]).await.unwrap();
        assert_eq!(thing.id(), a);
        assert_eq!(transport.calls(), vec![format!("/things/{a}/{b}/{c}")]);
    }

    #[tokio::test]
    async fn wrong_identifier_count_sends_nothing() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        for ids in [&["T1"][..], &["T1", "P1", "X"][..]] {
            let err = registry.fetch_by_id(PART, ids).await.unwrap_err();
            assert!(matches!(err, AlmaError::InvalidIdentifiers(_)));
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_without_transport_is_configuration_error() {
        let mut registry = Registry::new();
        registry.declare(THING, ResourceConfig::new("resource_id", |_| Ok("/".to_string())));
        let registry = Arc::new(registry);
        let err = registry.fetch_by_id(THING, &["x"]).await.unwrap_err();
        assert!(matches!(err, AlmaError::Configuration(_)));
    }

    #[tokio::test]
    async fn sub_resource_map_fetches_once() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        let ids = [uuid(), uuid(), uuid()];
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "part_id": id, "thing1": uuid() }))
            .collect();
        transport.respond("/things/T1/parts", json!({ "test_res": items }));

        let mut thing = registry.for_id(THING, "T1").unwrap();
        let parts = thing.sub_resource_map("parts").await.unwrap();
        assert_eq!(parts.len(), 3);
        for id in &ids {
            assert_eq!(parts[id].id(), id);
            assert_eq!(parts[id].kind(), PART);
        }

        thing.sub_resource_map("parts").await.unwrap();
        assert_eq!(transport.calls(), vec!["/things/T1/parts".to_string()]);
    }

    #[tokio::test]
    async fn missing_or_empty_field_is_empty_map() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.respond("/things/T1/parts", json!({ "total_record_count": 0 }));
        transport.respond("/things/T2/parts", json!({ "test_res": [] }));

        for id in ["T1", "T2"] {
            let mut thing = registry.for_id(THING, id).unwrap();
            assert!(thing.sub_resource_map("parts").await.unwrap().is_empty());
            // Empty collections are cached too.
            thing.sub_resource_map("parts").await.unwrap();
        }
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn single_object_collection_is_one_element() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.respond("/things/T1/parts", json!({ "test_res": { "part_id": "P1" } }));

        let mut thing = registry.for_id(THING, "T1").unwrap();
        let parts = thing.sub_resource_map("parts").await.unwrap();
        assert_eq!(parts.keys().collect::<Vec<_>>(), vec!["P1"]);
    }

    #[tokio::test]
    async fn failed_load_leaves_cache_unloaded() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        let mut thing = registry.for_id(THING, "T1").unwrap();

        let err = thing.sub_resource_map("parts").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(thing.cached("parts").is_none());

        transport.respond("/things/T1/parts", json!({ "test_res": [{ "part_id": "P1" }] }));
        assert_eq!(thing.sub_resource_map("parts").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_child_name() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        let mut thing = registry.for_id(THING, "T1").unwrap();
        let err = thing.sub_resource_map("holds").await.unwrap_err();
        assert!(matches!(err, AlmaError::UnknownChild(ref n) if n == "holds"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn sub_resource_uses_cache_then_targeted_fetch() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.respond("/things/T1/parts", json!({ "test_res": [{ "part_id": "P1" }] }));
        transport.respond("/things/T1/parts/P2", json!({ "part_id": "P2", "extra": true }));

        let mut thing = registry.for_id(THING, "T1").unwrap();
        thing.sub_resource_map("parts").await.unwrap();

        let p1 = thing.sub_resource("parts", "P1").await.unwrap();
        assert_eq!(p1.id(), "P1");
        assert_eq!(transport.calls().len(), 1);

        let p2 = thing.sub_resource("parts", "P2").await.unwrap();
        assert_eq!(p2.get("extra"), Some(&json!(true)));
        assert_eq!(
            transport.calls(),
            vec!["/things/T1/parts".to_string(), "/things/T1/parts/P2".to_string()]
        );
        assert_eq!(thing.cached("parts").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sub_resource_without_map_creates_it() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.respond("/things/T1/parts/P1", json!({ "part_id": "P1" }));

        let mut thing = registry.for_id(THING, "T1").unwrap();
        thing.sub_resource("parts", "P1").await.unwrap();
        let cached = thing.cached("parts").unwrap();
        assert_eq!(cached.len(), 1);
        assert!(cached.contains_key("P1"));
    }

    #[tokio::test]
    async fn sub_resource_from_api_always_fetches_and_overwrites() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.respond("/things/T1/parts", json!({ "test_res": [{ "part_id": "P1", "v": 1 }] }));
        transport.respond("/things/T1/parts/P1", json!({ "part_id": "P1", "v": 2 }));

        let mut thing = registry.for_id(THING, "T1").unwrap();
        thing.sub_resource_map("parts").await.unwrap();

        let fresh = thing.sub_resource_from_api("parts", "P1").await.unwrap();
        assert_eq!(fresh.get("v"), Some(&json!(2)));
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(thing.cached("parts").unwrap()["P1"].get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn sub_resource_fetch_error_propagates() {
        let transport = StubTransport::new();
        let registry = registry(&transport);
        transport.fail("/things/T1/parts/P9", 400, "bad part");

        let mut thing = registry.for_id(THING, "T1").unwrap();
        let err = thing.sub_resource("parts", "P9").await.unwrap_err();
        assert!(matches!(err, AlmaError::Request { status: 400, ref message } if message == "bad part"));
        assert!(thing.cached("parts").is_none());
    }
}
