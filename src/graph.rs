//! Saved graph descriptions and the component-factory registry.
//!
//! A [`GraphSpec`] is the persisted shape of a pipeline: a component table
//! mapping name → {kind, config snapshot, editor placement} and a linkage
//! table. Specs are plain data, serialized as JSON. Loading one resolves
//! each kind through a [`ComponentRegistry`] and fails with an explicit
//! error for unknown kinds. Loaded text is never executed.

use crate::component::Component;
use crate::compound::{Compound, Link};
use crate::config::{ConfigNode, ConfigValue};
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One entry in a saved graph's component table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Fixed kind identifier resolved through the registry.
    pub kind: String,
    /// Leaf config values applied to the component's tree after creation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, ConfigValue>,
    /// Editor placement. Meaningless to the runtime, preserved for tools.
    #[serde(default)]
    pub position: (f32, f32),
}

impl ComponentSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: BTreeMap::new(),
            position: (0.0, 0.0),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// The persisted shape of a pipeline graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub components: BTreeMap<String, ComponentSpec>,
    pub linkages: Vec<Link>,
}

impl GraphSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, name: impl Into<String>, spec: ComponentSpec) {
        self.components.insert(name.into(), spec);
    }

    pub fn add_link(&mut self, link: Link) {
        self.linkages.push(link);
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Instantiate every component through `registry`, apply each config
    /// snapshot, and wire the linkage table into a [`Compound`].
    pub fn build(&self, name: impl Into<String>, registry: &ComponentRegistry)
        -> PipelineResult<Compound> {
        let mut children: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        for (comp_name, spec) in &self.components {
            let component = registry.create(&spec.kind)?;
            if !spec.config.is_empty() {
                let mut tree = match component.get_config() {
                    ConfigNode::Parent(tree) => tree,
                    other => {
                        return Err(PipelineError::validation(
                            &other,
                            format!("{comp_name}: expected a parent config tree"),
                        ))
                    }
                };
                tree.set_many(&spec.config)?;
                component.set_config(ConfigNode::Parent(tree))?;
            }
            children.insert(comp_name.clone(), component);
        }
        Compound::new(name, children, self.linkages.clone())
    }
}

type ComponentFactory = Box<dyn Fn() -> Box<dyn Component> + Send + Sync>;

/// Kind identifier → component factory.
///
/// A registry lookup cannot run arbitrary code, and a stale kind name in a
/// saved file turns into a clean error instead of an exception from deep
/// inside graph construction.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: BTreeMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn() -> Box<dyn Component> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn create(&self, kind: &str) -> PipelineResult<Box<dyn Component>> {
        match self.factories.get(kind) {
            Some(factory) => Ok(factory()),
            None => Err(PipelineError::UnknownComponentKind(kind.to_string())),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }
}
