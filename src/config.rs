//! Hierarchical component configuration.
//!
//! Each component owns a tree of named, typed configuration nodes. Leaf
//! nodes carry a current value, a construction-time default, and type
//! specific constraints (numeric bounds, enum choices). Parent nodes group
//! leaves by name; grandparent nodes group parents (used by compounds to
//! expose one tree per child component).
//!
//! # Hot reconfiguration
//!
//! A running component never shares its live tree. External callers edit a
//! deep copy and submit it back through a snapshot queue:
//!
//! ```text
//! caller: get_config() ──► edit copy ──► set_config(copy)
//!                                             │ (FIFO channel)
//! owner:  update_config() ◄──────────────────┘  adopts last snapshot
//! ```
//!
//! The owning execution context only ever observes whole snapshots, adopted
//! at a point of its choosing (typically once per frame). Concurrent
//! `set_config` calls resolve last-enqueued-wins.

use crate::error::{PipelineError, PipelineResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Scalar value exchanged with config leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

// ── Leaf nodes ──

/// Integer configuration node with optional bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigInt {
    pub value: i64,
    pub default: i64,
    pub dynamic: bool,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ConfigInt {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            default: value,
            dynamic: false,
            min: None,
            max: None,
        }
    }

    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self.value = self.clip(self.value);
        self.default = self.value;
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self.value = self.clip(self.value);
        self.default = self.value;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Bounds-limited copy of `v`. Does not affect the current value.
    pub fn clip(&self, v: i64) -> i64 {
        let v = match self.max {
            Some(max) => v.min(max),
            None => v,
        };
        match self.min {
            Some(min) => v.max(min),
            None => v,
        }
    }

    pub fn validate(&self, v: i64) -> bool {
        self.clip(v) == v
    }

    pub fn set(&mut self, v: i64) -> PipelineResult<()> {
        if !self.validate(v) {
            return Err(PipelineError::validation(
                v,
                format!("out of range {:?}..={:?}", self.min, self.max),
            ));
        }
        self.value = v;
        Ok(())
    }
}

/// Float configuration node with optional bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFloat {
    pub value: f64,
    pub default: f64,
    pub dynamic: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ConfigFloat {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            default: value,
            dynamic: false,
            min: None,
            max: None,
        }
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self.value = self.clip(self.value);
        self.default = self.value;
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self.value = self.clip(self.value);
        self.default = self.value;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Bounds-limited copy of `v`. Does not affect the current value.
    pub fn clip(&self, v: f64) -> f64 {
        let v = match self.max {
            Some(max) => v.min(max),
            None => v,
        };
        match self.min {
            Some(min) => v.max(min),
            None => v,
        }
    }

    pub fn validate(&self, v: f64) -> bool {
        self.clip(v) == v
    }

    pub fn set(&mut self, v: f64) -> PipelineResult<()> {
        if !self.validate(v) {
            return Err(PipelineError::validation(
                v,
                format!("out of range {:?}..={:?}", self.min, self.max),
            ));
        }
        self.value = v;
        Ok(())
    }
}

/// String configuration node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStr {
    pub value: String,
    pub default: String,
    pub dynamic: bool,
}

impl ConfigStr {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            default: value.clone(),
            value,
            dynamic: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn set(&mut self, v: impl Into<String>) {
        self.value = v.into();
    }
}

/// File pathname configuration node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPath {
    pub value: PathBuf,
    pub default: PathBuf,
    pub dynamic: bool,
}

impl ConfigPath {
    pub fn new(value: impl Into<PathBuf>) -> Self {
        let value = value.into();
        Self {
            default: value.clone(),
            value,
            dynamic: false,
        }
    }

    pub fn set(&mut self, v: impl Into<PathBuf>) {
        self.value = v.into();
    }
}

/// Enum configuration node whose value is one of a list of choices.
///
/// The initial value is the first choice. When `extendable` is set, an
/// unrecognized value is appended to `choices` and then accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEnum {
    pub value: String,
    pub default: String,
    pub dynamic: bool,
    pub choices: Vec<String>,
    pub extendable: bool,
}

impl ConfigEnum {
    pub fn new(choices: &[&str]) -> Self {
        let first = choices.first().map(|s| s.to_string()).unwrap_or_default();
        Self {
            value: first.clone(),
            default: first,
            dynamic: false,
            choices: choices.iter().map(|s| s.to_string()).collect(),
            extendable: false,
        }
    }

    pub fn extendable(mut self) -> Self {
        self.extendable = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn set(&mut self, v: impl Into<String>) -> PipelineResult<()> {
        let v = v.into();
        if !self.choices.iter().any(|c| c == &v) {
            if !self.extendable {
                return Err(PipelineError::validation(
                    &v,
                    format!("not one of {:?}", self.choices),
                ));
            }
            self.choices.push(v.clone());
        }
        self.value = v;
        Ok(())
    }
}

// ── Tree nodes ──

/// A node in a configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigNode {
    Int(ConfigInt),
    Float(ConfigFloat),
    Str(ConfigStr),
    Path(ConfigPath),
    Enum(ConfigEnum),
    Parent(ConfigParent),
    GrandParent(ConfigGrandParent),
}

impl ConfigNode {
    /// Current value of a leaf node. Parent nodes have no scalar value.
    pub fn get(&self) -> Option<ConfigValue> {
        match self {
            ConfigNode::Int(n) => Some(ConfigValue::Int(n.value)),
            ConfigNode::Float(n) => Some(ConfigValue::Float(n.value)),
            ConfigNode::Str(n) => Some(ConfigValue::Str(n.value.clone())),
            ConfigNode::Path(n) => Some(ConfigValue::Str(n.value.to_string_lossy().into_owned())),
            ConfigNode::Enum(n) => Some(ConfigValue::Str(n.value.clone())),
            ConfigNode::Parent(_) | ConfigNode::GrandParent(_) => None,
        }
    }

    /// Set a leaf node's value. Rejects the value and leaves the prior one
    /// unchanged if it fails the node's validation predicate.
    pub fn set(&mut self, value: ConfigValue) -> PipelineResult<()> {
        match self {
            ConfigNode::Int(n) => match value.as_int() {
                Some(v) => n.set(v),
                None => Err(PipelineError::validation(&value, "expected an integer")),
            },
            ConfigNode::Float(n) => match value.as_float() {
                Some(v) => n.set(v),
                None => Err(PipelineError::validation(&value, "expected a float")),
            },
            ConfigNode::Str(n) => match value.as_str() {
                Some(v) => {
                    n.set(v);
                    Ok(())
                }
                None => Err(PipelineError::validation(&value, "expected a string")),
            },
            ConfigNode::Path(n) => match value.as_str() {
                Some(v) => {
                    n.set(v);
                    Ok(())
                }
                None => Err(PipelineError::validation(&value, "expected a path string")),
            },
            ConfigNode::Enum(n) => match value.as_str() {
                Some(v) => n.set(v),
                None => Err(PipelineError::validation(&value, "expected a choice string")),
            },
            ConfigNode::Parent(_) | ConfigNode::GrandParent(_) => Err(PipelineError::validation(
                &value,
                "cannot assign a scalar to a parent node",
            )),
        }
    }
}

impl From<ConfigInt> for ConfigNode {
    fn from(n: ConfigInt) -> Self {
        ConfigNode::Int(n)
    }
}

impl From<ConfigFloat> for ConfigNode {
    fn from(n: ConfigFloat) -> Self {
        ConfigNode::Float(n)
    }
}

impl From<ConfigStr> for ConfigNode {
    fn from(n: ConfigStr) -> Self {
        ConfigNode::Str(n)
    }
}

impl From<ConfigPath> for ConfigNode {
    fn from(n: ConfigPath) -> Self {
        ConfigNode::Path(n)
    }
}

impl From<ConfigEnum> for ConfigNode {
    fn from(n: ConfigEnum) -> Self {
        ConfigNode::Enum(n)
    }
}

/// Parent configuration node: a name → child mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigParent {
    children: BTreeMap<String, ConfigNode>,
}

impl ConfigParent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a child node. Replaces any existing child of the same name.
    pub fn insert(&mut self, name: impl Into<String>, node: impl Into<ConfigNode>) {
        self.children.insert(name.into(), node.into());
    }

    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut ConfigNode> {
        self.children.get_mut(name)
    }

    /// Current value of the named leaf child.
    pub fn get_value(&self, name: &str) -> PipelineResult<ConfigValue> {
        let child = self
            .children
            .get(name)
            .ok_or_else(|| PipelineError::UnknownConfigItem(name.to_string()))?;
        child
            .get()
            .ok_or_else(|| PipelineError::UnknownConfigItem(format!("{name} is not a leaf")))
    }

    /// Set the named leaf child's value.
    pub fn set_value(&mut self, name: &str, value: impl Into<ConfigValue>) -> PipelineResult<()> {
        let child = self
            .children
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownConfigItem(name.to_string()))?;
        child.set(value.into())
    }

    /// Apply each key's value to the corresponding child node.
    ///
    /// Children are independently-failing units: application stops at the
    /// first failing child and earlier assignments are not rolled back.
    pub fn set_many(&mut self, values: &BTreeMap<String, ConfigValue>) -> PipelineResult<()> {
        for (name, value) in values {
            self.set_value(name, value.clone())?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigNode)> {
        self.children.iter()
    }

    /// Reinterpret a parent-of-parents as a grandparent tree.
    ///
    /// Used when a compound's tree arrives embedded inside an enclosing
    /// compound's tree. Fails if any child is a leaf.
    pub fn try_into_grandparent(self) -> PipelineResult<ConfigGrandParent> {
        let mut tree = ConfigGrandParent::new();
        for (name, node) in self.children {
            match node {
                ConfigNode::Parent(parent) => tree.insert(name, parent),
                other => {
                    return Err(PipelineError::validation(&other, "expected a parent node"))
                }
            }
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Grandparent configuration node: a name → [`ConfigParent`] mapping.
///
/// A compound exposes one of these, keyed by child component name, so a
/// whole wired graph can be configured through a single object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigGrandParent {
    children: BTreeMap<String, ConfigParent>,
}

impl ConfigGrandParent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tree: ConfigParent) {
        self.children.insert(name.into(), tree);
    }

    pub fn child(&self, name: &str) -> Option<&ConfigParent> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> PipelineResult<&mut ConfigParent> {
        self.children
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownConfigItem(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigParent)> {
        self.children.iter()
    }

    /// Represent this tree as a parent whose children are all parent
    /// nodes, for embedding inside an enclosing compound's tree.
    pub fn flatten(&self) -> ConfigParent {
        let mut parent = ConfigParent::new();
        for (name, tree) in &self.children {
            parent.insert(name.clone(), ConfigNode::Parent(tree.clone()));
        }
        parent
    }

    /// Consume the tree, yielding each child's sub-tree.
    pub fn into_iter(self) -> impl Iterator<Item = (String, ConfigParent)> {
        self.children.into_iter()
    }
}

// ── Hot reconfiguration channel ──

/// External-caller side of a component's config exchange.
///
/// `snapshot` returns a deep copy suitable for offline editing; `submit`
/// enqueues an edited copy without ever touching the owner's live tree.
/// Writers may be on any thread; a short-lived mutex guards only the
/// staged copy that `snapshot` reads; the owning execution context never
/// takes it.
pub struct ConfigHandle {
    staged: Mutex<ConfigParent>,
    tx: Sender<ConfigParent>,
}

impl ConfigHandle {
    /// Deep copy of the most recently submitted (or initial) tree.
    pub fn snapshot(&self) -> ConfigParent {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Queue a new tree for adoption by the owning context.
    pub fn submit(&self, tree: ConfigParent) {
        {
            let mut staged = self
                .staged
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *staged = tree.clone();
        }
        // The owner may already have exited; a dead queue just means the
        // snapshot will never be adopted.
        let _ = self.tx.send(tree);
    }
}

/// Owning-context side of a component's config exchange.
pub struct ConfigOwner {
    live: ConfigParent,
    rx: Receiver<ConfigParent>,
}

impl ConfigOwner {
    /// The live tree, as of the last [`update`](Self::update).
    pub fn current(&self) -> &ConfigParent {
        &self.live
    }

    /// Drain the snapshot queue, adopting the last enqueued tree.
    ///
    /// Returns whether any adoption occurred. Call this from within the
    /// owning context before using config values, typically once per frame.
    pub fn update(&mut self) -> bool {
        let mut updated = false;
        while let Ok(tree) = self.rx.try_recv() {
            self.live = tree;
            updated = true;
        }
        updated
    }
}

/// Create a config exchange for a component owning `initial`.
pub fn config_exchange(initial: ConfigParent) -> (ConfigHandle, ConfigOwner) {
    let (tx, rx) = unbounded();
    (
        ConfigHandle {
            staged: Mutex::new(initial.clone()),
            tx,
        },
        ConfigOwner { live: initial, rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ConfigParent {
        let mut cfg = ConfigParent::new();
        cfg.insert("zlen", ConfigInt::new(100).min(1));
        cfg.insert("gain", ConfigFloat::new(1.0).min(0.0).max(8.0));
        cfg.insert("looping", ConfigEnum::new(&["off", "repeat"]));
        cfg.insert("path", ConfigPath::new("/tmp/in.png"));
        cfg
    }

    #[test]
    fn test_int_bounds() {
        let mut node = ConfigInt::new(5).min(1).max(10);
        assert!(node.set(0).is_err());
        assert!(node.set(11).is_err());
        assert_eq!(node.value, 5);
        assert!(node.set(5).is_ok());
        assert_eq!(node.value, 5);
    }

    #[test]
    fn test_int_clip_does_not_mutate() {
        let node = ConfigInt::new(5).min(1).max(10);
        assert_eq!(node.clip(42), 10);
        assert_eq!(node.clip(-3), 1);
        assert_eq!(node.value, 5);
        // validate(v) == (clip(v) == v)
        assert!(node.validate(10));
        assert!(!node.validate(11));
    }

    #[test]
    fn test_float_bounds() {
        let mut node = ConfigFloat::new(0.5).min(0.0).max(1.0);
        assert!(node.set(1.5).is_err());
        assert_eq!(node.value, 0.5);
        assert!(node.set(1.0).is_ok());
    }

    #[test]
    fn test_enum_rejects_unknown_choice() {
        let mut node = ConfigEnum::new(&["off", "on"]);
        assert!(node.set("maybe").is_err());
        assert_eq!(node.value, "off");
        assert!(node.set("on").is_ok());
        assert_eq!(node.value, "on");
    }

    #[test]
    fn test_enum_extendable_appends() {
        let mut node = ConfigEnum::new(&["off", "on"]).extendable();
        assert!(node.set("auto").is_ok());
        assert_eq!(node.value, "auto");
        assert_eq!(node.choices, vec!["off", "on", "auto"]);
    }

    #[test]
    fn test_parent_set_many_stops_at_first_failure() {
        let mut cfg = sample_tree();
        let mut values = BTreeMap::new();
        values.insert("looping".to_string(), ConfigValue::from("sideways"));
        assert!(cfg.set_many(&values).is_err());
        assert_eq!(cfg.get_value("looping").unwrap(), ConfigValue::from("off"));
    }

    #[test]
    fn test_parent_unknown_item() {
        let mut cfg = sample_tree();
        assert!(matches!(
            cfg.set_value("nope", 1),
            Err(PipelineError::UnknownConfigItem(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_values() {
        let (handle, mut owner) = config_exchange(sample_tree());
        let before = owner.current().clone();
        handle.submit(handle.snapshot());
        assert!(owner.update());
        assert_eq!(owner.current(), &before);
    }

    #[test]
    fn test_update_idempotent_drain() {
        let (handle, mut owner) = config_exchange(sample_tree());
        let mut edited = handle.snapshot();
        edited.set_value("zlen", 250).unwrap();
        handle.submit(edited);
        assert!(owner.update());
        assert!(!owner.update());
    }

    #[test]
    fn test_last_writer_wins() {
        let (handle, mut owner) = config_exchange(sample_tree());
        let mut a = handle.snapshot();
        a.set_value("zlen", 10).unwrap();
        let mut b = handle.snapshot();
        b.set_value("zlen", 20).unwrap();
        handle.submit(a);
        handle.submit(b);
        assert!(owner.update());
        assert_eq!(
            owner.current().get_value("zlen").unwrap(),
            ConfigValue::Int(20)
        );
    }

    #[test]
    fn test_snapshot_reflects_last_submit() {
        let (handle, _owner) = config_exchange(sample_tree());
        let mut edited = handle.snapshot();
        edited.set_value("gain", 2.5).unwrap();
        handle.submit(edited);
        assert_eq!(
            handle.snapshot().get_value("gain").unwrap(),
            ConfigValue::Float(2.5)
        );
    }

    #[test]
    fn test_tree_serde_roundtrip() {
        let cfg = sample_tree();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ConfigParent = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
