//! Compound: a wired sub-graph presenting itself as a single component.
//!
//! A compound owns a named collection of child components and a linkage
//! map binding child output ports to child input ports. `"self"` endpoints
//! connect the compound's own external ports to internal children, so the
//! whole graph satisfies the [`Component`] contract and can be nested
//! inside another compound.
//!
//! Every linkage endpoint is validated when the compound is built, and
//! cycles among child-to-child linkages are rejected outright; a frame
//! re-entering its producing component has no defined meaning here.
//!
//! Lifecycle calls fan out to every child in no particular order; no
//! topological dependency ordering is enforced.

use crate::component::{Component, ComponentState, InputPort};
use crate::config::{ConfigGrandParent, ConfigNode};
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Linkage endpoint name referring to the compound's own external ports.
pub const SELF: &str = "self";

/// One linkage: (component, output port) → (component, input port).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: (String, String),
    pub to: (String, String),
}

impl Link {
    pub fn new(
        from_component: impl Into<String>,
        from_port: impl Into<String>,
        to_component: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from: (from_component.into(), from_port.into()),
            to: (to_component.into(), to_port.into()),
        }
    }
}

/// A named graph of child components behaving as one component.
pub struct Compound {
    name: String,
    children: BTreeMap<String, Box<dyn Component>>,
    /// Compound input port → (child, child input port).
    self_inputs: BTreeMap<String, (String, String)>,
    /// Compound output port → (child, child output port).
    self_outputs: BTreeMap<String, (String, String)>,
    state: ComponentState,
}

impl Compound {
    /// Validate the linkage map against `children`, wire every binding,
    /// and wrap the result as a single component.
    pub fn new(
        name: impl Into<String>,
        children: BTreeMap<String, Box<dyn Component>>,
        links: Vec<Link>,
    ) -> PipelineResult<Self> {
        let name = name.into();
        let mut self_inputs: BTreeMap<String, (String, String)> = BTreeMap::new();
        let mut self_outputs: BTreeMap<String, (String, String)> = BTreeMap::new();
        let mut edges: Vec<(String, String)> = Vec::new();

        // First pass: validate every endpoint before wiring anything.
        for link in &links {
            let (src_c, src_p) = &link.from;
            let (dst_c, dst_p) = &link.to;
            if src_c == SELF && dst_c == SELF {
                return Err(PipelineError::Binding(format!(
                    "{name}: linkage connects self to self"
                )));
            }
            if src_c == SELF {
                let dest = lookup(&name, &children, dst_c)?;
                dest.input_port(dst_p)?;
                if self_inputs
                    .insert(src_p.clone(), (dst_c.clone(), dst_p.clone()))
                    .is_some()
                {
                    return Err(PipelineError::Binding(format!(
                        "{name}: duplicate self input port {src_p:?}"
                    )));
                }
            } else if dst_c == SELF {
                let src = lookup(&name, &children, src_c)?;
                if !src.outputs().iter().any(|p| p == src_p) {
                    return Err(PipelineError::Binding(format!(
                        "{src_c} has no output port {src_p:?}"
                    )));
                }
                if self_outputs
                    .insert(dst_p.clone(), (src_c.clone(), src_p.clone()))
                    .is_some()
                {
                    return Err(PipelineError::Binding(format!(
                        "{name}: duplicate self output port {dst_p:?}"
                    )));
                }
            } else {
                let src = lookup(&name, &children, src_c)?;
                if !src.outputs().iter().any(|p| p == src_p) {
                    return Err(PipelineError::Binding(format!(
                        "{src_c} has no output port {src_p:?}"
                    )));
                }
                let dest = lookup(&name, &children, dst_c)?;
                dest.input_port(dst_p)?;
                edges.push((src_c.clone(), dst_c.clone()));
            }
        }

        if has_cycle(&edges) {
            return Err(PipelineError::CycleDetected);
        }

        // Second pass: register each destination as a listener of its
        // source's output port.
        for link in &links {
            let (src_c, src_p) = &link.from;
            let (dst_c, dst_p) = &link.to;
            if src_c == SELF || dst_c == SELF {
                continue;
            }
            let dest = children[dst_c].input_port(dst_p)?;
            children[src_c].connect(src_p, dest)?;
        }

        tracing::info!(
            compound = %name,
            children = children.len(),
            linkages = links.len(),
            "compound wired"
        );

        Ok(Self {
            name,
            children,
            self_inputs,
            self_outputs,
            state: ComponentState::Created,
        })
    }

    pub fn child(&self, name: &str) -> Option<&dyn Component> {
        self.children.get(name).map(|c| c.as_ref())
    }

    pub fn child_names(&self) -> impl Iterator<Item = &String> {
        self.children.keys()
    }
}

fn lookup<'a>(
    compound: &str,
    children: &'a BTreeMap<String, Box<dyn Component>>,
    name: &str,
) -> PipelineResult<&'a dyn Component> {
    children
        .get(name)
        .map(|c| c.as_ref())
        .ok_or_else(|| PipelineError::Binding(format!("{compound} has no child {name:?}")))
}

/// Depth-first cycle check over child-to-child linkages.
fn has_cycle(edges: &[(String, String)]) -> bool {
    fn visit<'a>(
        node: &'a str,
        adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
        path: &mut Vec<&'a str>,
        done: &mut Vec<&'a str>,
    ) -> bool {
        if done.contains(&node) {
            return false;
        }
        if path.contains(&node) {
            return true;
        }
        path.push(node);
        for succ in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if visit(succ, adjacency, path, done) {
                return true;
            }
        }
        path.pop();
        done.push(node);
        false
    }

    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }
    let mut path = Vec::new();
    let mut done = Vec::new();
    let starts: Vec<&str> = adjacency.keys().copied().collect();
    starts
        .into_iter()
        .any(|node| visit(node, &adjacency, &mut path, &mut done))
}

impl Component for Compound {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.self_inputs.keys().cloned().collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.self_outputs.keys().cloned().collect()
    }

    fn input_port(&self, name: &str) -> PipelineResult<InputPort> {
        let (child, port) = self.self_inputs.get(name).ok_or_else(|| {
            PipelineError::Binding(format!("{} has no input port {name:?}", self.name))
        })?;
        self.children[child].input_port(port)
    }

    fn connect(&self, output: &str, dest: InputPort) -> PipelineResult<()> {
        let (child, port) = self.self_outputs.get(output).ok_or_else(|| {
            PipelineError::Binding(format!("{} has no output port {output:?}", self.name))
        })?;
        self.children[child].connect(port, dest)
    }

    /// The compound's tree is a grandparent keyed by child name. A nested
    /// compound's own grandparent is embedded as a parent-of-parents.
    fn get_config(&self) -> ConfigNode {
        let mut tree = ConfigGrandParent::new();
        for (name, child) in &self.children {
            match child.get_config() {
                ConfigNode::Parent(parent) => tree.insert(name.clone(), parent),
                ConfigNode::GrandParent(nested) => tree.insert(name.clone(), nested.flatten()),
                _ => {}
            }
        }
        ConfigNode::GrandParent(tree)
    }

    fn set_config(&self, config: ConfigNode) -> PipelineResult<()> {
        let tree = match config {
            ConfigNode::GrandParent(tree) => tree,
            ConfigNode::Parent(parent) => parent.try_into_grandparent()?,
            other => {
                return Err(PipelineError::validation(
                    &other,
                    "compound config must be a grandparent tree",
                ))
            }
        };
        for (name, subtree) in tree.into_iter() {
            let child = self
                .children
                .get(&name)
                .ok_or_else(|| PipelineError::UnknownConfigItem(name.clone()))?;
            child.set_config(ConfigNode::Parent(subtree))?;
        }
        Ok(())
    }

    fn start(&mut self) -> PipelineResult<()> {
        if self.state != ComponentState::Created {
            return Err(PipelineError::Lifecycle {
                name: self.name.clone(),
                state: self.state.as_str(),
                operation: "start",
            });
        }
        let mut first_error = None;
        for child in self.children.values_mut() {
            if let Err(err) = child.start() {
                tracing::error!(compound = %self.name, "child failed to start: {err}");
                first_error.get_or_insert(err);
            }
        }
        self.state = ComponentState::Running;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        for child in self.children.values_mut() {
            child.stop();
        }
        match self.state {
            ComponentState::Created => self.state = ComponentState::Stopped,
            ComponentState::Running => self.state = ComponentState::Stopping,
            ComponentState::Stopping | ComponentState::Stopped => {}
        }
    }

    fn join(&mut self) {
        for child in self.children.values_mut() {
            child.join();
        }
        self.state = ComponentState::Stopped;
    }

    fn state(&self) -> ComponentState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ActorComponent, Context, Logic};
    use crate::config::{ConfigInt, ConfigParent, ConfigValue};
    use crate::error::PipelineResult;
    use crate::pool::SharedFrame;
    use std::sync::mpsc;

    /// Forwards every frame from "input" to "output", tagging it with the
    /// configured gain so tests can observe config adoption.
    struct Pass {
        tagged: Option<mpsc::Sender<i64>>,
    }

    impl Logic for Pass {
        fn inputs(&self) -> &'static [&'static str] {
            &["input"]
        }

        fn outputs(&self) -> &'static [&'static str] {
            &["output"]
        }

        fn initial_config(&self) -> ConfigParent {
            let mut cfg = ConfigParent::new();
            cfg.insert("gain", ConfigInt::new(1).min(0));
            cfg
        }

        fn on_envelope(
            &mut self,
            _port: &str,
            frame: Option<SharedFrame>,
            ctx: &mut Context,
        ) -> PipelineResult<()> {
            ctx.update_config();
            if let Some(tagged) = &self.tagged {
                let gain = ctx.config().get_value("gain")?.as_int().unwrap();
                let _ = tagged.send(gain);
            }
            let stop = frame.is_none();
            ctx.send("output", frame)?;
            if stop {
                ctx.request_stop();
            }
            Ok(())
        }
    }

    fn pass(tagged: Option<mpsc::Sender<i64>>) -> Box<dyn Component> {
        Box::new(ActorComponent::new("pass", Pass { tagged }))
    }

    fn two_stage(tagged: Option<mpsc::Sender<i64>>) -> PipelineResult<Compound> {
        let mut children: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        children.insert("head".into(), pass(tagged));
        children.insert("tail".into(), pass(None));
        Compound::new(
            "pipe",
            children,
            vec![
                Link::new(SELF, "input", "head", "input"),
                Link::new("head", "output", "tail", "input"),
                Link::new("tail", "output", SELF, "output"),
            ],
        )
    }

    #[test]
    fn test_unknown_child_is_a_binding_error() {
        let mut children: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        children.insert("head".into(), pass(None));
        let result = Compound::new(
            "pipe",
            children,
            vec![Link::new("head", "output", "ghost", "input")],
        );
        assert!(matches!(result, Err(PipelineError::Binding(_))));
    }

    #[test]
    fn test_unknown_port_is_a_binding_error() {
        let mut children: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        children.insert("head".into(), pass(None));
        children.insert("tail".into(), pass(None));
        let result = Compound::new(
            "pipe",
            children,
            vec![Link::new("head", "sideband", "tail", "input")],
        );
        assert!(matches!(result, Err(PipelineError::Binding(_))));
    }

    #[test]
    fn test_cycle_is_rejected_at_build_time() {
        let mut children: BTreeMap<String, Box<dyn Component>> = BTreeMap::new();
        children.insert("a".into(), pass(None));
        children.insert("b".into(), pass(None));
        let result = Compound::new(
            "loopy",
            children,
            vec![
                Link::new("a", "output", "b", "input"),
                Link::new("b", "output", "a", "input"),
            ],
        );
        assert!(matches!(result, Err(PipelineError::CycleDetected)));
    }

    #[test]
    fn test_self_ports_alias_child_ports() {
        let compound = two_stage(None).unwrap();
        assert_eq!(compound.inputs(), vec!["input".to_string()]);
        assert_eq!(compound.outputs(), vec!["output".to_string()]);
        assert!(compound.input_port("input").is_ok());
        assert!(compound.input_port("sideband").is_err());
    }

    #[test]
    fn test_config_tree_is_grandparent_keyed_by_child() {
        let compound = two_stage(None).unwrap();
        let tree = match compound.get_config() {
            ConfigNode::GrandParent(tree) => tree,
            other => panic!("expected grandparent, got {other:?}"),
        };
        let names: Vec<_> = tree.iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(names, vec!["head".to_string(), "tail".to_string()]);
        assert_eq!(
            tree.child("head").unwrap().get_value("gain").unwrap(),
            ConfigValue::Int(1)
        );
    }

    #[test]
    fn test_set_config_routes_to_each_child() {
        let (tx, gains) = mpsc::channel();
        let mut compound = two_stage(Some(tx)).unwrap();

        let mut tree = match compound.get_config() {
            ConfigNode::GrandParent(tree) => tree,
            _ => unreachable!(),
        };
        tree.child_mut("head").unwrap().set_value("gain", 7).unwrap();
        compound.set_config(ConfigNode::GrandParent(tree)).unwrap();

        compound.start().unwrap();
        let input = compound.input_port("input").unwrap();
        input.send(None);
        assert_eq!(gains.recv().unwrap(), 7);

        compound.stop();
        compound.join();
        assert_eq!(compound.state(), ComponentState::Stopped);
    }

    #[test]
    fn test_lifecycle_fans_out_to_every_child() {
        let mut compound = two_stage(None).unwrap();
        assert_eq!(compound.state(), ComponentState::Created);
        compound.start().unwrap();
        assert_eq!(compound.state(), ComponentState::Running);
        for name in ["head", "tail"] {
            assert_eq!(compound.child(name).unwrap().state(), ComponentState::Running);
        }
        compound.stop();
        compound.stop(); // idempotent
        compound.join();
        for name in ["head", "tail"] {
            assert_eq!(compound.child(name).unwrap().state(), ComponentState::Stopped);
        }
    }
}
