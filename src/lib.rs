//! # Pictflow: Composable Dataflow Pipelines
//!
//! A toolkit for building media-processing pipelines out of small reusable
//! components. Components own named input and output ports and run in
//! parallel, each on its own thread; frames flow between them through port
//! bindings, and a bounded frame pool keeps fast producers from racing
//! ahead of slow consumers.
//!
//! ## Architecture
//!
//! - **Components**: Actor-style units, one thread and one FIFO mailbox each
//! - **Config**: Typed trees with snapshot-based hot reconfiguration
//! - **Pool**: Bounded frame pool providing backpressure via object lifetime
//! - **Compound**: Wired sub-graphs behaving as single components
//! - **Graph**: JSON pipeline descriptions built through a factory registry
//! - **Communication**: Crossbeam channels for thread-safe frame transfer
//!
//! ## Example
//!
//! ```ignore
//! use pictflow::{
//!     compound::{Compound, Link, SELF},
//!     config::ConfigParent,
//!     frame::Frame,
//!     transformer::{transformer, Transform},
//! };
//! use std::collections::BTreeMap;
//!
//! struct Invert;
//!
//! impl Transform for Invert {
//!     fn transform(&mut self, src: &Frame, dest: &mut Frame, _cfg: &ConfigParent) -> bool {
//!         // fill dest from src ...
//!         true
//!     }
//! }
//!
//! fn main() -> pictflow::error::PipelineResult<()> {
//!     let mut children: BTreeMap<String, Box<dyn pictflow::component::Component>> =
//!         BTreeMap::new();
//!     children.insert("invert".into(), Box::new(transformer("invert", Invert)));
//!
//!     let mut pipeline = Compound::new(
//!         "pipeline",
//!         children,
//!         vec![
//!             Link::new(SELF, "input", "invert", "input"),
//!             Link::new("invert", "output", SELF, "output"),
//!         ],
//!     )?;
//!
//!     pipeline.start()?;
//!     // feed frames through pipeline.input_port("input") ...
//!     pipeline.stop();
//!     pipeline.join();
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod compound;
pub mod config;
pub mod error;
pub mod frame;
pub mod graph;
pub mod pool;
pub mod transformer;

// Re-export commonly used types
pub use component::{ActorComponent, Component, ComponentState, Context, InputPort, Logic};
pub use compound::{Compound, Link, SELF};
pub use config::{ConfigNode, ConfigParent, ConfigValue};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, Metadata, Payload};
pub use graph::{ComponentRegistry, ComponentSpec, GraphSpec};
pub use pool::{FramePool, ObjectPool, Pooled, SharedFrame};
pub use transformer::{transformer, Transform, Transformer};
