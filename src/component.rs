//! Component runtime: the actor abstraction.
//!
//! A component is a unit with named input and output ports, a config tree,
//! and a private sequential execution context: one dedicated thread draining
//! one FIFO mailbox. Calls delivered to input ports are processed strictly
//! in arrival order, never concurrently, so component logic needs no
//! internal locking. Many components run in parallel with each other.
//!
//! Output ports fan out: invoking one synchronously sends the frame to
//! every input port currently bound to it, fire-and-forget. Port dispatch
//! is an explicit name → handler registry built at construction and
//! validated when bindings are made; nothing is resolved reflectively at
//! call time.

use crate::config::{config_exchange, ConfigHandle, ConfigNode, ConfigOwner, ConfigParent};
use crate::error::{PipelineError, PipelineResult};
use crate::pool::SharedFrame;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Lifecycle state of a component.
///
/// `Created → Running → Stopping → Stopped`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl ComponentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Created => "created",
            ComponentState::Running => "running",
            ComponentState::Stopping => "stopping",
            ComponentState::Stopped => "stopped",
        }
    }
}

/// A message queued on a component's mailbox.
enum Message {
    /// An input-port call. `frame: None` is the end-of-stream signal.
    Call {
        port: String,
        frame: Option<SharedFrame>,
    },
    /// Cooperative stop request.
    Stop,
}

/// Sending side of a component's named input port.
///
/// Handed out by [`Component::input_port`] and registered into producers'
/// output fan-out lists. Sends are fire-and-forget; a send to a consumer
/// whose mailbox is gone is logged and dropped; producers are not informed
/// when a consumer stops (a known limitation of the model, left visible).
#[derive(Clone)]
pub struct InputPort {
    component: String,
    port: String,
    tx: Sender<Message>,
}

impl InputPort {
    pub fn send(&self, frame: Option<SharedFrame>) {
        let msg = Message::Call {
            port: self.port.clone(),
            frame,
        };
        if self.tx.send(msg).is_err() {
            tracing::warn!(
                component = %self.component,
                port = %self.port,
                "dropping frame for stopped consumer"
            );
        }
    }
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InputPort({}.{})", self.component, self.port)
    }
}

type OutputRegistry = Arc<Mutex<HashMap<String, Vec<InputPort>>>>;

/// The component contract: named ports, config snapshots, lifecycle.
///
/// Leaf components are [`ActorComponent`]s; a whole wired sub-graph
/// satisfies the same contract through
/// [`Compound`](crate::compound::Compound).
pub trait Component: Send {
    fn name(&self) -> &str;

    /// Declared input port names, in order.
    fn inputs(&self) -> Vec<String>;

    /// Declared output port names, in order.
    fn outputs(&self) -> Vec<String>;

    /// The sending side of a named input port, for binding.
    fn input_port(&self, name: &str) -> PipelineResult<InputPort>;

    /// Register `dest` as a listener of the named output port.
    fn connect(&self, output: &str, dest: InputPort) -> PipelineResult<()>;

    /// Bind this component's `output` to `input` of `dest`.
    fn bind(&self, output: &str, dest: &dyn Component, input: &str) -> PipelineResult<()> {
        let port = dest.input_port(input)?;
        self.connect(output, port)
    }

    /// Deep, independent copy of the current configuration, suitable for
    /// offline editing.
    fn get_config(&self) -> ConfigNode;

    /// Queue a configuration snapshot for adoption by the owning execution
    /// context. Never mutates the live tree directly.
    fn set_config(&self, config: ConfigNode) -> PipelineResult<()>;

    fn start(&mut self) -> PipelineResult<()>;

    /// Request a cooperative stop. Idempotent; safe before `start`.
    fn stop(&mut self);

    /// Block until the execution context has drained and terminated.
    fn join(&mut self);

    fn state(&self) -> ComponentState;
}

/// Execution-context handle passed to [`Logic`] hooks.
///
/// Owned by the component's private thread. Everything here is lock-free
/// from the logic's point of view except the brief registry lock taken
/// while fanning out a send.
pub struct Context {
    name: String,
    outputs: OutputRegistry,
    config: ConfigOwner,
    stop_flag: Arc<AtomicBool>,
}

impl Context {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke a named output port: synchronously send `frame` to every
    /// bound listener. Fire-and-forget; does not wait for consumers.
    pub fn send(&self, output: &str, frame: Option<SharedFrame>) -> PipelineResult<()> {
        let listeners = {
            let registry = self
                .outputs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match registry.get(output) {
                Some(listeners) => listeners.clone(),
                None => {
                    return Err(PipelineError::Binding(format!(
                        "{} has no output port {output:?}",
                        self.name
                    )))
                }
            }
        };
        for listener in &listeners {
            listener.send(frame.clone());
        }
        Ok(())
    }

    /// The live config tree, as of the last [`update_config`](Self::update_config).
    pub fn config(&self) -> &ConfigParent {
        self.config.current()
    }

    /// Adopt the last queued config snapshot, if any. Returns whether an
    /// adoption occurred. Call once per frame processed.
    pub fn update_config(&mut self) -> bool {
        self.config.update()
    }

    /// Ask the component to stop after the current unit of work.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

/// Per-frame behavior of a leaf component, run inside its private
/// execution context.
pub trait Logic: Send + 'static {
    /// Declared input port names.
    fn inputs(&self) -> &'static [&'static str];

    /// Declared output port names.
    fn outputs(&self) -> &'static [&'static str];

    /// The component's configuration tree, built once at construction.
    fn initial_config(&self) -> ConfigParent {
        ConfigParent::new()
    }

    /// Called in the execution context before the first envelope. A source
    /// component does its producing here.
    fn on_start(&mut self, _ctx: &mut Context) -> PipelineResult<()> {
        Ok(())
    }

    /// Handle one queued input-port call. `frame: None` is the end-of-
    /// stream signal. Returning an error stops the component.
    fn on_envelope(
        &mut self,
        port: &str,
        frame: Option<SharedFrame>,
        ctx: &mut Context,
    ) -> PipelineResult<()>;

    /// Called once as the execution context shuts down.
    fn on_stop(&mut self, _ctx: &mut Context) {}
}

/// A leaf component: one [`Logic`] on one dedicated thread with one FIFO
/// mailbox.
pub struct ActorComponent<L: Logic> {
    name: String,
    inputs: Vec<String>,
    output_names: Vec<String>,
    mailbox_tx: Sender<Message>,
    mailbox_rx: Option<Receiver<Message>>,
    outputs: OutputRegistry,
    config_handle: ConfigHandle,
    config_owner: Option<ConfigOwner>,
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    state: ComponentState,
    logic: Option<L>,
    thread: Option<JoinHandle<()>>,
}

impl<L: Logic> ActorComponent<L> {
    pub fn new(name: impl Into<String>, logic: L) -> Self {
        let name = name.into();
        let inputs: Vec<String> = logic.inputs().iter().map(|s| s.to_string()).collect();
        let output_names: Vec<String> = logic.outputs().iter().map(|s| s.to_string()).collect();
        let registry: HashMap<String, Vec<InputPort>> = output_names
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        let (mailbox_tx, mailbox_rx) = unbounded();
        let (config_handle, config_owner) = config_exchange(logic.initial_config());
        Self {
            name,
            inputs,
            output_names,
            mailbox_tx,
            mailbox_rx: Some(mailbox_rx),
            outputs: Arc::new(Mutex::new(registry)),
            config_handle,
            config_owner: Some(config_owner),
            stop_flag: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            state: ComponentState::Created,
            logic: Some(logic),
            thread: None,
        }
    }
}

impl<L: Logic> Component for ActorComponent<L> {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn input_port(&self, name: &str) -> PipelineResult<InputPort> {
        if !self.inputs.iter().any(|p| p == name) {
            return Err(PipelineError::Binding(format!(
                "{} has no input port {name:?}",
                self.name
            )));
        }
        Ok(InputPort {
            component: self.name.clone(),
            port: name.to_string(),
            tx: self.mailbox_tx.clone(),
        })
    }

    fn connect(&self, output: &str, dest: InputPort) -> PipelineResult<()> {
        let mut registry = self
            .outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match registry.get_mut(output) {
            Some(listeners) => {
                listeners.push(dest);
                Ok(())
            }
            None => Err(PipelineError::Binding(format!(
                "{} has no output port {output:?}",
                self.name
            ))),
        }
    }

    fn get_config(&self) -> ConfigNode {
        ConfigNode::Parent(self.config_handle.snapshot())
    }

    fn set_config(&self, config: ConfigNode) -> PipelineResult<()> {
        match config {
            ConfigNode::Parent(tree) => {
                self.config_handle.submit(tree);
                Ok(())
            }
            other => Err(PipelineError::validation(
                &other,
                "component config must be a parent tree",
            )),
        }
    }

    fn start(&mut self) -> PipelineResult<()> {
        if self.state != ComponentState::Created {
            return Err(PipelineError::Lifecycle {
                name: self.name.clone(),
                state: self.state.as_str(),
                operation: "start",
            });
        }
        // A take failure cannot happen while state is Created; destructure
        // defensively anyway so a logic bug surfaces as an error.
        let (rx, owner, logic) = match (
            self.mailbox_rx.take(),
            self.config_owner.take(),
            self.logic.take(),
        ) {
            (Some(rx), Some(owner), Some(logic)) => (rx, owner, logic),
            _ => {
                return Err(PipelineError::Lifecycle {
                    name: self.name.clone(),
                    state: self.state.as_str(),
                    operation: "start",
                })
            }
        };
        let mut ctx = Context {
            name: self.name.clone(),
            outputs: self.outputs.clone(),
            config: owner,
            stop_flag: self.stop_flag.clone(),
        };
        let finished = self.finished.clone();
        let name = self.name.clone();
        self.thread = Some(std::thread::spawn(move || {
            run_actor(name, logic, &mut ctx, rx);
            finished.store(true, Ordering::SeqCst);
        }));
        self.state = ComponentState::Running;
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        match self.state {
            ComponentState::Created => {
                // Never started; nothing to drain.
                self.state = ComponentState::Stopped;
            }
            ComponentState::Running => {
                let _ = self.mailbox_tx.send(Message::Stop);
                self.state = ComponentState::Stopping;
            }
            ComponentState::Stopping | ComponentState::Stopped => {}
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(component = %self.name, "execution context panicked");
            }
        }
        self.state = ComponentState::Stopped;
    }

    fn state(&self) -> ComponentState {
        // The execution context may have finished on its own, e.g. after a
        // transform failure, without anyone calling stop() or join() yet.
        if self.finished.load(Ordering::SeqCst) {
            return ComponentState::Stopped;
        }
        self.state
    }
}

impl<L: Logic> Drop for ActorComponent<L> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.mailbox_tx.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The mailbox-drain loop run on a component's private thread.
fn run_actor<L: Logic>(name: String, mut logic: L, ctx: &mut Context, rx: Receiver<Message>) {
    tracing::info!(component = %name, "component started");
    if let Err(err) = logic.on_start(ctx) {
        tracing::error!(component = %name, "start hook failed: {err}");
        ctx.request_stop();
    }
    while !ctx.stop_requested() {
        match rx.recv() {
            Ok(Message::Call { port, frame }) => {
                if let Err(err) = logic.on_envelope(&port, frame, ctx) {
                    tracing::error!(
                        component = %name,
                        port = %port,
                        "envelope handler failed, stopping: {err}"
                    );
                    ctx.request_stop();
                }
            }
            Ok(Message::Stop) | Err(_) => break,
        }
    }
    logic.on_stop(ctx);
    tracing::info!(component = %name, "component stopped");
}
