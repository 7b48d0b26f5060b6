//! Transformer: the standard back-pressure-respecting processing step.
//!
//! A transformer pairs one input port with one output port and a
//! user-supplied [`Transform`] hook. For each input frame it adopts any
//! queued config snapshot, acquires an output frame from its own bounded
//! pool, runs the hook, and fans the result out. Because output frames come
//! from a bounded pool, a slow consumer naturally throttles the
//! transformer's production rate, with no flow-control messages involved.
//!
//! A hook returning `false` is a critical failure: the transformer emits
//! the end-of-stream signal on its output and stops itself. Its neighbours
//! are not stopped for it.

use crate::component::{ActorComponent, Context, Logic};
use crate::config::{ConfigInt, ConfigParent};
use crate::error::PipelineResult;
use crate::frame::Frame;
use crate::pool::{FramePool, SharedFrame};

/// Name of the config leaf holding the output pool capacity.
pub const POOL_LEN: &str = "pool_len";

const DEFAULT_POOL_LEN: i64 = 3;

/// Per-frame processing hook supplied by a leaf transformer.
pub trait Transform: Send + 'static {
    /// Config nodes specific to this transform, merged into the
    /// transformer's own tree (which always carries `pool_len`).
    fn initial_config(&self) -> ConfigParent {
        ConfigParent::new()
    }

    /// Called once in the execution context before the first frame.
    fn on_start(&mut self, _config: &ConfigParent) -> PipelineResult<()> {
        Ok(())
    }

    /// Fill `out_frame` from `in_frame`. The output frame arrives already
    /// initialised with the input frame's serial number, type tag and
    /// metadata. Return `false` on an unprocessable frame.
    fn transform(&mut self, in_frame: &Frame, out_frame: &mut Frame, config: &ConfigParent)
        -> bool;
}

/// [`Logic`] adapter running a [`Transform`] behind the standard
/// input/output port pair.
pub struct TransformerLogic<T: Transform> {
    transform: T,
    pool: Option<FramePool>,
}

impl<T: Transform> TransformerLogic<T> {
    fn new(transform: T) -> Self {
        Self {
            transform,
            pool: None,
        }
    }
}

impl<T: Transform> Logic for TransformerLogic<T> {
    fn inputs(&self) -> &'static [&'static str] {
        &["input"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["output"]
    }

    fn initial_config(&self) -> ConfigParent {
        let mut cfg = self.transform.initial_config();
        cfg.insert(POOL_LEN, ConfigInt::new(DEFAULT_POOL_LEN).min(1));
        cfg
    }

    fn on_start(&mut self, ctx: &mut Context) -> PipelineResult<()> {
        ctx.update_config();
        // Pool capacity is fixed at start; later snapshots may change other
        // values but not the number of frames in flight.
        let capacity = ctx
            .config()
            .get_value(POOL_LEN)?
            .as_int()
            .unwrap_or(DEFAULT_POOL_LEN);
        self.pool = Some(FramePool::with_capacity(capacity.max(1) as usize)?);
        self.transform.on_start(ctx.config())
    }

    fn on_envelope(
        &mut self,
        _port: &str,
        frame: Option<SharedFrame>,
        ctx: &mut Context,
    ) -> PipelineResult<()> {
        let in_frame = match frame {
            Some(frame) => frame,
            None => {
                // End of stream: forward and shut down.
                ctx.send("output", None)?;
                ctx.request_stop();
                return Ok(());
            }
        };
        ctx.update_config();
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| crate::error::PipelineError::PoolFailure("pool not initialised".into()))?;
        // Blocks while the pool is exhausted; this is the backpressure point.
        let mut out_frame = pool.acquire()?;
        out_frame.initialise_from(&in_frame);
        if self.transform.transform(&in_frame, &mut out_frame, ctx.config()) {
            ctx.send("output", Some(out_frame.share()))?;
        } else {
            tracing::error!(component = %ctx.name(), "transform failed, sending end of stream");
            drop(out_frame);
            ctx.send("output", None)?;
            ctx.request_stop();
        }
        Ok(())
    }
}

/// A transformer component.
pub type Transformer<T> = ActorComponent<TransformerLogic<T>>;

/// Build a transformer component around `transform`.
pub fn transformer<T: Transform>(name: impl Into<String>, transform: T) -> Transformer<T> {
    ActorComponent::new(name, TransformerLogic::new(transform))
}
