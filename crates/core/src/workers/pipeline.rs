//! Linear pipeline of channel-connected stages
//!
//! Each [`Stage`] consumes a receiver and returns a new receiver. A stage owns
//! the sender of the channel it creates and must drop it once its input
//! closes (or the context ends); otherwise downstream stages never finish.
//! [`MapStage`] is a stage that honours this contract.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::panic::panic_message;

/// One step of a [`Pipeline`]
pub trait Stage<In, Out>: Send + Sync + 'static {
    /// Name used in logs and [`Pipeline::stage_names`]
    fn name(&self) -> &str;

    /// Start processing `input`, returning the stage's output channel.
    ///
    /// Implementations spawn their own task(s) and must close the returned
    /// channel once `input` is exhausted or `ctx` is done.
    fn process(&self, ctx: Context, input: mpsc::Receiver<In>) -> mpsc::Receiver<Out>;
}

type Compose<In, Out> =
    Box<dyn Fn(Context, mpsc::Receiver<In>) -> mpsc::Receiver<Out> + Send + Sync + 'static>;

/// Chain of stages from `In` to `Out`
pub struct Pipeline<In, Out> {
    names: Vec<String>,
    compose: Compose<In, Out>,
}

impl<In, Out> fmt::Debug for Pipeline<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.names).finish()
    }
}

impl<T: Send + 'static> Pipeline<T, T> {
    /// Pipeline with no stages; `run` returns its input unchanged
    pub fn new() -> Self {
        Self { names: Vec::new(), compose: Box::new(|_ctx, input| input) }
    }
}

impl<T: Send + 'static> Default for Pipeline<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Pipeline<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Append a stage consuming this pipeline's output
    pub fn stage<Next, S>(self, stage: S) -> Pipeline<In, Next>
    where
        Next: Send + 'static,
        S: Stage<Out, Next>,
    {
        let mut names = self.names;
        names.push(stage.name().to_string());
        let upstream = self.compose;

        Pipeline {
            names,
            compose: Box::new(move |ctx: Context, input: mpsc::Receiver<In>| {
                let intermediate = upstream(ctx.clone(), input);
                stage.process(ctx, intermediate)
            }),
        }
    }

    /// Wire every stage together and return the final output channel.
    ///
    /// Stages start immediately; the caller drives the pipeline by feeding
    /// `input` and draining the returned receiver. Must be called from within
    /// a tokio runtime.
    pub fn run(&self, ctx: &Context, input: mpsc::Receiver<In>) -> mpsc::Receiver<Out> {
        debug!(stages = ?self.names, "starting pipeline");
        (self.compose)(ctx.clone(), input)
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> &[String] {
        &self.names
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Stage applying an async function to each item in order
///
/// A panicking invocation drops that item and logs it; the stage keeps
/// running.
pub struct MapStage<F> {
    name: String,
    buffer: usize,
    f: Arc<F>,
}

impl<F> fmt::Debug for MapStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStage").field("name", &self.name).field("buffer", &self.buffer).finish()
    }
}

impl<F> MapStage<F> {
    /// Create a stage whose output channel holds `buffer` items (at least 1)
    pub fn new(name: impl Into<String>, buffer: usize, f: F) -> Self {
        Self { name: name.into(), buffer: buffer.max(1), f: Arc::new(f) }
    }
}

impl<In, Out, F, Fut> Stage<In, Out> for MapStage<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, ctx: Context, mut input: mpsc::Receiver<In>) -> mpsc::Receiver<Out> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let f = Arc::clone(&self.f);
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.done() => None,
                    item = input.recv() => item,
                };
                let Some(item) = next else {
                    break;
                };

                let mapped = {
                    let f = Arc::clone(&f);
                    AssertUnwindSafe(async move { f(item).await }).catch_unwind().await
                };
                let output = match mapped {
                    Ok(output) => output,
                    Err(panic) => {
                        warn!(stage = %name, panic = %panic_message(panic), "stage dropped an item after a panic");
                        continue;
                    }
                };

                tokio::select! {
                    biased;
                    _ = ctx.done() => break,
                    sent = tx.send(output) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(stage = %name, "stage finished");
        });

        rx
    }
}
