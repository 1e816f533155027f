//! Multi-step workflows with compensations.
//!
//! A [`Saga`] runs forward steps in order. Each successful step may register a
//! compensation. When a later step fails, registered compensations run in
//! reverse order; their failures are logged and never replace the step error.

use std::error::Error as StdError;
use std::fmt::Display;
use std::future::Future;

use futures::future::BoxFuture;
use tracing::{error, info, warn};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Compensation<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), BoxError>> + Send + 'a>;

/// Wrap an async undo action as a [`Compensation`].
pub fn compensation<'a, F, Fut, E>(undo: F) -> Compensation<'a>
where
    F: FnOnce() -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), E>> + Send + 'a,
    E: Into<BoxError>,
{
    Box::new(move || Box::pin(async move { undo().await.map_err(Into::into) }))
}

pub struct Saga<'a> {
    name: &'static str,
    completed: Vec<(&'static str, Compensation<'a>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            completed: Vec::new(),
        }
    }

    /// Await `forward`. On success its compensation is registered; on failure
    /// every earlier step is compensated and the error is handed back.
    pub async fn step<T, E, Fut>(
        &mut self,
        step: &'static str,
        forward: Fut,
        compensation: Option<Compensation<'a>>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match forward.await {
            Ok(value) => {
                if let Some(undo) = compensation {
                    self.completed.push((step, undo));
                }
                Ok(value)
            }
            Err(err) => {
                warn!(
                    target = "imgproc::saga",
                    saga = self.name,
                    step,
                    error = %err,
                    "saga step failed"
                );
                self.unwind().await;
                Err(err)
            }
        }
    }

    /// Number of compensations that would run if the saga unwound now.
    pub fn pending_compensations(&self) -> usize {
        self.completed.len()
    }

    /// Run all registered compensations, most recent first.
    pub async fn unwind(&mut self) {
        while let Some((step, undo)) = self.completed.pop() {
            match undo().await {
                Ok(()) => {
                    info!(
                        target = "imgproc::saga",
                        saga = self.name,
                        step,
                        "compensated step"
                    );
                    metrics::counter!(
                        "imgproc_saga_compensations_total",
                        "saga" => self.name,
                        "step" => step,
                        "outcome" => "ok"
                    )
                    .increment(1);
                }
                Err(err) => {
                    error!(
                        target = "imgproc::saga",
                        saga = self.name,
                        step,
                        error = %err,
                        "compensation failed"
                    );
                    metrics::counter!(
                        "imgproc_saga_compensations_total",
                        "saga" => self.name,
                        "step" => step,
                        "outcome" => "error"
                    )
                    .increment(1);
                }
            }
        }
    }
}
