//! Resilient call wrapper for optional enhancement stages
//!
//! Every optional collaborator call (query expansion, HyDE, hybrid merge,
//! cross-encoder, context expansion, compression) runs through
//! [`ResilientCall`]: bounded by a timeout, raced against the caller's
//! cancellation token, and turned into a [`Degradation`] record on any
//! failure. The caller then continues on its simpler path.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Why an optional stage was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DegradationReason {
    Failed(String),
    TimedOut,
    Cancelled,
}

impl fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationReason::Failed(msg) => write!(f, "failed: {msg}"),
            DegradationReason::TimedOut => write!(f, "timed out"),
            DegradationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A stage that fell back to its simpler path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub stage: String,
    pub reason: DegradationReason,
}

impl Degradation {
    pub fn new(stage: impl Into<String>, reason: DegradationReason) -> Self {
        Self {
            stage: stage.into(),
            reason,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason == DegradationReason::Cancelled
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.stage, self.reason)
    }
}

/// One guarded call to an optional collaborator
#[derive(Debug, Clone)]
pub struct ResilientCall {
    stage: &'static str,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl ResilientCall {
    pub fn new(stage: &'static str, timeout: Duration) -> Self {
        Self {
            stage,
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &CancellationToken) -> Self {
        self.cancel = Some(cancel.clone());
        self
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Run `fut`, mapping errors, timeouts and cancellation to a logged
    /// [`Degradation`].
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, Degradation>
    where
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let outcome = match &self.cancel {
            Some(token) if token.is_cancelled() => Err(DegradationReason::Cancelled),
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(DegradationReason::Cancelled),
                    res = tokio::time::timeout(self.timeout, fut) => flatten(res),
                }
            }
            None => flatten(tokio::time::timeout(self.timeout, fut).await),
        };

        outcome.map_err(|reason| {
            tracing::warn!(stage = self.stage, reason = %reason, "optional stage degraded");
            Degradation::new(self.stage, reason)
        })
    }

    /// Run `fut`; on degradation record it and return `fallback`
    pub async fn run_or<T, E, F>(&self, fut: F, fallback: T, degraded: &mut Vec<Degradation>) -> T
    where
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match self.run(fut).await {
            Ok(value) => value,
            Err(degradation) => {
                degraded.push(degradation);
                fallback
            }
        }
    }
}

fn flatten<T, E: fmt::Display>(
    res: Result<Result<T, E>, tokio::time::error::Elapsed>,
) -> Result<T, DegradationReason> {
    match res {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DegradationReason::Failed(e.to_string())),
        Err(_) => Err(DegradationReason::TimedOut),
    }
}
