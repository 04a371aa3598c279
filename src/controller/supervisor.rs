//! Supervision of the long-running loops.
//!
//! A failed or panicking iteration is logged and followed by a fixed pause;
//! it never ends the loop. Shutdown is cooperative and observed between
//! iterations.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};

/// Cooperative shutdown flag shared by all loops.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop to stop after its current iteration.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One iteration of a supervised loop.
#[async_trait]
pub trait LoopTask: Send {
    async fn run_once(&mut self) -> Result<()>;
}

/// Run `task` until `shutdown` is triggered.
pub async fn supervise<A, T>(name: &str, ctx: &Context<A>, shutdown: &Shutdown, task: &mut T)
where
    T: LoopTask,
{
    while !shutdown.is_triggered() {
        let result = match AssertUnwindSafe(task.run_once()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
        };

        if let Err(e) = result {
            error!(task = %name, error = %e, "Loop iteration failed");
            ctx.sleep(ctx.settings.error_backoff).await;
        }
    }
    debug!(task = %name, "Shutdown observed");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
