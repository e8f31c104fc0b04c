//! Run any of the async operations from synchronous code.

use std::future::Future;

use anyhow::{Context, Result};

/// Drive `future` to completion on a fresh current-thread runtime.
///
/// Must not be called from within a runtime. Spawned tasks, such as the
/// fan-outs of the topology controller, run on the same thread.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    Ok(runtime.block_on(future))
}
