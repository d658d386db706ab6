// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-datapath maintenance worker.

use crate::dp::Datapath;
use concurrency::sync::{Arc, Weak};
use concurrency::thread;
use crossbeam_channel::RecvTimeoutError;
use std::time::Duration;
use tracing::{debug, warn};

/// Default sweep interval.
pub const MAINT_INTERVAL: Duration = Duration::from_millis(1000);

/// Handle on a running maintenance worker.
///
/// The worker wakes every interval and asks the pipeline to expire
/// timed-out flows, reporting removals on the control channel.  It holds
/// only a weak datapath reference so teardown is never kept alive by its
/// own janitor; the shutdown signal interrupts the sleep immediately.
pub struct MaintenanceWorker {
    shutdown: crossbeam_channel::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl std::fmt::Debug for MaintenanceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MaintenanceWorker")
    }
}

impl MaintenanceWorker {
    /// Spawn the worker for `dp`.
    ///
    /// # Errors
    ///
    /// Fails when the host refuses a new thread.
    pub(crate) fn start(
        dp: &Arc<Datapath>,
        interval: Duration,
    ) -> Result<MaintenanceWorker, std::io::Error> {
        let (shutdown, wakeup) = crossbeam_channel::bounded::<()>(1);
        let weak: Weak<Datapath> = Arc::downgrade(dp);
        let name = format!("dp{}-maint", dp.dp_idx());
        let handle = thread::Builder::new().name(name).spawn(move || {
            loop {
                match wakeup.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(dp) = weak.upgrade() else {
                            break;
                        };
                        sweep(&dp);
                    }
                    // shutdown signal or destroyer gone
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;
        Ok(MaintenanceWorker { shutdown, handle })
    }

    /// Wake the worker out of its sleep and wait for it to park.
    pub(crate) fn stop(self) {
        // a full ring means a signal is already pending; either way the
        // worker exits its next wait
        let _ = self.shutdown.try_send(());
        if self.handle.join().is_err() {
            warn!("maintenance worker exited by panic");
        }
    }
}

fn sweep(dp: &Arc<Datapath>) {
    let removed = dp.pipeline().expire_flows(dp);
    if removed.is_empty() {
        return;
    }
    debug!("dp{}: expired {} flows", dp.dp_idx(), removed.len());
    for flow in &removed {
        dp.notify_flow_removed(flow);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::{FakePipelineFactory, LoopbackTransport, VecBufferPool};
    use crate::registry::DatapathRegistry;

    #[test]
    fn shutdown_interrupts_the_sleep() {
        let registry = DatapathRegistry::new(
            Arc::new(LoopbackTransport::new()),
            Arc::new(VecBufferPool::new(16)),
            Arc::new(FakePipelineFactory::new()),
            Arc::default(),
        );
        registry.create_dp(Some(0), None).unwrap();
        let started = std::time::Instant::now();
        // destroy blocks on the worker join; a long interval proves the
        // shutdown send (not the timeout) woke it
        registry.destroy_dp(Some(0), None).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
