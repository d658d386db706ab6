// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod args;
mod drivers;
mod pipeline;
mod server;

use crate::args::{CmdArgs, Parser};
use crate::drivers::kernel::KernelDriver;
use crate::pipeline::{MissPipelineFactory, PacketPool};
use crate::server::UnixTransport;
use concurrency::sync::Arc;
use concurrency::sync::atomic::{AtomicBool, Ordering};
use concurrency::thread;
use control::{ControlService, InterfaceProvider};
use datapath::DatapathRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Packets kept for controller round-trips.
const PACKET_POOL_SIZE: usize = 256;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[allow(clippy::expect_used)]
fn main() {
    init_logging();
    info!("starting ofdpd...");

    let args = CmdArgs::parse();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .expect("failed to set SIGINT handler");
    }

    let transport = match UnixTransport::bind(args.control_socket()) {
        Ok(transport) => transport,
        Err(e) => {
            error!(
                "cannot bind control socket {}: {e}",
                args.control_socket().display()
            );
            std::process::exit(1);
        }
    };

    let driver = match KernelDriver::new() {
        Ok(driver) => driver,
        Err(e) => {
            error!("cannot set the port driver up: {e}");
            std::process::exit(1);
        }
    };

    let registry = DatapathRegistry::new(
        transport.clone(),
        Arc::new(PacketPool::new(PACKET_POOL_SIZE)),
        Arc::new(MissPipelineFactory),
        Arc::new(args.switch_desc()),
    );
    let svc = ControlService::new(registry.clone(), driver.clone());

    // optional bootstrap: dp0 with the listed interfaces, no controller
    // round-trip needed
    if !args.interfaces().is_empty() {
        match registry.create_dp(Some(0), None) {
            Ok(dp) => {
                for name in args.interfaces() {
                    let attached = driver
                        .open(name)
                        .and_then(|iface| registry.attach_port(&dp, iface).map_err(|e| e.errno()));
                    match attached {
                        Ok(_) => info!("attached '{name}' to dp0"),
                        Err(e) => error!("cannot attach '{name}': {e}"),
                    }
                }
            }
            Err(e) => error!("cannot create dp0: {e}"),
        }
    }

    let server_thread = {
        let transport = transport.clone();
        let svc = svc.clone();
        let stop = stop.clone();
        thread::Builder::new()
            .name("ofdp-control".to_owned())
            .spawn(move || transport.serve(&svc, &stop))
            .expect("failed to spawn the control server")
    };

    // the receive loop runs on the main thread until SIGINT
    driver.run(&registry, &stop);

    if server_thread.join().is_err() {
        error!("control server exited by panic");
    }
    info!("shutting down ofdpd");
}
