// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(unused)]

pub(crate) use clap::Parser;
use std::path::PathBuf;

/// Default management socket path.
pub(crate) const DEFAULT_CONTROL_SOCKET: &str = "/var/run/ofdpd.sock";

#[derive(Parser)]
#[command(name = "ofdpd")]
#[command(version)]
#[command(about = "Userland OpenFlow 1.0 switch datapath", long_about = None)]
pub(crate) struct CmdArgs {
    /// Unix datagram socket to serve the control channel on.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: PathBuf,

    /// Create datapath 0 at startup and attach these interfaces to it.
    #[arg(long, value_name = "IFNAME")]
    interface: Vec<String>,

    /// Manufacturer description reported in DESC statistics.
    #[arg(long, value_name = "STRING", default_value = "Open Network Fabric")]
    mfr_desc: String,

    /// Hardware description reported in DESC statistics.
    #[arg(long, value_name = "STRING", default_value = "software datapath")]
    hw_desc: String,

    /// Software description reported in DESC statistics.
    #[arg(long, value_name = "STRING", default_value = env!("CARGO_PKG_VERSION"))]
    sw_desc: String,

    /// Serial number reported in DESC statistics.
    #[arg(long, value_name = "STRING", default_value = "None")]
    serial_num: String,
}

impl CmdArgs {
    pub(crate) fn control_socket(&self) -> &PathBuf {
        &self.control_socket
    }

    pub(crate) fn interfaces(&self) -> &[String] {
        &self.interface
    }

    pub(crate) fn switch_desc(&self) -> datapath::SwitchDesc {
        datapath::SwitchDesc {
            mfr_desc: self.mfr_desc.clone(),
            hw_desc: self.hw_desc.clone(),
            sw_desc: self.sw_desc.clone(),
            serial_num: self.serial_num.clone(),
        }
    }
}
