// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port drivers.

pub mod kernel;
