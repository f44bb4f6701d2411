//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Plug-provider shim contract.
//!
//! Two variants of this interface exist in practice: an instance-per-class
//! `open/close/run` form, and a class-only `maintained_iface_options` form.
//! This crate implements the class-only form.

use std::collections::BTreeMap;

use chassis_utils::RowUuid;

/// Context describing the logical port being plugged, handed to every
/// provider callback.
#[derive(Clone, Debug)]
pub struct PlugPortCtx {
    pub logical_port: String,
    pub datapath: RowUuid,
    pub options: BTreeMap<String, String>,
    pub mtu_request: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct PlugIfaceOptions {
    pub name: String,
    pub iface_type: String,
    pub options: BTreeMap<String, String>,
}

/// Class-only plug-provider interface: all operations take the port
/// context, not a provider instance.
pub trait PlugProviderClass: Send + Sync {
    fn plug_type(&self) -> &'static str;

    /// Computes the local interface that should exist for `ctx`. Called on
    /// create/update; returns the `(name, type, iface-options)` triple the
    /// vswitch interface row should carry.
    fn maintained_iface_options(&self, ctx: &PlugPortCtx) -> PlugIfaceOptions;

    /// Invoked only after the vswitch transaction commits.
    fn finish(&self, ctx: &PlugPortCtx);

    /// Invoked only after `finish`, or when the transaction is abandoned.
    fn destroy(&self, ctx: &PlugPortCtx);
}
