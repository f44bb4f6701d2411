//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Node wiring: the shared context threaded through every engine node, and
//! the `Node` implementations that adapt `chassis-binding`/`chassis-flows`
//! onto `chassis-engine`'s `Node<Ctx>` trait.

use std::any::Any;
use std::collections::HashSet;

use chassis_binding::ager::{local_mac_bindings, MacBindingAger};
use chassis_binding::ctzone::CtZoneAllocator;
use chassis_binding::plug::{self, PlugRegistry};
use chassis_binding::runtime_data::RuntimeData;
use chassis_engine::{ChangeResult, Node, NodeDescriptor, NodeState};
use chassis_flows::FlowOutputBuilder;
use chassis_idl::ofctrl::OfCtrl;
use chassis_idl::ovs::OvsIdl;
use chassis_idl::plug::PlugPortCtx;
use chassis_idl::sb::SbIdl;
use chassis_utils::RowUuid;

/// Everything a node needs to do its work: the IDL handles, the OF
/// channel, and every piece of `chassis-binding`/`chassis-flows` state
/// that survives across iterations.
pub struct Ctx {
    pub chassis_id: String,
    pub sb: Box<dyn SbIdl>,
    pub ovs: Box<dyn OvsIdl>,
    pub of: Box<dyn OfCtrl>,
    pub runtime: RuntimeData,
    pub ct_zones: CtZoneAllocator,
    pub ager: MacBindingAger,
    pub plug_registry: PlugRegistry,
    pub flow_output: FlowOutputBuilder,
    pub now_ms: u64,
}

impl Ctx {
    pub fn new(chassis_id: String, sb: Box<dyn SbIdl>, ovs: Box<dyn OvsIdl>, of: Box<dyn OfCtrl>, age_threshold_ms: u64) -> Self {
        Ctx {
            chassis_id,
            sb,
            ovs,
            of,
            runtime: RuntimeData::new(),
            ct_zones: CtZoneAllocator::new(),
            ager: MacBindingAger::new(age_threshold_ms),
            plug_registry: PlugRegistry::new(),
            flow_output: FlowOutputBuilder::new(),
            now_ms: 0,
        }
    }

    /// Whether the OpenFlow channel has caught up enough for a newly
    /// claimed binding's flows to be considered installed. The real
    /// `cur_cfg`/`nb_cfg` handshake lives outside this crate's scope (no
    /// NB `nb_cfg` row is modeled here), so connectivity alone stands in
    /// for "caught up".
    fn of_caught_up(&self) -> bool {
        self.of.is_connected()
    }

    fn local_datapaths(&self) -> HashSet<RowUuid> {
        self.runtime
            .bindings()
            .filter_map(|(_, b)| self.runtime.datapaths.get(b.datapath))
            .map(|dp| dp.uuid)
            .collect()
    }
}

fn unit_any() -> &'static dyn Any {
    &()
}

/// Leaf: surfaces whether the last externally-applied SB delta carries any
/// tracked changes. The actual row data is read directly off `ctx.sb` by
/// downstream nodes; this node exists only to give the engine something to
/// force a recompute from.
#[derive(Default)]
pub struct SbNode {
    changed: bool,
}

impl Node<Ctx> for SbNode {
    fn name(&self) -> &'static str {
        "sb"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        let sb = ctx.sb.snapshot();
        self.changed = sb.datapaths.has_changes()
            || sb.port_bindings.has_changes()
            || sb.logical_flows.has_changes()
            || sb.mac_bindings.has_changes()
            || sb.address_sets.has_changes()
            || sb.port_groups.has_changes()
            || sb.multicast_groups.has_changes();
        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
    }
}

/// Leaf: surfaces whether the integration bridge's interfaces changed.
#[derive(Default)]
pub struct OvsNode {
    changed: bool,
}

impl Node<Ctx> for OvsNode {
    fn name(&self) -> &'static str {
        "ovs"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        self.changed = ctx.ovs.snapshot().interfaces.has_changes();
        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
    }
}

/// Drives the claim/release state machine and the plug-provider dispatch
/// for every locally-present binding.
#[derive(Default)]
pub struct RuntimeDataNode {
    changed: bool,
}

impl Node<Ctx> for RuntimeDataNode {
    fn name(&self) -> &'static str {
        "runtime_data"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        let of_caught_up = ctx.of_caught_up();
        let sb_writable = ctx.sb.is_writable();
        let txn = ctx
            .runtime
            .run(&ctx.chassis_id, ctx.sb.snapshot(), ctx.ovs.snapshot(), of_caught_up, sb_writable);
        self.changed = ctx.runtime.tracked().has_changes();
        if !txn.is_empty() {
            if let Err(err) = ctx.sb.commit(txn) {
                tracing::warn!(%err, "southbound commit failed, will retry next iteration");
            }
        }

        for (port, binding) in ctx.runtime.bindings() {
            let Some(pb) = ctx.sb.snapshot().port_bindings.get(binding.pb_uuid) else {
                continue;
            };
            let Some(plug_type) = pb.plug_type() else {
                continue;
            };
            let pctx = PlugPortCtx {
                logical_port: port.to_owned(),
                datapath: pb.datapath,
                options: pb.options.clone(),
                mtu_request: None,
            };
            if let Some(opts) = plug::maintained_iface_options(&ctx.plug_registry, &pctx) {
                tracing::debug!(port, iface = %opts.name, plug_type, "plug provider maintained interface");
                plug::finish(&ctx.plug_registry, &pctx);
            }
        }

        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
        // `RuntimeData::run` clears its own tracked-change record on entry,
        // so nothing else to reset here.
    }
}

/// Runs the conntrack-zone allocator over the chassis's claimed bindings
/// and persists the result to the integration bridge.
#[derive(Default)]
pub struct CtZoneNode {
    changed: bool,
}

impl Node<Ctx> for CtZoneNode {
    fn name(&self) -> &'static str {
        "ct_zones"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        let desired: Vec<String> = ctx.runtime.bindings().map(|(port, _)| port.to_owned()).collect();
        ctx.ct_zones.run(&desired);

        let to_send: Vec<String> = ctx.ct_zones.of_queued().map(|(user, _)| user.to_owned()).collect();
        for user in &to_send {
            ctx.ct_zones.mark_of_sent(user);
        }
        self.changed = !to_send.is_empty();

        if !ctx.ct_zones.pending().is_empty() {
            let snapshot = ctx.ct_zones.commit_db_queued();
            match ctx.ovs.commit_ct_zones(&snapshot) {
                Ok(()) => ctx.ct_zones.ack_commit(),
                Err(err) => {
                    tracing::warn!(%err, "ct-zone commit failed, rolling back");
                    ctx.ct_zones.rollback_commit();
                }
            }
        }

        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
    }
}

/// Runs the MAC-binding ager over this chassis's currently-present MAC
/// bindings.
#[derive(Default)]
pub struct MacAgerNode {
    changed: bool,
}

impl Node<Ctx> for MacAgerNode {
    fn name(&self) -> &'static str {
        "mac_ager"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        let local_datapaths: Vec<RowUuid> = ctx.local_datapaths().into_iter().collect();
        let bindings = local_mac_bindings(ctx.sb.snapshot(), &local_datapaths);
        let txn = ctx.ager.run(&bindings, ctx.sb.snapshot(), ctx.of.as_ref(), ctx.now_ms);
        self.changed = !txn.delete_mac_bindings.is_empty();
        if self.changed {
            if let Err(err) = ctx.sb.commit(txn) {
                tracing::warn!(%err, "mac-binding age-out commit failed");
            }
        }
        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
    }
}

/// Whether the only SB tables with pending changes are the named-set ones
/// (`address_sets`/`port_groups`), the delta `FlowOutputNode` can hand to
/// the incremental retranslation path instead of a full recompute.
fn named_set_only_delta(sb: &chassis_idl::sb::SbSnapshot) -> bool {
    let other_changed = sb.datapaths.has_changes()
        || sb.port_bindings.has_changes()
        || sb.logical_flows.has_changes()
        || sb.datapath_groups.has_changes()
        || sb.mac_bindings.has_changes()
        || sb.multicast_groups.has_changes();
    !other_changed && (sb.address_sets.has_changes() || sb.port_groups.has_changes())
}

/// Names of every address set / port group touched this iteration
/// (created, updated, or deleted).
fn changed_named_sets(sb: &chassis_idl::sb::SbSnapshot) -> Vec<String> {
    let mut names = Vec::new();
    for uuid in sb.address_sets.created().chain(sb.address_sets.updated()) {
        if let Some(row) = sb.address_sets.get(uuid) {
            names.push(row.name.clone());
        }
    }
    for (_, row) in sb.address_sets.deleted() {
        names.push(row.name.clone());
    }
    for uuid in sb.port_groups.created().chain(sb.port_groups.updated()) {
        if let Some(row) = sb.port_groups.get(uuid) {
            names.push(row.name.clone());
        }
    }
    for (_, row) in sb.port_groups.deleted() {
        names.push(row.name.clone());
    }
    names
}

/// Translates logical and physical flows and installs the resulting
/// OpenFlow table.
///
/// After the first full recompute, a delta that only touches address sets
/// or port groups is handed to the incremental retranslation path instead
/// of re-running the whole table from scratch; any other delta (or a
/// retranslation the incremental path can't account for) falls back to a
/// full run.
#[derive(Default)]
pub struct FlowOutputNode {
    changed: bool,
    ran_once: bool,
}

impl Node<Ctx> for FlowOutputNode {
    fn name(&self) -> &'static str {
        "flow_output"
    }

    fn run(&mut self, ctx: &mut Ctx) -> NodeState {
        if !ctx.of.can_put() {
            self.changed = false;
            return NodeState::Unchanged;
        }
        let local_datapaths = ctx.local_datapaths();
        let runtime = &ctx.runtime;
        let resolve_index = |uuid: RowUuid| runtime.datapaths.index_of(uuid);

        let incremental = self.ran_once && named_set_only_delta(ctx.sb.snapshot());
        let (flows, extend) = if incremental {
            let names = changed_named_sets(ctx.sb.snapshot());
            let sb = ctx.sb.snapshot_mut();
            if ctx.flow_output.handle_named_set_change(sb, &names, &resolve_index) {
                ctx.flow_output.sync_and_render(sb, &ctx.runtime)
            } else {
                ctx.flow_output.full_run(sb, &local_datapaths, &ctx.runtime, &resolve_index)
            }
        } else {
            ctx.flow_output
                .full_run(ctx.sb.snapshot_mut(), &local_datapaths, &ctx.runtime, &resolve_index)
        };
        self.ran_once = true;

        self.changed = !flows.flows.is_empty();
        if let Err(err) = ctx.of.put(flows, extend) {
            tracing::warn!(%err, "openflow install failed");
            return NodeState::Aborted;
        }
        if self.changed {
            NodeState::Updated
        } else {
            NodeState::Unchanged
        }
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {
        self.changed = false;
    }
}

/// Root: a pure aggregator so the engine has a single DFS entry point that
/// reaches every real node.
#[derive(Default)]
pub struct RootNode;

impl Node<Ctx> for RootNode {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn run(&mut self, _ctx: &mut Ctx) -> NodeState {
        NodeState::Unchanged
    }

    fn handle_change(&mut self, _input: &str, _tracked: &dyn Any, _ctx: &mut Ctx) -> ChangeResult {
        ChangeResult::Handled
    }

    fn tracked_data(&self) -> &dyn Any {
        unit_any()
    }

    fn clear_tracked_data(&mut self) {}
}

pub fn descriptors() -> Vec<NodeDescriptor<Ctx>> {
    vec![
        NodeDescriptor {
            name: "sb",
            inputs: &[],
            node: Box::new(SbNode::default()),
        },
        NodeDescriptor {
            name: "ovs",
            inputs: &[],
            node: Box::new(OvsNode::default()),
        },
        NodeDescriptor {
            name: "runtime_data",
            inputs: &["sb", "ovs"],
            node: Box::new(RuntimeDataNode::default()),
        },
        NodeDescriptor {
            name: "ct_zones",
            inputs: &["runtime_data"],
            node: Box::new(CtZoneNode::default()),
        },
        NodeDescriptor {
            name: "mac_ager",
            inputs: &["runtime_data"],
            node: Box::new(MacAgerNode::default()),
        },
        NodeDescriptor {
            name: "flow_output",
            inputs: &["sb", "runtime_data"],
            node: Box::new(FlowOutputNode::default()),
        },
        NodeDescriptor {
            name: "tick",
            inputs: &["ct_zones", "mac_ager", "flow_output"],
            node: Box::new(RootNode),
        },
    ]
}

#[cfg(test)]
mod tests {
    use chassis_engine::Engine;
    use chassis_idl::ofctrl::MemOfCtrl;
    use chassis_idl::ovs::MemOvsIdl;
    use chassis_idl::sb::MemSbIdl;

    use super::*;

    #[test]
    fn first_iteration_runs_every_node() {
        let ctx = Ctx::new(
            "chassis-1".to_owned(),
            Box::new(MemSbIdl::new()),
            Box::new(MemOvsIdl::new()),
            Box::new(MemOfCtrl::new()),
            0,
        );
        let mut engine: Engine<Ctx> = Engine::new("tick", descriptors());
        let mut ctx = ctx;
        let state = engine.run_iteration(&mut ctx);
        assert_eq!(state, NodeState::Unchanged);
    }

    #[test]
    fn claimed_binding_produces_installed_flows() {
        let mut sb_idl = MemSbIdl::new();
        let d1 = RowUuid::new_v4();
        sb_idl.snapshot.datapaths.insert(
            d1,
            chassis_idl::sb::LogicalDatapath {
                uuid: d1,
                tunnel_key: 5,
                kind: chassis_idl::sb::DatapathKind::Switch,
            },
        );
        let pb_uuid = RowUuid::new_v4();
        sb_idl.snapshot.port_bindings.insert(
            pb_uuid,
            chassis_idl::sb::PortBinding::new("p1", d1, chassis_idl::sb::PortType::Vif),
        );
        sb_idl
            .snapshot
            .port_bindings
            .update(pb_uuid, |pb| pb.requested_chassis = Some("chassis-1".to_owned()));

        let mut ovs_idl = MemOvsIdl::new();
        let iface_uuid = RowUuid::new_v4();
        ovs_idl.snapshot.interfaces.insert(
            iface_uuid,
            chassis_idl::ovs::Interface {
                uuid: iface_uuid,
                name: "p1-iface".to_owned(),
                external_ids: std::collections::BTreeMap::from([("iface-id".to_owned(), "p1".to_owned())]),
                ofport: Some(1),
            },
        );

        let mut ctx = Ctx::new(
            "chassis-1".to_owned(),
            Box::new(sb_idl),
            Box::new(ovs_idl),
            Box::new(MemOfCtrl::new()),
            0,
        );
        let mut engine: Engine<Ctx> = Engine::new("tick", descriptors());
        engine.run_iteration(&mut ctx);
        // Claim completes over two iterations: ClaimPending -> Claimed once
        // SB reflects the chassis and the OF channel has caught up.
        engine.run_iteration(&mut ctx);
        assert_eq!(
            ctx.runtime.binding("p1").map(|b| b.state),
            Some(chassis_binding::runtime_data::BindingState::Claimed)
        );
    }

    #[test]
    fn address_set_edit_retranslates_without_duplicating_the_sb_row() {
        let mut sb_idl = MemSbIdl::new();
        let as_uuid = RowUuid::new_v4();
        sb_idl.snapshot.address_sets.insert(
            as_uuid,
            chassis_idl::sb::AddressSet {
                name: "as1".to_owned(),
                addresses: vec!["10.0.0.1".to_owned()],
            },
        );
        let f1 = RowUuid::new_v4();
        sb_idl.snapshot.logical_flows.insert(
            f1,
            chassis_idl::sb::LogicalFlowRow {
                uuid: f1,
                stage: "ls_in_acl".to_owned(),
                priority: 100,
                match_: "ip4.src == $as1".to_owned(),
                actions: "next;".to_owned(),
                controller_meter: None,
                datapath: None,
                datapath_group: None,
                stage_hint: None,
            },
        );

        let mut ctx = Ctx::new(
            "chassis-1".to_owned(),
            Box::new(sb_idl),
            Box::new(MemOvsIdl::new()),
            Box::new(MemOfCtrl::new()),
            0,
        );
        let mut engine: Engine<Ctx> = Engine::new("tick", descriptors());
        engine.run_iteration(&mut ctx);
        ctx.sb.snapshot_mut().clear_tracking();
        assert_eq!(ctx.sb.snapshot().logical_flows.len(), 1);

        ctx.sb
            .snapshot_mut()
            .address_sets
            .update(as_uuid, |a| a.addresses.push("10.0.0.2".to_owned()));
        engine.run_iteration(&mut ctx);

        // A stale entry under the old match would have left the old SB row
        // in place and inserted a second row for the new one.
        assert_eq!(ctx.sb.snapshot().logical_flows.len(), 1);
        let row = ctx.sb.snapshot().logical_flows.iter().next().unwrap().1;
        assert!(row.match_.contains("10.0.0.2"), "the retranslated match must reflect the edited address set");
    }
}
