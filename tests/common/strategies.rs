//! Proptest strategies for plugin state operations and registry event
//! sequences.

use proptest::prelude::*;

/// One mutation of a cluster plugin record
#[derive(Debug, Clone)]
pub enum RecordOp {
    AddPlugin {
        node: usize,
        alloc: usize,
        healthy: bool,
    },
    DeleteNode {
        node: usize,
    },
    DeleteAlloc {
        node: usize,
        alloc: usize,
    },
}

pub fn record_op_strategy() -> impl Strategy<Value = RecordOp> {
    prop_oneof![
        3 => (0..5usize, 0..4usize, any::<bool>())
            .prop_map(|(node, alloc, healthy)| RecordOp::AddPlugin { node, alloc, healthy }),
        1 => (0..5usize).prop_map(|node| RecordOp::DeleteNode { node }),
        1 => (0..5usize, 0..4usize).prop_map(|(node, alloc)| RecordOp::DeleteAlloc { node, alloc }),
    ]
}

pub fn record_ops_strategy() -> impl Strategy<Value = Vec<RecordOp>> {
    prop::collection::vec(record_op_strategy(), 0..60)
}

/// One step in a registry history as the ingress manager sees it
#[derive(Debug, Clone)]
pub enum RegistryOp {
    Register { name: usize, alloc: usize },
    Deregister { name: usize, alloc: usize },
    Resync,
}

pub fn registry_op_strategy() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        4 => (0..3usize, 0..3usize).prop_map(|(name, alloc)| RegistryOp::Register { name, alloc }),
        3 => (0..3usize, 0..3usize).prop_map(|(name, alloc)| RegistryOp::Deregister { name, alloc }),
        1 => Just(RegistryOp::Resync),
    ]
}

pub fn registry_ops_strategy() -> impl Strategy<Value = Vec<RegistryOp>> {
    prop::collection::vec(registry_op_strategy(), 1..25)
}

pub fn node_id(node: usize) -> String {
    format!("node-{node}")
}

pub fn alloc_id(alloc: usize) -> String {
    format!("alloc-{alloc}")
}

pub fn plugin_name(name: usize) -> String {
    format!("lb-{name}")
}
