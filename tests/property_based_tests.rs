mod common;

use common::*;
use ingress_supervisor::config::ManagerConfig;
use ingress_supervisor::dynamicplugins::{DynamicRegistry, InMemoryRegistry};
use ingress_supervisor::ingressmanager::{IngressManager, PluginManager};
use ingress_supervisor::structs::{ClusterPluginRecord, HealthSnapshot};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

type Allocations = BTreeMap<String, String>;

/// Replays a registry history against a running manager and returns the
/// registry listing, the table after the event stream drained, and the table
/// after one more full resync
fn replay_registry_history(ops: &[RegistryOp]) -> (Allocations, Allocations, Allocations) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let registry = Arc::new(InMemoryRegistry::new());
        let updater = RecordingUpdater::new();
        let config = ManagerConfig {
            // Only the initial pass; later convergence must come from events
            plugin_resync_period_ms: 3_600_000,
            ..Default::default()
        };
        let manager = IngressManager::new(
            config,
            registry.clone(),
            CountingFactory::new(),
            updater.callback(),
            None,
        );
        manager.run();

        for op in ops {
            match op {
                RegistryOp::Register { name, alloc } => registry
                    .register_plugin(plugin_info(&plugin_name(*name), &alloc_id(*alloc)))
                    .await
                    .unwrap(),
                RegistryOp::Deregister { name, alloc } => registry
                    .deregister_plugin("ingress", &plugin_name(*name), &alloc_id(*alloc))
                    .await
                    .unwrap(),
                RegistryOp::Resync => manager.resync().await,
            }
        }

        // Paused clock: the loop drains every queued event before time moves
        tokio::time::sleep(Duration::from_millis(10)).await;

        let listed: Allocations = registry
            .list_plugins("ingress")
            .await
            .iter()
            .map(|p| (p.name.clone(), p.alloc_id.clone()))
            .collect();
        let after_events = manager.tracked_allocations("ingress").await;

        manager.resync().await;
        let after_resync = manager.tracked_allocations("ingress").await;

        manager.shutdown().await;
        (listed, after_events, after_resync)
    })
}

proptest! {
    /// Property: the healthy counter always equals a recount of healthy node entries
    #[test]
    fn healthy_count_matches_independent_recount(ops in record_ops_strategy()) {
        let mut record = ClusterPluginRecord::new("lb", 1);

        for op in ops {
            match op {
                RecordOp::AddPlugin { node, alloc, healthy } => {
                    let mut snapshot = HealthSnapshot::initial("lb", alloc_id(alloc), "nginx", "1.25.0");
                    snapshot.set_healthy(healthy);
                    record.add_plugin(&node_id(node), &snapshot).unwrap();
                }
                RecordOp::DeleteNode { node } => {
                    record.delete_node_for_type(&node_id(node));
                }
                RecordOp::DeleteAlloc { node, alloc } => {
                    record.delete_alloc(&alloc_id(alloc), &node_id(node));
                }
            }

            let recount = record.nodes.values().filter(|s| s.healthy).count();
            prop_assert_eq!(record.nodes_healthy, recount);
        }
    }

    /// Property: a deletion for an allocation that does not back the node entry changes nothing
    #[test]
    fn foreign_alloc_deletion_is_noop(node in 0..5usize, alloc in 0..4usize, other in 0..4usize) {
        prop_assume!(alloc != other);
        let mut record = ClusterPluginRecord::new("lb", 1);
        let mut snapshot = HealthSnapshot::initial("lb", alloc_id(alloc), "nginx", "1.25.0");
        snapshot.set_healthy(true);
        record.add_plugin(&node_id(node), &snapshot).unwrap();

        let before = record.clone();
        prop_assert!(!record.delete_alloc(&alloc_id(other), &node_id(node)));
        prop_assert_eq!(record, before);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the instance table converges to the registry listing,
    /// from the event stream alone and again after a full resync
    #[test]
    fn instance_table_converges_to_registry(ops in registry_ops_strategy()) {
        let (listed, after_events, after_resync) = replay_registry_history(&ops);
        prop_assert_eq!(&after_events, &listed);
        prop_assert_eq!(&after_resync, &listed);
    }
}
