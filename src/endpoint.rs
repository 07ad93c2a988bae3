//! List/Get queries over ingress plugin records.
//!
//! Both queries follow the blocking-query convention: with a non-zero
//! `min_query_index` the call waits until the table index moves past it, up
//! to `max_query_time` (default 5 minutes, capped at 10), then answers with
//! whatever the table holds at that moment.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::constants::query::{DEFAULT_MAX_QUERY_TIME, MAX_QUERY_TIME_CAP};
use crate::error::{IngressError, Result};
use crate::state::IngressStateStore;
use crate::structs::{ClusterPluginRecord, IngressPluginListStub};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub min_query_index: u64,
    pub max_query_time: Option<Duration>,
    pub namespace: String,
}

impl QueryOptions {
    fn request_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    fn max_wait(&self) -> Duration {
        match self.max_query_time {
            Some(wait) if !wait.is_zero() => wait.min(MAX_QUERY_TIME_CAP),
            _ => DEFAULT_MAX_QUERY_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMeta {
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressPluginListResponse {
    pub plugins: Vec<IngressPluginListStub>,
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressPluginGetResponse {
    pub plugin: Option<ClusterPluginRecord>,
    pub meta: QueryMeta,
}

#[derive(Debug, Clone)]
pub struct IngressPluginEndpoint {
    state: Arc<IngressStateStore>,
}

impl IngressPluginEndpoint {
    pub fn new(state: Arc<IngressStateStore>) -> Self {
        Self { state }
    }

    pub async fn list(&self, options: &QueryOptions) -> Result<IngressPluginListResponse> {
        let index = self.block(options).await;
        let plugins = self
            .state
            .ingress_plugins()
            .iter()
            .map(ClusterPluginRecord::stub)
            .collect();
        Ok(IngressPluginListResponse {
            plugins,
            meta: QueryMeta { index },
        })
    }

    pub async fn get(&self, id: &str, options: &QueryOptions) -> Result<IngressPluginGetResponse> {
        if id.is_empty() {
            return Err(IngressError::Validation("missing plugin ID".to_string()));
        }

        let index = self.block(options).await;
        let plugin = self.state.ingress_plugin_by_id(id).map(|record| {
            let mut record = self.state.ingress_plugin_denormalize(record);
            let namespace = options.request_namespace();
            record.allocations.retain(|a| a.namespace == namespace);
            record
        });

        Ok(IngressPluginGetResponse {
            plugin,
            meta: QueryMeta { index },
        })
    }

    /// Reported indexes are never below 1 so a client echoing the index
    /// back always blocks
    async fn block(&self, options: &QueryOptions) -> u64 {
        let index = if options.min_query_index == 0 {
            self.state.table_index()
        } else {
            debug!(
                min_query_index = options.min_query_index,
                max_wait_ms = options.max_wait().as_millis() as u64,
                "Blocking ingress plugin query"
            );
            self.state
                .wait_for_index(options.min_query_index, options.max_wait())
                .await
        };
        index.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{AllocListStub, HealthSnapshot};
    use std::collections::HashMap;

    fn report(store: &IngressStateStore, index: u64, node_id: &str, plugin_id: &str, alloc_id: &str) {
        let mut snapshot = HealthSnapshot::initial(plugin_id, alloc_id, "nginx", "1.25.0");
        snapshot.set_healthy(true);
        let reports = HashMap::from([(plugin_id.to_string(), snapshot)]);
        store.upsert_node_ingress(index, node_id, &reports).unwrap();
    }

    fn alloc(id: &str, node_id: &str, namespace: &str) -> AllocListStub {
        AllocListStub {
            id: id.to_string(),
            namespace: namespace.to_string(),
            node_id: node_id.to_string(),
            job_id: "web".to_string(),
            task_group: "proxy".to_string(),
            client_status: "running".to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_returns_sorted_stubs() {
        let store = Arc::new(IngressStateStore::new());
        report(&store, 3, "node-1", "zeta", "a1");
        report(&store, 4, "node-2", "alpha", "a2");
        let endpoint = IngressPluginEndpoint::new(store);

        let response = endpoint.list(&QueryOptions::default()).await.unwrap();
        let ids: Vec<_> = response.plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(response.plugins[0].provider, "nginx");
        assert_eq!(response.plugins[0].nodes_healthy, 1);
        assert_eq!(response.meta.index, 4);
    }

    #[tokio::test]
    async fn test_get_requires_id_and_filters_namespace() {
        let store = Arc::new(IngressStateStore::new());
        report(&store, 1, "node-1", "lb", "a1");
        report(&store, 2, "node-2", "lb", "a2");
        store.upsert_allocs(
            3,
            vec![alloc("a1", "node-1", "default"), alloc("a2", "node-2", "team-b")],
        );
        let endpoint = IngressPluginEndpoint::new(store);

        let err = endpoint.get("", &QueryOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("missing plugin ID"));

        let response = endpoint.get("lb", &QueryOptions::default()).await.unwrap();
        let plugin = response.plugin.unwrap();
        assert_eq!(plugin.nodes.len(), 2);
        assert_eq!(plugin.allocations.len(), 1);
        assert_eq!(plugin.allocations[0].id, "a1");

        let options = QueryOptions {
            namespace: "team-b".to_string(),
            ..Default::default()
        };
        let response = endpoint.get("lb", &options).await.unwrap();
        assert_eq!(response.plugin.unwrap().allocations[0].id, "a2");

        let response = endpoint.get("unknown", &QueryOptions::default()).await.unwrap();
        assert!(response.plugin.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_list_waits_for_newer_index() {
        let store = Arc::new(IngressStateStore::new());
        report(&store, 5, "node-1", "lb", "a1");
        let endpoint = IngressPluginEndpoint::new(store.clone());

        let blocked = tokio::spawn(async move {
            let options = QueryOptions {
                min_query_index: 5,
                ..Default::default()
            };
            endpoint.list(&options).await.unwrap()
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!blocked.is_finished());
        report(&store, 6, "node-2", "edge", "a2");

        let response = blocked.await.unwrap();
        assert_eq!(response.meta.index, 6);
        assert_eq!(response.plugins.len(), 2);
    }

    #[test]
    fn test_max_wait_defaults_and_cap() {
        let mut options = QueryOptions::default();
        assert_eq!(options.max_wait(), DEFAULT_MAX_QUERY_TIME);

        options.max_query_time = Some(Duration::from_secs(3600));
        assert_eq!(options.max_wait(), MAX_QUERY_TIME_CAP);

        options.max_query_time = Some(Duration::from_secs(10));
        assert_eq!(options.max_wait(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_empty_table_reports_index_one() {
        let endpoint = IngressPluginEndpoint::new(Arc::new(IngressStateStore::new()));
        let response = endpoint.list(&QueryOptions::default()).await.unwrap();
        assert!(response.plugins.is_empty());
        assert_eq!(response.meta.index, 1);
    }
}
