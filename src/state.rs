//! # Ingress Plugin State Store
//!
//! Cluster-side tables aggregating node fingerprints into
//! [`ClusterPluginRecord`]s, plus the allocation and job tables the records
//! are derived from. Every mutation carries the log index it was applied at;
//! the highest index seen is the table index that blocking queries watch.
//!
//! Records are created on the first report or job reference and removed as
//! soon as no node reports them and no job references them.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::{IngressError, Result};
use crate::structs::{AllocListStub, ClusterPluginRecord, HealthSnapshot, Job, JobKey};

#[derive(Debug, Default)]
struct Tables {
    plugins: BTreeMap<String, ClusterPluginRecord>,
    allocs: HashMap<String, AllocListStub>,
    jobs: HashMap<JobKey, Arc<Job>>,
}

impl Tables {
    fn plugin_mut(&mut self, id: &str, index: u64) -> &mut ClusterPluginRecord {
        self.plugins
            .entry(id.to_string())
            .or_insert_with(|| ClusterPluginRecord::new(id, index))
    }

    fn gc(&mut self) {
        self.plugins.retain(|id, record| {
            let keep = !record.is_empty();
            if !keep {
                trace!(plugin_id = %id, "Removing empty ingress plugin record");
            }
            keep
        });
    }
}

#[derive(Debug)]
pub struct IngressStateStore {
    tables: RwLock<Tables>,
    index: watch::Sender<u64>,
}

impl Default for IngressStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IngressStateStore {
    pub fn new() -> Self {
        let (index, _) = watch::channel(0);
        Self {
            tables: RwLock::new(Tables::default()),
            index,
        }
    }

    fn bump(&self, index: u64) {
        self.index.send_modify(|current| *current = (*current).max(index));
    }

    /// Replace everything `node_id` reports. Plugins the node no longer
    /// reports lose their entry for that node.
    pub fn upsert_node_ingress(
        &self,
        index: u64,
        node_id: &str,
        snapshots: &HashMap<String, HealthSnapshot>,
    ) -> Result<()> {
        if node_id.is_empty() {
            return Err(IngressError::Validation("node id is required".to_string()));
        }
        if let Some((plugin_id, snapshot)) = snapshots.iter().find(|(id, s)| s.plugin_id != **id) {
            return Err(IngressError::Validation(format!(
                "snapshot for '{}' reported under plugin '{plugin_id}'",
                snapshot.plugin_id
            )));
        }
        {
            let mut tables = self.tables.write();

            for (id, record) in tables.plugins.iter_mut() {
                if !snapshots.contains_key(id) && record.delete_node_for_type(node_id) {
                    record.modify_index = index;
                }
            }

            for (plugin_id, snapshot) in snapshots {
                let record = tables.plugin_mut(plugin_id, index);
                record.add_plugin(node_id, snapshot)?;
                record.modify_index = index;
            }

            tables.gc();
        }
        debug!(node_id = %node_id, plugins = snapshots.len(), index = index, "Upserted node ingress plugins");
        self.bump(index);
        Ok(())
    }

    /// Forget every report from `node_id`
    pub fn delete_node(&self, index: u64, node_id: &str) {
        {
            let mut tables = self.tables.write();
            for record in tables.plugins.values_mut() {
                if record.delete_node_for_type(node_id) {
                    record.modify_index = index;
                }
            }
            tables.gc();
        }
        self.bump(index);
    }

    /// Store allocation stubs. A terminal allocation drops the node entries
    /// it was backing.
    pub fn upsert_allocs(&self, index: u64, allocs: Vec<AllocListStub>) {
        {
            let mut tables = self.tables.write();
            for alloc in allocs {
                if alloc.is_terminal() {
                    for record in tables.plugins.values_mut() {
                        if record.delete_alloc(&alloc.id, &alloc.node_id) {
                            record.modify_index = index;
                        }
                    }
                }
                tables.allocs.insert(alloc.id.clone(), alloc);
            }
            tables.gc();
        }
        self.bump(index);
    }

    /// Insert or update a job and recompute expected counts of every plugin
    /// it referenced before or references now
    pub fn upsert_job(&self, index: u64, job: Arc<Job>) {
        {
            let mut tables = self.tables.write();
            let key = job.key();

            let mut affected: Vec<String> = job.ingress_plugin_ids().into_iter().collect();
            if let Some(previous) = tables.jobs.get(&key) {
                affected.extend(previous.ingress_plugin_ids());
            }
            affected.sort();
            affected.dedup();

            for plugin_id in affected {
                let references = job.ingress_plugin_ids().contains(&plugin_id) && !job.stop;
                if references {
                    let record = tables.plugin_mut(&plugin_id, index);
                    record.update_expected_with_job(job.clone());
                    record.modify_index = index;
                } else if let Some(record) = tables.plugins.get_mut(&plugin_id) {
                    record.delete_job(&key);
                    record.modify_index = index;
                }
            }

            tables.jobs.insert(key, job);
            tables.gc();
        }
        self.bump(index);
    }

    pub fn delete_job(&self, index: u64, namespace: &str, job_id: &str) {
        let key = JobKey {
            namespace: namespace.to_string(),
            id: job_id.to_string(),
        };
        {
            let mut tables = self.tables.write();
            if tables.jobs.remove(&key).is_some() {
                for record in tables.plugins.values_mut() {
                    if record.delete_job(&key) {
                        record.modify_index = index;
                    }
                }
                tables.gc();
            }
        }
        self.bump(index);
    }

    /// All records, ordered by plugin ID
    pub fn ingress_plugins(&self) -> Vec<ClusterPluginRecord> {
        self.tables.read().plugins.values().cloned().collect()
    }

    pub fn ingress_plugin_by_id(&self, id: &str) -> Option<ClusterPluginRecord> {
        self.tables.read().plugins.get(id).cloned()
    }

    /// Attach the allocation stub of every allocation backing a node entry
    pub fn ingress_plugin_denormalize(&self, mut record: ClusterPluginRecord) -> ClusterPluginRecord {
        let tables = self.tables.read();
        let mut allocations: Vec<AllocListStub> = record
            .nodes
            .values()
            .filter_map(|snapshot| tables.allocs.get(&snapshot.alloc_id).cloned())
            .collect();
        allocations.sort_by(|a, b| a.id.cmp(&b.id));
        record.allocations = allocations;
        record
    }

    pub fn table_index(&self) -> u64 {
        *self.index.borrow()
    }

    /// Wait until the table index exceeds `min_index` or `max_wait` elapses,
    /// returning the index at that point
    pub async fn wait_for_index(&self, min_index: u64, max_wait: Duration) -> u64 {
        let mut index = self.index.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail
        let _ = tokio::time::timeout(max_wait, index.wait_for(|i| *i > min_index)).await;
        self.table_index()
    }
}
