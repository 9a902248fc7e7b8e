// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Namespace browse engine.
//!
//! Crawls a server's Objects folder into a navigable catalog for UI
//! consumption:
//!
//! - depth-first descent per root child, gated by a counting worker
//!   budget; when the budget is exhausted the caller recurses in its own
//!   context instead of failing
//! - per-node browse deadline with one retry after a fixed delay
//! - caller-supplied exclusion folders pruned together with their
//!   subtrees
//! - nodes deeper than the collapse depth are marked closed for the UI
//!
//! One job per connection is enforced with a sentinel temp file next to
//! the output; the finished tree is written into the sentinel and then
//! renamed over the output file, so consumers never observe a partial
//! document and the sentinel disappears exactly when the result lands.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::transport::{BrowseRef, OpcUaTransport};
use crate::error::{BrowseError, OpcUaError, OpcUaResult};
use crate::types::NodeId;

// =============================================================================
// BrowseOptions
// =============================================================================

/// Tuning for one browse job.
#[derive(Debug, Clone)]
pub struct BrowseOptions {
    /// Folder display names pruned from the output, subtrees included.
    pub exclusions: HashSet<String>,

    /// Worker budget for concurrent subtree descent.
    pub max_workers: usize,

    /// Deadline for the root browse call.
    pub root_timeout: Duration,

    /// Deadline for every other browse call.
    pub request_timeout: Duration,

    /// Delay before the single retry of a failed browse call.
    pub retry_delay: Duration,

    /// Nodes deeper than this are marked closed in the output.
    pub collapse_depth: u32,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            exclusions: HashSet::new(),
            max_workers: 4,
            root_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(2500),
            collapse_depth: 3,
        }
    }
}

impl BrowseOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exclusion folders.
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the worker budget.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// =============================================================================
// jsTree document
// =============================================================================

/// The browse output document, shaped for a jsTree consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeDocument {
    /// Tree configuration and data.
    pub core: JsTreeCore,
    /// Enabled plugins.
    pub plugins: Vec<String>,
    /// Search behavior.
    pub search: JsTreeSearch,
}

/// `core` block of the output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeCore {
    /// Animation duration; 0 disables animation.
    pub animation: u32,
    /// Whether the UI may modify the tree.
    pub check_callback: bool,
    /// Theme flags.
    pub themes: JsTreeThemes,
    /// Root node list.
    pub data: Vec<JsTreeNode>,
}

/// Theme flags of the output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeThemes {
    /// Row striping.
    pub stripes: bool,
    /// Connector dots.
    pub dots: bool,
}

/// Search block of the output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeSearch {
    /// Hide rows that do not match a search.
    pub show_only_matches: bool,
}

impl JsTreeDocument {
    /// Wraps a root node list in the standard document envelope.
    pub fn new(data: Vec<JsTreeNode>) -> Self {
        Self {
            core: JsTreeCore {
                animation: 0,
                check_callback: true,
                themes: JsTreeThemes {
                    stripes: false,
                    dots: false,
                },
                data,
            },
            plugins: vec!["search".to_string()],
            search: JsTreeSearch {
                show_only_matches: true,
            },
        }
    }
}

/// One node of the output tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeNode {
    /// Display text.
    pub text: String,
    /// Raw node identifier.
    pub id: String,
    /// Node metadata.
    pub data: JsTreeNodeData,
    /// UI state hints.
    pub state: JsTreeNodeState,
    /// Child nodes.
    pub children: Vec<JsTreeNode>,
}

/// Metadata of an output node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeNodeData {
    /// Native node class.
    #[serde(rename = "type")]
    pub node_type: String,
}

/// UI state hints of an output node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsTreeNodeState {
    /// Expanded by default.
    pub opened: bool,
    /// Selected by default.
    pub selected: bool,
}

impl JsTreeNode {
    fn from_ref(reference: &BrowseRef, opened: bool) -> Self {
        Self {
            text: reference.display_name.clone(),
            id: reference.node_id.to_string(),
            data: JsTreeNodeData {
                node_type: reference.node_class.to_string(),
            },
            state: JsTreeNodeState {
                opened,
                selected: false,
            },
            children: Vec::new(),
        }
    }
}

// =============================================================================
// BrowseJobPaths
// =============================================================================

/// File layout of one connection's browse job.
///
/// Output lives at `<config>/opcua_nodes/<connection>.json`; the
/// sentinel `temp_<connection>.json` marks an in-progress job; browse
/// failures land in `errors_<connection>.json`.
#[derive(Debug, Clone)]
pub struct BrowseJobPaths {
    dir: PathBuf,
    connection: String,
}

/// Subdirectory of the configuration directory holding browse output.
pub const BROWSE_OUTPUT_DIR: &str = "opcua_nodes";

impl BrowseJobPaths {
    /// Creates the layout for a connection under a configuration directory.
    pub fn new(config_dir: impl AsRef<Path>, connection: impl Into<String>) -> Self {
        Self {
            dir: config_dir.as_ref().join(BROWSE_OUTPUT_DIR),
            connection: connection.into(),
        }
    }

    /// The output directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The finished catalog document.
    pub fn output(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.connection))
    }

    /// The in-progress sentinel.
    pub fn sentinel(&self) -> PathBuf {
        self.dir.join(format!("temp_{}.json", self.connection))
    }

    /// The failure report.
    pub fn errors(&self) -> PathBuf {
        self.dir.join(format!("errors_{}.json", self.connection))
    }

    /// Whether a job for this connection is currently running.
    pub fn job_running(&self) -> bool {
        self.sentinel().exists()
    }
}

// =============================================================================
// Walker
// =============================================================================

struct BrowseWalker {
    transport: Arc<dyn OpcUaTransport>,
    options: BrowseOptions,
    permits: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
    nodes_visited: AtomicU64,
}

type SubtreeFuture = Pin<Box<dyn Future<Output = OpcUaResult<Vec<JsTreeNode>>> + Send>>;

impl BrowseWalker {
    fn new(
        transport: Arc<dyn OpcUaTransport>,
        options: BrowseOptions,
        cancel: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(options.max_workers));
        Arc::new(Self {
            transport,
            options,
            permits,
            cancel,
            nodes_visited: AtomicU64::new(0),
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn browse_once(&self, node: &NodeId, deadline: Duration) -> OpcUaResult<Vec<BrowseRef>> {
        match tokio::time::timeout(deadline, self.transport.browse(node)).await {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::timeout("browse", deadline)),
        }
    }

    async fn browse_with_retry(
        &self,
        node: &NodeId,
        deadline: Duration,
    ) -> OpcUaResult<Vec<BrowseRef>> {
        match self.browse_once(node, deadline).await {
            Ok(refs) => Ok(refs),
            Err(first) => {
                warn!(node = %node, error = %first, "browse failed, retrying once");
                tokio::time::sleep(self.options.retry_delay).await;
                if self.cancelled() {
                    return Err(BrowseError::Cancelled.into());
                }
                self.browse_once(node, deadline).await.map_err(|second| {
                    BrowseError::node_failed(
                        node.as_str(),
                        format!("{first}; after retry: {second}"),
                    )
                    .into()
                })
            }
        }
    }

    /// Browses `node` and materializes its child subtrees.
    ///
    /// Sibling subtrees descend concurrently while permits remain; on an
    /// empty budget the current task recurses synchronously, preserving
    /// progress under any budget >= 1. A failing subtree trips the cancel
    /// flag on its way out, so sibling tasks whose handles the unwind
    /// drops stand down at their next descent instead of crawling on.
    fn descend(self: Arc<Self>, node: NodeId, depth: u32) -> SubtreeFuture {
        Box::pin(async move {
            let result = Self::subtree(&self, node, depth).await;
            if result.is_err() {
                self.cancel.store(true, Ordering::SeqCst);
            }
            result
        })
    }

    async fn subtree(
        walker: &Arc<Self>,
        node: NodeId,
        depth: u32,
    ) -> OpcUaResult<Vec<JsTreeNode>> {
        if walker.cancelled() {
            return Err(BrowseError::Cancelled.into());
        }

        let deadline = if depth == 0 {
            walker.options.root_timeout
        } else {
            walker.options.request_timeout
        };
        let refs = walker.browse_with_retry(&node, deadline).await?;
        walker.nodes_visited.fetch_add(1, Ordering::Relaxed);

        let mut nodes: Vec<JsTreeNode> = Vec::with_capacity(refs.len());
        let mut spawned: Vec<(usize, JoinHandle<OpcUaResult<Vec<JsTreeNode>>>)> = Vec::new();

        for reference in refs {
            if walker.options.exclusions.contains(&reference.display_name) {
                debug!(folder = %reference.display_name, "excluded from browse");
                continue;
            }

            let child_depth = depth + 1;
            let entry =
                JsTreeNode::from_ref(&reference, child_depth <= walker.options.collapse_depth);
            let index = nodes.len();
            nodes.push(entry);

            match walker.permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    let child_walker = Arc::clone(walker);
                    let child_id = reference.node_id.clone();
                    spawned.push((
                        index,
                        tokio::spawn(async move {
                            let result = child_walker.descend(child_id, child_depth).await;
                            drop(permit);
                            result
                        }),
                    ));
                }
                Err(_) => {
                    nodes[index].children = Arc::clone(walker)
                        .descend(reference.node_id.clone(), child_depth)
                        .await?;
                }
            }
        }

        // Explicit join: the subtree is complete only when every
        // spawned child subtree is.
        for (index, handle) in spawned {
            let children = handle
                .await
                .map_err(|e| OpcUaError::operation("browse-join", e.to_string()))??;
            nodes[index].children = children;
        }

        Ok(nodes)
    }
}

/// Crawls the Objects folder into a root node list.
pub async fn browse_tree(
    transport: Arc<dyn OpcUaTransport>,
    options: BrowseOptions,
    cancel: Arc<AtomicBool>,
) -> OpcUaResult<Vec<JsTreeNode>> {
    let walker = BrowseWalker::new(transport, options, cancel);
    let roots = Arc::clone(&walker)
        .descend(NodeId::objects_folder(), 0)
        .await?;
    info!(
        nodes = walker.nodes_visited.load(Ordering::Relaxed),
        roots = roots.len(),
        "browse crawl complete"
    );
    Ok(roots)
}

// =============================================================================
// Job runner
// =============================================================================

/// Runs a full browse job for one connection and writes its output.
///
/// Fails fast with [`BrowseError::JobAlreadyRunning`] when the sentinel
/// of a previous, still-running job exists. On success the output file
/// is replaced atomically and the sentinel is gone; on failure the
/// sentinel is removed and the failure reason is written to the errors
/// file.
pub async fn run_browse_job(
    transport: Arc<dyn OpcUaTransport>,
    connection: &str,
    config_dir: &Path,
    options: BrowseOptions,
    cancel: Arc<AtomicBool>,
) -> OpcUaResult<PathBuf> {
    let paths = BrowseJobPaths::new(config_dir, connection);
    tokio::fs::create_dir_all(paths.dir())
        .await
        .map_err(|e| BrowseError::io(paths.dir(), e))?;

    if paths.job_running() {
        return Err(BrowseError::JobAlreadyRunning {
            connection: connection.to_string(),
        }
        .into());
    }

    // A stale failure report would shadow this run's outcome.
    let errors_path = paths.errors();
    if errors_path.exists() {
        tokio::fs::remove_file(&errors_path)
            .await
            .map_err(|e| BrowseError::io(&errors_path, e))?;
    }

    let sentinel = paths.sentinel();
    tokio::fs::write(&sentinel, b"{}")
        .await
        .map_err(|e| BrowseError::io(&sentinel, e))?;
    info!(connection, "browse job started");

    match browse_tree(transport, options, cancel).await {
        Ok(roots) => {
            let document = JsTreeDocument::new(roots);
            let rendered = serde_json::to_string_pretty(&document)
                .map_err(|e| OpcUaError::operation("browse-serialize", e.to_string()))?;

            // Write the result into the sentinel, then move it over the
            // output: one rename retires the marker and publishes the tree.
            tokio::fs::write(&sentinel, rendered.as_bytes())
                .await
                .map_err(|e| BrowseError::io(&sentinel, e))?;
            let output = paths.output();
            tokio::fs::rename(&sentinel, &output)
                .await
                .map_err(|e| BrowseError::io(&output, e))?;

            info!(connection, output = %output.display(), "browse job finished");
            Ok(output)
        }
        Err(err) => {
            warn!(connection, error = %err, "browse job failed");
            let _ = tokio::fs::remove_file(&sentinel).await;
            let report = serde_json::json!({ "error": err.to_string() });
            let _ = tokio::fs::write(&errors_path, report.to_string().as_bytes()).await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::InMemoryTransport;
    use crate::types::{NodeClass, SessionConfig};
    use tempfile::TempDir;

    fn object_ref(id: &str, name: &str) -> BrowseRef {
        BrowseRef {
            node_id: id.into(),
            display_name: name.to_string(),
            node_class: NodeClass::Object,
        }
    }

    fn variable_ref(id: &str, name: &str) -> BrowseRef {
        BrowseRef {
            node_id: id.into(),
            display_name: name.to_string(),
            node_class: NodeClass::Variable,
        }
    }

    /// i=85 -> Plant, Server; Plant -> Inverters -> INV1 -> W
    async fn seeded_transport() -> Arc<InMemoryTransport> {
        let t = Arc::new(InMemoryTransport::new(SessionConfig::new("opc.tcp://sim")));
        t.connect().await.unwrap();
        t.set_children(
            "i=85",
            vec![
                object_ref("ns=2;s=Plant", "Plant"),
                object_ref("ns=0;i=2253", "Server"),
            ],
        );
        t.set_children("ns=2;s=Plant", vec![object_ref("ns=2;s=Plant/Inverters", "Inverters")]);
        t.set_children(
            "ns=2;s=Plant/Inverters",
            vec![object_ref("ns=2;s=Plant/Inverters/INV1", "INV1")],
        );
        t.set_children(
            "ns=2;s=Plant/Inverters/INV1",
            vec![variable_ref("ns=2;s=Plant/Inverters/INV1/W", "W")],
        );
        // A subtree under Server that must never be crawled when excluded.
        t.set_children("ns=0;i=2253", vec![object_ref("ns=0;i=2254", "ServerArray")]);
        t
    }

    fn find<'a>(nodes: &'a [JsTreeNode], text: &str) -> Option<&'a JsTreeNode> {
        for node in nodes {
            if node.text == text {
                return Some(node);
            }
            if let Some(found) = find(&node.children, text) {
                return Some(found);
            }
        }
        None
    }

    #[tokio::test]
    async fn crawls_full_tree_with_collapse_depth() {
        let t = seeded_transport().await;
        let roots = browse_tree(
            t.clone(),
            BrowseOptions::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        let plant = find(&roots, "Plant").unwrap();
        assert!(plant.state.opened); // depth 1
        assert_eq!(plant.data.node_type, "Object");

        let inv1 = find(&roots, "INV1").unwrap();
        assert!(inv1.state.opened); // depth 3

        let w = find(&roots, "W").unwrap();
        assert!(!w.state.opened); // depth 4: collapsed
        assert_eq!(w.data.node_type, "Variable");
        assert_eq!(w.id, "ns=2;s=Plant/Inverters/INV1/W");
    }

    #[tokio::test]
    async fn exclusion_prunes_whole_subtree() {
        let t = seeded_transport().await;
        let roots = browse_tree(
            t.clone(),
            BrowseOptions::new().with_exclusions(["Server"]),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert!(find(&roots, "Server").is_none());
        assert!(find(&roots, "ServerArray").is_none());
        assert!(find(&roots, "Plant").is_some());
    }

    #[tokio::test]
    async fn single_worker_budget_still_completes() {
        let t = seeded_transport().await;
        let roots = browse_tree(
            t.clone(),
            BrowseOptions::new().with_max_workers(1),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
        assert!(find(&roots, "W").is_some());
    }

    #[tokio::test]
    async fn transient_browse_failure_is_retried() {
        let t = seeded_transport().await;
        t.fail_browse_of("ns=2;s=Plant", 1);

        let roots = browse_tree(
            t.clone(),
            BrowseOptions::new().with_retry_delay(Duration::from_millis(1)),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
        assert!(find(&roots, "Inverters").is_some());
    }

    #[tokio::test]
    async fn persistent_browse_failure_fails_job() {
        let t = seeded_transport().await;
        t.fail_browse_of("ns=2;s=Plant", 2);

        let err = browse_tree(
            t.clone(),
            BrowseOptions::new().with_retry_delay(Duration::from_millis(1)),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Browse(BrowseError::NodeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn failed_subtree_trips_the_cancel_flag() {
        let t = seeded_transport().await;
        t.fail_browse_of("ns=2;s=Plant", 2);

        let cancel = Arc::new(AtomicBool::new(false));
        let err = browse_tree(
            t.clone(),
            BrowseOptions::new().with_retry_delay(Duration::from_millis(1)),
            cancel.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Browse(BrowseError::NodeFailed { .. })
        ));

        // In-flight sibling subtrees observe the flag and stand down
        // instead of crawling on after the job has already failed.
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_stops_descent() {
        let t = seeded_transport().await;
        let err = browse_tree(
            t.clone(),
            BrowseOptions::new(),
            Arc::new(AtomicBool::new(true)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpcUaError::Browse(BrowseError::Cancelled)));
    }

    #[tokio::test]
    async fn job_writes_output_and_clears_sentinel() {
        let t = seeded_transport().await;
        let dir = TempDir::new().unwrap();

        let output = run_browse_job(
            t.clone(),
            "plant-a",
            dir.path(),
            BrowseOptions::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        let paths = BrowseJobPaths::new(dir.path(), "plant-a");
        assert_eq!(output, paths.output());
        assert!(!paths.job_running());
        assert!(!paths.errors().exists());

        let raw = std::fs::read_to_string(&output).unwrap();
        let document: JsTreeDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(document.plugins, vec!["search"]);
        assert_eq!(document.core.animation, 0);
        assert!(find(&document.core.data, "W").is_some());
    }

    #[tokio::test]
    async fn duplicate_job_fails_fast() {
        let t = seeded_transport().await;
        let dir = TempDir::new().unwrap();
        let paths = BrowseJobPaths::new(dir.path(), "plant-a");
        std::fs::create_dir_all(paths.dir()).unwrap();
        std::fs::write(paths.sentinel(), b"{}").unwrap();

        let err = run_browse_job(
            t.clone(),
            "plant-a",
            dir.path(),
            BrowseOptions::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Browse(BrowseError::JobAlreadyRunning { .. })
        ));
        // The first job's sentinel is untouched.
        assert!(paths.job_running());
    }

    #[tokio::test]
    async fn failed_job_leaves_error_report() {
        let t = seeded_transport().await;
        t.fail_browse_of("i=85", 2);
        let dir = TempDir::new().unwrap();

        let result = run_browse_job(
            t.clone(),
            "plant-a",
            dir.path(),
            BrowseOptions::new().with_retry_delay(Duration::from_millis(1)),
            Arc::new(AtomicBool::new(false)),
        )
        .await;
        assert!(result.is_err());

        let paths = BrowseJobPaths::new(dir.path(), "plant-a");
        assert!(!paths.job_running());
        assert!(paths.errors().exists());
        assert!(!paths.output().exists());

        // A fresh run clears the stale report.
        let output = run_browse_job(
            t.clone(),
            "plant-a",
            dir.path(),
            BrowseOptions::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
        assert!(output.exists());
        assert!(!paths.errors().exists());
    }
}
