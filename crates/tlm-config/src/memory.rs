//! In-memory device datastore
//!
//! [`MemoryConfigStore`] emulates a device with running and candidate
//! datastores: edits are staged per session, applied to a working copy at
//! commit, checked by device-side validation rules, and swapped in
//! atomically. Faults can be injected to exercise error paths.

use crate::delta::{ConfigDelta, EditOperation};
use crate::error::ConfigError;
use crate::node::{ConfigNode, ListKeys};
use crate::path::{ConfigPath, Segment};
use crate::store::{CommitId, ConfigSession, ConfigStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Device-side validation rule run against the datastore a commit would
/// produce. Returns the rejection detail on failure.
pub type ValidationRule = Arc<dyn Fn(&Datastore) -> Result<(), String> + Send + Sync>;

/// A datastore: top-level subtrees keyed by (namespace, root element)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datastore {
    roots: BTreeMap<(String, String), ConfigNode>,
}

impl Datastore {
    /// Empty datastore
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Element at `path`
    #[must_use]
    pub fn get(&self, path: &ConfigPath) -> Option<&ConfigNode> {
        let root = self.roots.get(&root_key(path))?;
        path.segments()[1..]
            .iter()
            .try_fold(root, |node, segment| {
                node.position_of(segment).map(|i| &node.children()[i])
            })
    }

    /// Top-level subtrees in key order
    pub fn subtrees(&self) -> impl Iterator<Item = &ConfigNode> {
        self.roots.values()
    }

    /// Whether the datastore holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Insert or overwrite a top-level subtree
    ///
    /// # Errors
    /// [`ConfigError::Session`] if the node is not namespace-qualified
    pub fn insert_subtree(&mut self, node: ConfigNode) -> Result<(), ConfigError> {
        let namespace = node
            .namespace()
            .ok_or_else(|| {
                ConfigError::Session(format!("subtree <{}> has no namespace", node.name()))
            })?
            .to_string();
        self.roots.insert((namespace, node.name().to_string()), node);
        Ok(())
    }

    /// Apply one edit
    ///
    /// # Errors
    /// Rejection detail when the edit conflicts with existing data
    pub fn apply(&mut self, delta: &ConfigDelta, keys: &ListKeys) -> Result<(), String> {
        let path = delta.target();
        match delta.operation() {
            EditOperation::Remove => {
                self.remove(path);
                Ok(())
            }
            EditOperation::Create(node) | EditOperation::Merge(node) | EditOperation::Replace(node) => {
                if !node.matches_segment(path.last()) {
                    return Err(format!("payload does not match key of {path}"));
                }
                let root = self
                    .roots
                    .entry(root_key(path))
                    .or_insert_with(|| ConfigNode::qualified(path.namespace(), path.root_element()));

                if path.is_subtree_root() {
                    return write_slot(root, None, delta.operation(), keys, path);
                }
                let segments = path.segments();
                let parent = descend_creating(root, &segments[1..segments.len() - 1]);
                let slot = parent.position_of(path.last());
                match slot {
                    Some(i) => write_slot(&mut parent.children_mut()[i], None, delta.operation(), keys, path),
                    None => write_slot(parent, Some(node), delta.operation(), keys, path),
                }
            }
        }
    }

    fn remove(&mut self, path: &ConfigPath) {
        let key = root_key(path);
        if path.is_subtree_root() {
            self.roots.remove(&key);
            return;
        }
        let Some(root) = self.roots.get_mut(&key) else {
            return;
        };
        remove_below(root, &path.segments()[1..]);
        if root.is_empty() {
            self.roots.remove(&key);
        }
    }
}

fn root_key(path: &ConfigPath) -> (String, String) {
    (path.namespace().to_string(), path.root_element().to_string())
}

fn descend_creating<'a>(mut node: &'a mut ConfigNode, segments: &[Segment]) -> &'a mut ConfigNode {
    for segment in segments {
        let current = node;
        let index = match current.position_of(segment) {
            Some(i) => i,
            None => {
                let mut created = ConfigNode::new(segment.name());
                if let Some((key, value)) = segment.key() {
                    created = created.with_text_child(key, value);
                }
                current.push_child(created);
                current.children().len() - 1
            }
        };
        node = &mut current.children_mut()[index];
    }
    node
}

// `absent` carries the payload when the target does not exist yet and must
// be appended to `slot` (which is then the parent).
fn write_slot(
    slot: &mut ConfigNode,
    absent: Option<&ConfigNode>,
    operation: &EditOperation,
    keys: &ListKeys,
    path: &ConfigPath,
) -> Result<(), String> {
    if let Some(node) = absent {
        slot.push_child(node.clone());
        return Ok(());
    }
    match operation {
        EditOperation::Create(_) if !slot.is_empty() => Err(format!("data-exists: {path}")),
        EditOperation::Create(node) | EditOperation::Replace(node) => {
            let namespace = slot.namespace().map(str::to_string);
            *slot = match namespace {
                Some(ns) if node.namespace().is_none() => requalify(node, &ns),
                _ => node.clone(),
            };
            Ok(())
        }
        EditOperation::Merge(node) => {
            slot.merge_from(node, keys);
            Ok(())
        }
        EditOperation::Remove => Ok(()),
    }
}

fn requalify(node: &ConfigNode, namespace: &str) -> ConfigNode {
    let mut qualified = ConfigNode::qualified(namespace, node.name());
    if let Some(text) = node.text() {
        qualified = qualified.with_text(text);
    }
    for child in node.children() {
        qualified.push_child(child.clone());
    }
    qualified
}

// Removes the addressed element and prunes ancestors left empty.
fn remove_below(node: &mut ConfigNode, segments: &[Segment]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some(index) = node.position_of(first) else {
        return false;
    };
    if rest.is_empty() {
        node.children_mut().remove(index);
        return true;
    }
    let removed = remove_below(&mut node.children_mut()[index], rest);
    if removed && prunable(&node.children()[index], first) {
        node.children_mut().remove(index);
    }
    removed
}

// An emptied container, or a list entry left holding only its key leaf.
fn prunable(node: &ConfigNode, segment: &Segment) -> bool {
    match segment.key() {
        Some((key, _)) => node.children().iter().all(|c| c.name() == key),
        None => node.is_empty(),
    }
}

/// Record of one successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Commit id
    pub id: CommitId,
    /// Edits applied, in staging order
    pub deltas: Vec<ConfigDelta>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: Option<String>,
    next_session: Option<String>,
    next_read: Option<String>,
    next_commit: Option<String>,
}

struct Inner {
    running: Mutex<Datastore>,
    keys: ListKeys,
    rules: Vec<ValidationRule>,
    faults: Mutex<Faults>,
    history: Mutex<Vec<CommitRecord>>,
    next_commit: AtomicU64,
    open_sessions: AtomicUsize,
    max_open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
}

/// In-memory device configuration store
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct MemoryConfigStore {
    inner: Arc<Inner>,
}

impl MemoryConfigStore {
    /// Store with an empty datastore, no list keys and no validation rules
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a store
    #[inline]
    #[must_use]
    pub fn builder() -> MemoryConfigStoreBuilder {
        MemoryConfigStoreBuilder::default()
    }

    /// Snapshot of the running datastore
    #[must_use]
    pub fn running(&self) -> Datastore {
        self.inner.running.lock().clone()
    }

    /// Element of the running datastore at `path`
    #[must_use]
    pub fn get(&self, path: &ConfigPath) -> Option<ConfigNode> {
        self.inner.running.lock().get(path).cloned()
    }

    /// Successful commits, oldest first
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.inner.history.lock().clone()
    }

    /// Number of successful commits
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.inner.history.lock().len()
    }

    /// Sessions currently open
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions observed
    #[must_use]
    pub fn max_open_sessions(&self) -> usize {
        self.inner.max_open_sessions.load(Ordering::SeqCst)
    }

    /// Total sessions opened
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// Refuse every session until cleared with `None`
    pub fn set_unreachable(&self, detail: Option<&str>) {
        self.inner.faults.lock().unreachable = detail.map(str::to_string);
    }

    /// Refuse the next session open
    pub fn fail_next_session(&self, detail: impl Into<String>) {
        self.inner.faults.lock().next_session = Some(detail.into());
    }

    /// Reject the next read
    pub fn fail_next_read(&self, detail: impl Into<String>) {
        self.inner.faults.lock().next_read = Some(detail.into());
    }

    /// Reject the next commit
    pub fn fail_next_commit(&self, detail: impl Into<String>) {
        self.inner.faults.lock().next_commit = Some(detail.into());
    }

    /// Apply edits directly, bypassing sessions (external operator change)
    ///
    /// # Errors
    /// [`ConfigError::Commit`] when the edits are rejected
    pub fn apply_external(&self, deltas: &[ConfigDelta]) -> Result<CommitId, ConfigError> {
        self.inner.commit(deltas)
    }
}

impl Inner {
    fn commit(&self, deltas: &[ConfigDelta]) -> Result<CommitId, ConfigError> {
        if let Some(detail) = self.faults.lock().next_commit.take() {
            return Err(ConfigError::commit(detail));
        }

        let mut running = self.running.lock();
        let mut working = running.clone();
        for delta in deltas {
            working.apply(delta, &self.keys).map_err(ConfigError::commit)?;
        }
        for rule in &self.rules {
            rule(&working).map_err(ConfigError::commit)?;
        }
        *running = working;
        drop(running);

        let id = CommitId(self.next_commit.fetch_add(1, Ordering::SeqCst) + 1);
        self.history.lock().push(CommitRecord {
            id,
            deltas: deltas.to_vec(),
        });
        Ok(id)
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConfigStore")
            .field("running", &*self.inner.running.lock())
            .field("rules", &self.inner.rules.len())
            .field("open_sessions", &self.open_sessions())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn open_session(&self) -> Result<Box<dyn ConfigSession>, ConfigError> {
        {
            let mut faults = self.inner.faults.lock();
            if let Some(detail) = faults.unreachable.clone() {
                return Err(ConfigError::Session(detail));
            }
            if let Some(detail) = faults.next_session.take() {
                return Err(ConfigError::Session(detail));
            }
        }
        let now = self.inner.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open_sessions.fetch_max(now, Ordering::SeqCst);
        self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            staged: Vec::new(),
            closed: false,
        }))
    }
}

/// Builder for [`MemoryConfigStore`]
#[derive(Default)]
pub struct MemoryConfigStoreBuilder {
    datastore: Datastore,
    keys: ListKeys,
    rules: Vec<ValidationRule>,
}

impl MemoryConfigStoreBuilder {
    /// Seed the running datastore with a top-level subtree
    ///
    /// # Errors
    /// [`ConfigError::Session`] if the node is not namespace-qualified
    pub fn subtree(mut self, node: ConfigNode) -> Result<Self, ConfigError> {
        self.datastore.insert_subtree(node)?;
        Ok(self)
    }

    /// Set the list key table used for merges
    #[inline]
    #[must_use]
    pub fn list_keys(mut self, keys: ListKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Add a device-side validation rule
    #[inline]
    #[must_use]
    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> MemoryConfigStore {
        MemoryConfigStore {
            inner: Arc::new(Inner {
                running: Mutex::new(self.datastore),
                keys: self.keys,
                rules: self.rules,
                faults: Mutex::new(Faults::default()),
                history: Mutex::new(Vec::new()),
                next_commit: AtomicU64::new(0),
                open_sessions: AtomicUsize::new(0),
                max_open_sessions: AtomicUsize::new(0),
                sessions_opened: AtomicUsize::new(0),
            }),
        }
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    staged: Vec<ConfigDelta>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), ConfigError> {
        if self.closed {
            Err(ConfigError::Session("session closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigSession for MemorySession {
    async fn read_running(
        &mut self,
        path: &ConfigPath,
    ) -> Result<Option<ConfigNode>, ConfigError> {
        self.ensure_open()?;
        if let Some(detail) = self.inner.faults.lock().next_read.take() {
            return Err(ConfigError::read(path, detail));
        }
        Ok(self.inner.running.lock().get(path).cloned())
    }

    async fn edit_candidate(&mut self, delta: &ConfigDelta) -> Result<(), ConfigError> {
        self.ensure_open()?;
        self.staged.push(delta.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<CommitId, ConfigError> {
        self.ensure_open()?;
        let staged = std::mem::take(&mut self.staged);
        self.inner.commit(&staged)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.staged.clear();
            self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConfigTransaction;
    use pretty_assertions::assert_eq;

    const NS: &str = "urn:test";

    fn grpc() -> ConfigPath {
        ConfigPath::subtree(NS, "grpc")
    }

    fn subs() -> ConfigPath {
        ConfigPath::subtree(NS, "telemetry").child("subscriptions")
    }

    fn sub_entry(id: &str) -> ConfigNode {
        ConfigNode::new("subscription")
            .with_text_child("id", id)
            .with_text_child("group", "g")
    }

    fn keyed_store() -> MemoryConfigStore {
        MemoryConfigStore::builder()
            .list_keys(ListKeys::new().with_list("subscription", "id"))
            .build()
    }

    #[tokio::test]
    async fn commit_applies_all_staged_edits() {
        let store = keyed_store();
        let mut txn = ConfigTransaction::begin(&store).await.unwrap();
        txn.propose(ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_empty_child("enable")))
            .await
            .unwrap();
        txn.propose(ConfigDelta::create(subs().entry("subscription", "id", "s1"), sub_entry("s1")))
            .await
            .unwrap();
        let receipt = txn.commit().await.unwrap();

        assert_eq!(receipt.applied.len(), 2);
        assert!(store.get(&grpc().child("enable")).is_some());
        assert!(store.get(&subs().entry("subscription", "id", "s1")).is_some());
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn create_of_existing_entry_rejects_whole_commit() {
        let store = keyed_store();
        store
            .apply_external(&[ConfigDelta::create(
                subs().entry("subscription", "id", "s1"),
                sub_entry("s1"),
            )])
            .unwrap();
        let before = store.running();

        let mut txn = ConfigTransaction::begin(&store).await.unwrap();
        txn.propose(ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_empty_child("enable")))
            .await
            .unwrap();
        txn.propose(ConfigDelta::create(subs().entry("subscription", "id", "s1"), sub_entry("s1")))
            .await
            .unwrap();
        let err = txn.commit().await.unwrap_err();

        assert!(matches!(err, ConfigError::Commit { .. }));
        assert!(err.detail().contains("data-exists"));
        assert_eq!(store.running(), before);
    }

    #[tokio::test]
    async fn remove_prunes_emptied_containers() {
        let store = keyed_store();
        let before = store.running();
        store
            .apply_external(&[
                ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_empty_child("enable")),
                ConfigDelta::create(subs().entry("subscription", "id", "s1"), sub_entry("s1")),
            ])
            .unwrap();
        store
            .apply_external(&[
                ConfigDelta::remove(subs().entry("subscription", "id", "s1")),
                ConfigDelta::remove(grpc().child("enable")),
            ])
            .unwrap();

        assert_eq!(store.running(), before);
    }

    #[tokio::test]
    async fn remove_of_absent_element_is_not_an_error() {
        let store = keyed_store();
        store
            .apply_external(&[ConfigDelta::remove(subs().entry("subscription", "id", "nope"))])
            .unwrap();
        assert!(store.running().is_empty());
    }

    #[tokio::test]
    async fn replace_overwrites_entry() {
        let store = keyed_store();
        store
            .apply_external(&[ConfigDelta::create(
                subs().entry("subscription", "id", "s1"),
                sub_entry("s1"),
            )])
            .unwrap();
        store
            .apply_external(&[ConfigDelta::replace(
                subs().entry("subscription", "id", "s1"),
                ConfigNode::new("subscription").with_text_child("id", "s1"),
            )])
            .unwrap();

        let entry = store.get(&subs().entry("subscription", "id", "s1")).unwrap();
        assert_eq!(entry.children().len(), 1);
    }

    #[tokio::test]
    async fn validation_rule_rejects_commit() {
        let rule: ValidationRule = Arc::new(|ds: &Datastore| {
            let path = ConfigPath::subtree(NS, "grpc").child("port");
            match ds.get(&path).and_then(ConfigNode::text) {
                Some("0") => Err("port out of range".to_string()),
                _ => Ok(()),
            }
        });
        let store = MemoryConfigStore::builder().rule(rule).build();

        let mut txn = ConfigTransaction::begin(&store).await.unwrap();
        txn.propose(ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_text_child("port", "0")))
            .await
            .unwrap();
        let err = txn.commit().await.unwrap_err();

        assert_eq!(err, ConfigError::commit("port out of range"));
        assert!(store.running().is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_discards_edits_and_closes_session() {
        let store = keyed_store();
        {
            let mut txn = ConfigTransaction::begin(&store).await.unwrap();
            txn.propose(ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_empty_child("enable")))
                .await
                .unwrap();
            assert_eq!(store.open_sessions(), 1);
        }
        assert_eq!(store.open_sessions(), 0);
        assert!(store.running().is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn injected_faults_are_one_shot() {
        let store = keyed_store();

        store.fail_next_session("unreachable");
        assert!(matches!(
            ConfigTransaction::begin(&store).await,
            Err(ConfigError::Session(_))
        ));

        let mut txn = ConfigTransaction::begin(&store).await.unwrap();
        store.fail_next_read("denied");
        assert!(matches!(
            txn.read_subtree(&grpc()).await,
            Err(ConfigError::Read { .. })
        ));
        let empty = txn.read_subtree(&grpc()).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.namespace(), Some(NS));
    }

    #[tokio::test]
    async fn unreachable_store_refuses_sessions() {
        let store = keyed_store();
        store.set_unreachable(Some("no route to host"));
        assert!(ConfigTransaction::begin(&store).await.is_err());
        store.set_unreachable(None);
        assert!(ConfigTransaction::begin(&store).await.is_ok());
    }

    #[tokio::test]
    async fn empty_transaction_skips_device_commit() {
        let store = keyed_store();
        let txn = ConfigTransaction::begin(&store).await.unwrap();
        let receipt = txn.commit().await.unwrap();
        assert!(receipt.id.is_none());
        assert_eq!(store.commit_count(), 0);
    }
}
