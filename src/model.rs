//! Aggregation of data items into named trees.
//!
//! A [`Model`] is an ordered list of [`DataNode`]s, which are either data
//! items or nested models. Bulk operations visit the children in the order
//! they were added.

use std::fmt;
use std::sync::Arc;

use crate::item::{DataItem, Value};

/// Operations shared by data items and models.
pub trait DataNode: Send + Sync {
    /// Display name, if any.
    fn name(&self) -> Option<&str>;

    /// Append a rendering of this node at `indent_depth` to `out`.
    fn render(&self, indent_depth: usize, out: &mut String);

    /// Log every delivered change through `tracing`.
    fn enable_change_logging(&self, enable: bool);

    fn mute(&self);

    fn unmute(&self);

    fn set_default(&self);

    fn reset(&self);

    fn load_or_reset(&self);
}

impl<T: Value> DataNode for DataItem<T> {
    fn name(&self) -> Option<&str> {
        DataItem::name(self)
    }

    fn render(&self, indent_depth: usize, out: &mut String) {
        self.render_into(indent_depth, out);
    }

    fn enable_change_logging(&self, enable: bool) {
        DataItem::enable_change_logging(self, enable);
    }

    fn mute(&self) {
        DataItem::mute(self);
    }

    fn unmute(&self) {
        DataItem::unmute(self);
    }

    fn set_default(&self) {
        DataItem::set_default(self);
    }

    fn reset(&self) {
        DataItem::reset(self);
    }

    fn load_or_reset(&self) {
        DataItem::load_or_reset(self);
    }
}

/// Named, ordered collection of data items and nested models.
pub struct Model {
    name: String,
    nodes: Vec<Arc<dyn DataNode>>,
}

impl Model {
    /// Create an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a child node.
    pub fn add(&mut self, node: Arc<dyn DataNode>) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Builder form of [`Model::add`].
    pub fn with(mut self, node: Arc<dyn DataNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Child nodes, in insertion order.
    pub fn nodes(&self) -> &[Arc<dyn DataNode>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render the whole tree, starting at depth zero.
    pub fn render_to_string(&self) -> String {
        let mut out = String::new();
        self.render(0, &mut out);
        out
    }
}

impl DataNode for Model {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    /// The model's name on its own line, children one level deeper.
    fn render(&self, indent_depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(indent_depth));
        out.push_str(&self.name);
        out.push('\n');
        for node in &self.nodes {
            node.render(indent_depth + 1, out);
        }
    }

    fn enable_change_logging(&self, enable: bool) {
        for node in &self.nodes {
            node.enable_change_logging(enable);
        }
    }

    fn mute(&self) {
        for node in &self.nodes {
            node.mute();
        }
    }

    fn unmute(&self) {
        for node in &self.nodes {
            node.unmute();
        }
    }

    fn set_default(&self) {
        for node in &self.nodes {
            node.set_default();
        }
    }

    fn reset(&self) {
        for node in &self.nodes {
            node.reset();
        }
    }

    fn load_or_reset(&self) {
        for node in &self.nodes {
            node.load_or_reset();
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitBatcher;
    use crate::memory::MemoryBlobStore;
    use crate::store::BlobStore;
    use crate::mutation::Always;
    use crate::persist::{NoStorage, Persisted};
    use parking_lot::Mutex;

    fn item(default: u32, name: &str) -> Arc<DataItem<u32>> {
        Arc::new(
            DataItem::new(Box::new(NoStorage::new(default)), Some(name.to_string()))
                .settable(Box::new(Always)),
        )
    }

    #[test]
    fn test_render_nested_tree() {
        let volume = item(3, "volume");
        let brightness = item(7, "brightness");

        let display = Model::new("display").with(brightness);
        let root = Model::new("device")
            .with(volume)
            .with(Arc::new(display));

        assert_eq!(
            root.render_to_string(),
            "device\n  volume: 3\n  display\n    brightness: 7\n"
        );
    }

    #[test]
    fn test_bulk_set_default_visits_every_item() {
        let a = item(1, "a");
        let b = item(2, "b");
        let mut model = Model::new("m");
        model.add(a.clone()).add(b.clone());

        a.set(10);
        b.set(20);
        model.set_default();

        assert_eq!((a.get(), b.get()), (1, 2));
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_bulk_mute_coalesces_notifications() {
        let a = item(0, "a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        a.subscribe(move |v| sink.lock().push(*v), false);

        let model = Model::new("m").with(a.clone());
        model.mute();
        a.set(1);
        a.set(2);
        assert!(seen.lock().is_empty());

        model.unmute();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_bulk_reset_erases_stored_values() {
        let store = Arc::new(MemoryBlobStore::new());
        let batcher = Arc::new(CommitBatcher::new(store.clone()));
        let persisted = Arc::new(
            DataItem::new(Box::new(Persisted::new(5u32, "level", batcher.clone())), None)
                .settable(Box::new(Always)),
        );
        persisted.set(8);
        batcher.commit();
        assert!(store.contains("level"));

        let model = Model::new("m").with(persisted.clone());
        model.reset();
        assert_eq!(persisted.get(), 5);
        assert!(!store.contains("level"));

        store.inject_blob("level", &6u32.to_ne_bytes());
        model.load_or_reset();
        assert_eq!(persisted.get(), 6);
    }

    #[test]
    fn test_node_names() {
        let model = Model::new("root").with(item(0, "child"));
        assert_eq!(DataNode::name(&model), Some("root"));
        assert_eq!(model.nodes()[0].name(), Some("child"));
        assert!(Model::new("empty").is_empty());
    }
}
