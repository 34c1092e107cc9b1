//! Label-keyed children shared by every instrument.
use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::{Arc, PoisonError, RwLock},
};

use hashbrown::{hash_map::RawEntryMut, HashMap};
use tracing::trace;

use crate::error::UsageError;

/// Creates the per-label-combination state of an instrument.
pub trait ChildFactory {
    /// The state held for a single combination of label values.
    type Child;

    /// Creates a fresh child.
    fn new_child(&self) -> Self::Child;
}

type ChildMap<C> = HashMap<Vec<String>, Arc<C>>;

/// A named instrument, with one child per distinct combination of label values.
///
/// The label key of a child is the ordered sequence of its label values, positionally matched to
/// the label names of the family. The empty key belongs to the child of a family without labels,
/// which is created along with the family itself.
///
/// Children are created lazily on first use, and at most once per key: concurrent callers racing
/// to create the same child all get the same instance. Lookups of existing children only take a
/// read lock and do not allocate.
///
/// Children are never evicted on their own. Every distinct label key stays in memory until it is
/// explicitly removed, so label values should be drawn from a bounded set.
pub struct Family<F: ChildFactory> {
    name: String,
    help: String,
    label_names: Vec<String>,
    factory: F,
    children: RwLock<ChildMap<F::Child>>,
}

impl<F: ChildFactory> Family<F> {
    /// Creates a new [`Family`].
    ///
    /// Names are expected to be validated by the caller.
    pub fn new(name: String, help: String, label_names: Vec<String>, factory: F) -> Family<F> {
        let family = Family {
            name,
            help,
            label_names,
            factory,
            children: RwLock::new(HashMap::default()),
        };
        family.ensure_unlabeled_child();
        family
    }

    /// Gets the full name of this family.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the help text of this family.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Gets the label names of this family.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Gets the factory used to create children.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Gets or creates the child for the given label values.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<F::Child>, UsageError> {
        self.check_arity(values)?;

        let shard = &self.children;
        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        let hash = hash_label_values(shard_read.hasher(), values);

        // Try and get the child if it exists.
        if let Some((_, child)) = shard_read.raw_entry().from_hash(hash, |k| matches(k, values)) {
            return Ok(Arc::clone(child));
        }

        // Switch to the write guard, and check again before creating the child, since another
        // caller may have created it in the meantime.
        drop(shard_read);
        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        let child = match shard_write.raw_entry_mut().from_hash(hash, |k| matches(k, values)) {
            RawEntryMut::Occupied(entry) => Arc::clone(entry.get()),
            RawEntryMut::Vacant(entry) => {
                let key = values.iter().map(|v| v.as_ref().to_string()).collect::<Vec<_>>();
                trace!(name = %self.name, labels = ?key, "creating child");
                let (_, child) = entry.insert(key, Arc::new(self.factory.new_child()));
                Arc::clone(child)
            }
        };

        Ok(child)
    }

    /// Removes the child for the given label values.
    ///
    /// Returns `true` if the child existed and was removed, `false` otherwise. Any reference to
    /// the removed child that is still held elsewhere becomes stale: updates made through it no
    /// longer show up when collecting.
    ///
    /// For a family without labels, removing the empty key replaces its child with a fresh one.
    ///
    /// ## Errors
    ///
    /// If the number of label values does not match the number of label names, an error variant
    /// will be returned.
    pub fn remove<S: AsRef<str>>(&self, values: &[S]) -> Result<bool, UsageError> {
        self.check_arity(values)?;

        let removed = {
            let mut shard_write = self.children.write().unwrap_or_else(PoisonError::into_inner);
            let hash = hash_label_values(shard_write.hasher(), values);
            match shard_write.raw_entry_mut().from_hash(hash, |k| matches(k, values)) {
                RawEntryMut::Occupied(entry) => {
                    let _ = entry.remove_entry();
                    true
                }
                RawEntryMut::Vacant(_) => false,
            }
        };

        self.ensure_unlabeled_child();
        Ok(removed)
    }

    /// Removes every child.
    ///
    /// As with [`remove`](Self::remove), references to removed children become stale.
    pub fn clear(&self) {
        self.children.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.ensure_unlabeled_child();
    }

    /// Gets a point-in-time snapshot of every child and its label values, sorted by label values.
    ///
    /// The lock is only held while copying out references to the children, so reading their
    /// values afterwards never blocks callers creating new children.
    pub fn children(&self) -> Vec<(Vec<String>, Arc<F::Child>)> {
        let mut children = {
            let shard_read = self.children.read().unwrap_or_else(PoisonError::into_inner);
            shard_read
                .iter()
                .map(|(key, child)| (key.clone(), Arc::clone(child)))
                .collect::<Vec<_>>()
        };
        children.sort_by(|(a, _), (b, _)| a.cmp(b));
        children
    }

    /// Gets the number of children.
    pub fn len(&self) -> usize {
        self.children.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether or not this family has no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_arity<S>(&self, values: &[S]) -> Result<(), UsageError> {
        if values.len() == self.label_names.len() {
            Ok(())
        } else {
            Err(UsageError::LabelArity { expected: self.label_names.len(), actual: values.len() })
        }
    }

    fn ensure_unlabeled_child(&self) {
        if self.label_names.is_empty() {
            let mut shard_write = self.children.write().unwrap_or_else(PoisonError::into_inner);
            if shard_write.is_empty() {
                shard_write.insert(Vec::new(), Arc::new(self.factory.new_child()));
            }
        }
    }
}

impl<F> fmt::Debug for Family<F>
where
    F: ChildFactory + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family")
            .field("name", &self.name)
            .field("help", &self.help)
            .field("label_names", &self.label_names)
            .field("factory", &self.factory)
            .field("children", &self.len())
            .finish()
    }
}

/// Hashes label values exactly like the `Vec<String>` key they map to.
fn hash_label_values<B, S>(build_hasher: &B, values: &[S]) -> u64
where
    B: BuildHasher,
    S: AsRef<str>,
{
    let mut hasher = build_hasher.build_hasher();
    values.len().hash(&mut hasher);
    for value in values {
        value.as_ref().hash(&mut hasher);
    }
    hasher.finish()
}

fn matches<S: AsRef<str>>(key: &[String], values: &[S]) -> bool {
    key.len() == values.len() && key.iter().zip(values).all(|(k, v)| k == v.as_ref())
}
