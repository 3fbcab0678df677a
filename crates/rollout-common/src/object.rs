//! Named, namespaced objects held by the backing store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds of configuration objects a controller can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Plain key/value configuration.
    ConfigMap,
    /// Sensitive key/value configuration.
    Secret,
}

impl ResourceKind {
    /// All kinds, in tracking order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::ConfigMap, ResourceKind::Secret];

    /// Returns the plural resource name (e.g. "configmaps").
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "configmaps",
            ResourceKind::Secret => "secrets",
        }
    }

    /// Returns the lowercase singular name used in reason strings.
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
        }
    }

    /// Returns the kind name as written in owner references.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared parent of an object; dependents are removed with their owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Kind of the owner.
    pub kind: ResourceKind,
    /// Name of the owner.
    pub name: String,
    /// Store assigned identity of the owner.
    pub uid: String,
}

impl OwnerReference {
    /// Builds an owner reference pointing at `owner`.
    pub fn to(owner: &StoredObject) -> Self {
        Self {
            kind: owner.kind,
            name: owner.meta.name.clone(),
            uid: owner.meta.uid.clone(),
        }
    }
}

/// Identity and bookkeeping fields shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Assigned by the store on create; empty before that.
    #[serde(default)]
    pub uid: String,
    /// Version token; bumped by the store on every write.
    #[serde(default)]
    pub resource_version: String,
    /// Owners of this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Creates metadata for a new object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Payload of a configuration object.
///
/// Compared by full structural equality; both maps are ordered so equal
/// content always serializes identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectContent {
    /// UTF-8 entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Binary entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, Vec<u8>>,
}

impl ObjectContent {
    /// Creates empty content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds content from string pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            binary_data: BTreeMap::new(),
        }
    }

    /// Adds a string entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Adds a binary entry.
    pub fn with_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.binary_data.insert(key.into(), value.into());
        self
    }

    /// Returns a string entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Returns true if there are no entries at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.binary_data.is_empty()
    }
}

/// A typed object as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object kind.
    pub kind: ResourceKind,
    /// Identity and version.
    pub meta: ObjectMeta,
    /// Payload.
    pub content: ObjectContent,
}

impl StoredObject {
    /// Creates an object that has not been persisted yet.
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        content: ObjectContent,
    ) -> Self {
        Self {
            kind,
            meta: ObjectMeta::new(namespace, name),
            content,
        }
    }

    /// Adds an owner reference.
    pub fn owned_by(mut self, owner: OwnerReference) -> Self {
        self.meta.owner_references.push(owner);
        self
    }

    /// Returns the object name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Returns true if `owner` is listed among this object's owners.
    pub fn is_owned_by(&self, owner: &StoredObject) -> bool {
        self.meta
            .owner_references
            .iter()
            .any(|r| r.uid == owner.meta.uid && r.kind == owner.kind)
    }
}

/// Kind of change reported by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// Object was created.
    Added,
    /// Object was updated.
    Modified,
    /// Object was deleted.
    Deleted,
}

/// A single change observed on a watched kind.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// What happened.
    pub event_type: WatchEventType,
    /// The object after the change (before it, for deletes).
    pub object: StoredObject,
}

impl WatchEvent {
    /// Creates a watch event.
    pub fn new(event_type: WatchEventType, object: StoredObject) -> Self {
        Self { event_type, object }
    }
}
