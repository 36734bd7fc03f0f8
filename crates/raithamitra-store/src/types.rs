//! Core types for documents, queries, and writes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Document fields, as stored.
pub type Fields = serde_json::Map<String, Value>;

/// An identity handle issued by the identity provider.
///
/// Opaque and stable for the lifetime of an account. Profiles are keyed by it
/// and owned records point at it through their owner-reference fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Role a user signed in as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Farmer,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "Farmer",
            Role::Customer => "Customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing a role name.
#[derive(Debug, Error)]
#[error("unknown role: {0} (expected Farmer or Customer)")]
pub struct RoleParseError(String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "farmer" => Ok(Role::Farmer),
            "customer" => Ok(Role::Customer),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}

/// Error when parsing a document path.
#[derive(Debug, Error)]
#[error("invalid document path: {0}")]
pub struct DocPathError(String);

/// Reference to a single document.
///
/// Paths have the format `{collection}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parse a `{collection}/{id}` path.
    ///
    /// # Example
    ///
    /// ```
    /// use raithamitra_store::DocRef;
    ///
    /// let doc = DocRef::parse("products/p1").unwrap();
    /// assert_eq!(doc.collection, "products");
    /// assert_eq!(doc.id, "p1");
    /// ```
    pub fn parse(path: &str) -> Result<Self, DocPathError> {
        let (collection, id) = path
            .split_once('/')
            .ok_or_else(|| DocPathError(format!("expected collection/id: {path}")))?;

        if collection.is_empty() || id.is_empty() || id.contains('/') {
            return Err(DocPathError(format!("expected collection/id: {path}")));
        }

        Ok(Self::new(collection, id))
    }

    /// The `{collection}/{id}` path.
    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub reference: DocRef,
    pub fields: Fields,
    /// Store-issued version, usable in a [`Precondition::Version`].
    pub version: Option<String>,
}

impl Document {
    pub fn id(&self) -> &str {
        &self.reference.id
    }

    /// String value of a top-level field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Whether a top-level field is present and not null.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.is_null())
    }
}

/// A single filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field == value`
    Eq { field: String, value: Value },
    /// `field IN values`
    In { field: String, values: Vec<Value> },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Eq { field, .. } | Predicate::In { field, .. } => field,
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Predicate::Eq { field, value } => fields.get(field) == Some(value),
            Predicate::In { field, values } => fields
                .get(field)
                .is_some_and(|actual| values.contains(actual)),
        }
    }
}

/// A collection query whose predicates are AND-combined.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub predicates: Vec<Predicate>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicates: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.predicates.push(Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.predicates.iter().all(|p| p.matches(fields))
    }
}

/// How a `set` treats fields already on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document.
    Overwrite,
    /// Replace only the top-level fields being written.
    Merge,
}

/// Condition the stored document must satisfy for a write to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    #[default]
    None,
    /// The document must not exist yet.
    Missing,
    /// The document must exist.
    Exists,
    /// The document must still be at this version.
    Version(String),
}

impl Precondition {
    /// Precondition that holds only if the document is unchanged since it was read.
    ///
    /// `None` means the document was absent when read.
    pub fn unchanged_since(read: Option<&Document>) -> Self {
        match read.and_then(|d| d.version.clone()) {
            Some(version) => Precondition::Version(version),
            None if read.is_some() => Precondition::Exists,
            None => Precondition::Missing,
        }
    }
}
