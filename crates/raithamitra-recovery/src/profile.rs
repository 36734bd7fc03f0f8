//! Typed view over a user profile document.

use raithamitra_store::{
    DocRef, Document, Fields, Identity, MIGRATED_FROM_FIELD, MIGRATED_TO_FIELD, PHONE_FIELD,
    ROLE_FIELD, Role, USERS_COLLECTION,
};

/// A profile document in the users collection.
///
/// The document id is the owning identity; all other attributes are kept as
/// raw fields so merges carry over whatever the app stored.
#[derive(Debug, Clone)]
pub struct Profile {
    document: Document,
}

impl Profile {
    pub fn reference(identity: &Identity) -> DocRef {
        DocRef::new(USERS_COLLECTION, identity.as_str())
    }

    pub fn identity(&self) -> Identity {
        Identity::from(self.document.id())
    }

    pub fn phone(&self) -> Option<&str> {
        self.document.str_field(PHONE_FIELD)
    }

    pub fn role(&self) -> Option<Role> {
        self.document.str_field(ROLE_FIELD)?.parse().ok()
    }

    /// Identity this profile was recovered from, if any.
    pub fn migrated_from(&self) -> Option<Identity> {
        self.document.str_field(MIGRATED_FROM_FIELD).map(Identity::from)
    }

    /// Identity that claimed this profile in a recovery, if any.
    pub fn migrated_to(&self) -> Option<Identity> {
        self.document.str_field(MIGRATED_TO_FIELD).map(Identity::from)
    }

    /// Whether a recovery has already been applied to this profile.
    ///
    /// Any non-null `migratedFrom` counts, whatever its type.
    pub fn is_recovered(&self) -> bool {
        self.document.has_field(MIGRATED_FROM_FIELD)
    }

    /// Whether a later recovery retired this profile.
    pub fn is_claimed(&self) -> bool {
        self.document.has_field(MIGRATED_TO_FIELD)
    }

    pub fn fields(&self) -> &Fields {
        &self.document.fields
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl From<Document> for Profile {
    fn from(document: Document) -> Self {
        Self { document }
    }
}
