use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SeqId;
use crate::index::collection::CollectionIndex;
use crate::join::resolver::JoinResolver;
use crate::schema::schema::{CollectionSchema, DirtyValues, IndexOperation};
use crate::schema::validator::DocumentValidator;

/// Named collections behind per-collection reader-writer locks. This is the
/// layer that enforces the single-writer / multi-reader discipline the
/// posting engine assumes.
pub struct CollectionRegistry {
    collections: RwLock<HashMap<String, Arc<RwLock<CollectionIndex>>>>,
    config: EngineConfig,
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        CollectionRegistry {
            collections: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn create_collection(
        &self,
        name: &str,
        schema: CollectionSchema,
    ) -> Result<Arc<RwLock<CollectionIndex>>> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("A collection with name `{}` already exists.", name),
            ));
        }

        let collection = Arc::new(RwLock::new(CollectionIndex::new(name, schema)));
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RwLock<CollectionIndex>>> {
        self.collections.read().get(name).cloned()
    }

    /// Validate, resolve references, and index a document. Reference
    /// resolution runs before the target collection's write lock is taken,
    /// so resolving against other collections (or this one) cannot deadlock.
    pub fn add_document(
        &self,
        collection: &str,
        document: &mut Value,
        op: IndexOperation,
        dirty_values: DirtyValues,
    ) -> Result<SeqId> {
        let handle = self.get(collection).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Collection `{}` not found.", collection),
            )
        })?;

        let schema = handle.read().schema().clone();
        DocumentValidator::validate(document, &schema, op, dirty_values)?;
        JoinResolver::populate_reference_helpers(document, &schema, Some(self))?;

        Ok(handle.write().index_document(document))
    }

    /// Evaluate a filter against a collection under its read lock.
    pub fn filter_ids(
        &self,
        collection: &str,
        filter: &str,
        timeout_us: Option<u64>,
    ) -> Result<Vec<SeqId>> {
        let handle = self.get(collection).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Collection `{}` not found.", collection),
            )
        })?;

        let timeout_us = timeout_us.or(self.config.filter_timeout_us);
        let guard = handle.read();
        let mut iterator = guard.filter_iterator(filter, Some(self), timeout_us)?;
        Ok(iterator.to_filter_id_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_duplicate() {
        let registry = CollectionRegistry::new();
        assert!(registry
            .create_collection("books", CollectionSchema::new().add_string_field("title"))
            .is_ok());
        let err = registry
            .create_collection("books", CollectionSchema::new())
            .unwrap_err();
        assert_eq!(err.context, "A collection with name `books` already exists.");
    }

    #[test]
    fn test_add_and_filter() {
        let registry = CollectionRegistry::new();
        registry
            .create_collection("books", CollectionSchema::new().add_string_field("title"))
            .unwrap();

        let mut doc = json!({"title": "dune"});
        let id = registry
            .add_document("books", &mut doc, IndexOperation::Create, DirtyValues::Reject)
            .unwrap();
        assert_eq!(id, 0);

        assert_eq!(
            registry.filter_ids("books", "title:dune", None).unwrap(),
            vec![0]
        );
        assert!(registry.filter_ids("missing", "a:1", None).is_err());
    }
}
