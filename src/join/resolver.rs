use serde_json::{json, Value};

use crate::core::error::{Error, Result};
use crate::core::types::{SeqId, UNRESOLVED_SEQ_ID};
use crate::filter::ast::{FilterNode, FilterOp, FilterValue};
use crate::index::collection::CollectionIndex;
use crate::index::registry::CollectionRegistry;
use crate::schema::schema::{CollectionSchema, ReferenceInfo};

/// Resolves declared references at write time into persisted helper fields,
/// and reference-join filter leaves at query time into id sets.
pub struct JoinResolver;

impl JoinResolver {
    /// Populate the `F$REF` helper for every reference field present in the
    /// document. References must resolve to exactly one target document;
    /// async references tolerate a missing target collection by recording
    /// the unresolved sentinel.
    pub fn populate_reference_helpers(
        document: &mut Value,
        schema: &CollectionSchema,
        registry: Option<&CollectionRegistry>,
    ) -> Result<()> {
        for field in schema.reference_fields() {
            let info = field.reference.as_ref().unwrap();
            let helper = field.reference_helper_name();

            // field declared inside an array of objects: helper stores
            // [index_in_object_array, seq_id] pairs
            if let Some((root, sub_field)) = field.object_array_root() {
                let Some(items) = document.get(root).and_then(Value::as_array).cloned() else {
                    continue;
                };

                let mut pairs = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let Some(value) = item.get(sub_field) else {
                        continue;
                    };
                    let seq_id = Self::resolve_single(info, value, registry)?;
                    pairs.push(json!([i, seq_id]));
                }

                document[&helper] = Value::Array(pairs);
                continue;
            }

            let Some(value) = document.get(&field.name).cloned() else {
                continue;
            };

            if let Some(values) = value.as_array() {
                let mut resolved = Vec::with_capacity(values.len());
                for item in values {
                    resolved.push(json!(Self::resolve_single(info, item, registry)?));
                }
                document[&helper] = Value::Array(resolved);
            } else {
                document[&helper] = json!(Self::resolve_single(info, &value, registry)?);
            }
        }

        Ok(())
    }

    fn resolve_single(
        info: &ReferenceInfo,
        value: &Value,
        registry: Option<&CollectionRegistry>,
    ) -> Result<SeqId> {
        let target = registry.and_then(|r| r.get(&info.collection));
        let Some(target) = target else {
            if info.is_async {
                return Ok(UNRESOLVED_SEQ_ID);
            }
            return Err(Error::reference(format!(
                "Referenced collection `{}` was not found.",
                info.collection
            )));
        };

        let filter_value = json_scalar_to_filter_value(value, &info.collection)?;
        let node = FilterNode::leaf(&info.field, FilterOp::Eq, vec![filter_value]);

        let ids = {
            let guard = target.read();
            guard.filter_node_ids(&node, registry)?
        };

        if ids.len() != 1 {
            return Err(Error::reference(format!(
                "Foreign-key constraint violated: `{}:={}` matched {} documents in the collection `{}`.",
                info.field,
                value,
                ids.len(),
                info.collection
            )));
        }

        Ok(ids[0])
    }

    /// Query-time resolution of a `$Collection(inner)` leaf: run the inner
    /// filter against the referenced collection, then translate its seq_ids
    /// through the persisted helper index into this collection's seq_ids.
    pub fn resolve_reference_filter(
        collection: &str,
        inner: &FilterNode,
        current: &CollectionIndex,
        registry: Option<&CollectionRegistry>,
    ) -> Result<Vec<SeqId>> {
        let field = current
            .schema()
            .reference_field_for(collection)
            .ok_or_else(|| {
                Error::reference(format!(
                    "Could not find a reference to the collection `{}` in the schema of `{}`.",
                    collection,
                    current.name()
                ))
            })?;

        let target = registry.and_then(|r| r.get(collection)).ok_or_else(|| {
            Error::reference(format!(
                "Referenced collection `{}` was not found.",
                collection
            ))
        })?;

        let target_ids = {
            let guard = target.read();
            guard.filter_node_ids(inner, registry)?
        };

        let helper = field.reference_helper_name();
        let Some(reference_index) = current.reference_index(&helper) else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        for target_id in target_ids {
            if let Some(handle) = reference_index.get(target_id as i64) {
                handle.uncompress_into(&mut result);
            }
        }

        result.sort_unstable();
        result.dedup();
        Ok(result)
    }
}

fn json_scalar_to_filter_value(value: &Value, collection: &str) -> Result<FilterValue> {
    if let Some(s) = value.as_str() {
        return Ok(FilterValue::Str(s.to_string()));
    }
    if let Some(v) = value.as_i64() {
        return Ok(FilterValue::Int(v));
    }
    if let Some(v) = value.as_f64() {
        return Ok(FilterValue::Float(v));
    }
    if let Some(v) = value.as_bool() {
        return Ok(FilterValue::Bool(v));
    }

    Err(Error::reference(format!(
        "Reference value `{}` into collection `{}` must be a scalar.",
        value, collection
    )))
}
