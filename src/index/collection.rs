use std::collections::HashMap;

use log::debug;
use serde_json::Value;

use crate::core::error::Result;
use crate::core::types::{float_to_key, SeqId, UNRESOLVED_SEQ_ID};
use crate::filter::ast::FilterNode;
use crate::filter::parser::FilterParser;
use crate::filter::result_iterator::FilterResultIterator;
use crate::index::registry::CollectionRegistry;
use crate::numeric::num_index::NumericIndex;
use crate::posting::handle::PostingHandle;
use crate::schema::schema::{CollectionSchema, DirtyValues, FieldType, IndexOperation};
use crate::schema::validator::DocumentValidator;

/// In-memory indexes of one collection: per-field token posting sets,
/// per-field numeric trees, reference-helper trees, and the universe of live
/// seq_ids. Writes assume the single-writer discipline; the owner serializes
/// them against reads.
#[derive(Debug)]
pub struct CollectionIndex {
    name: String,
    schema: CollectionSchema,
    token_index: HashMap<String, HashMap<String, PostingHandle>>,
    numeric_index: HashMap<String, NumericIndex>,
    /// helper field name -> (referenced seq_id -> our seq_ids)
    reference_index: HashMap<String, NumericIndex>,
    seq_ids: PostingHandle,
    next_seq_id: SeqId,
}

impl CollectionIndex {
    pub fn new(name: &str, schema: CollectionSchema) -> Self {
        CollectionIndex {
            name: name.to_string(),
            schema,
            token_index: HashMap::new(),
            numeric_index: HashMap::new(),
            reference_index: HashMap::new(),
            seq_ids: PostingHandle::create(&[]),
            next_seq_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn num_documents(&self) -> u32 {
        self.seq_ids.num_ids()
    }

    /// Universe of live seq_ids; negations subtract from this set.
    pub fn seq_ids(&self) -> &PostingHandle {
        &self.seq_ids
    }

    pub fn token_handle(&self, field: &str, token: &str) -> Option<&PostingHandle> {
        self.token_index.get(field)?.get(token)
    }

    pub fn numeric_index(&self, field: &str) -> Option<&NumericIndex> {
        self.numeric_index.get(field)
    }

    pub fn reference_index(&self, helper_field: &str) -> Option<&NumericIndex> {
        self.reference_index.get(helper_field)
    }

    /// Validate (Create + coerce-or-reject) and index a document. The
    /// convenience path for single-collection use; reference helpers are
    /// populated by the registry-level write path.
    pub fn add_document(&mut self, document: &mut Value) -> Result<SeqId> {
        self.add_document_with(document, IndexOperation::Create, DirtyValues::CoerceOrReject)
    }

    pub fn add_document_with(
        &mut self,
        document: &mut Value,
        op: IndexOperation,
        dirty_values: DirtyValues,
    ) -> Result<SeqId> {
        DocumentValidator::validate(document, &self.schema, op, dirty_values)?;
        Ok(self.index_document(document))
    }

    /// Index an already validated (coerced) document and return its seq_id.
    pub fn index_document(&mut self, document: &Value) -> SeqId {
        let seq_id = self.next_seq_id;
        self.next_seq_id += 1;
        self.seq_ids.upsert(seq_id);

        for i in 0..self.schema.fields.len() {
            let field = self.schema.fields[i].clone();

            if let Some(value) = document.get(&field.name) {
                self.index_field_value(seq_id, &field.name, field.field_type, value);
            }

            if field.reference.is_some() {
                let helper = field.reference_helper_name();
                if let Some(value) = document.get(&helper) {
                    self.index_reference_helper(seq_id, &helper, value);
                }
            }
        }

        debug!("collection `{}` indexed seq_id {}", self.name, seq_id);
        seq_id
    }

    /// Pre-tokenized ingest path: the tokenizer is an external collaborator,
    /// this indexes its (token, ...) output for a string field.
    pub fn index_tokens(&mut self, seq_id: SeqId, field: &str, tokens: &[&str]) {
        self.seq_ids.upsert(seq_id);
        let field_tokens = self.token_index.entry(field.to_string()).or_default();

        for &token in tokens {
            field_tokens
                .entry(token.to_string())
                .or_insert_with(|| PostingHandle::create(&[]))
                .upsert(seq_id);
        }
    }

    fn index_token(&mut self, seq_id: SeqId, field: &str, token: &str) {
        self.token_index
            .entry(field.to_string())
            .or_default()
            .entry(token.to_string())
            .or_insert_with(|| PostingHandle::create(&[]))
            .upsert(seq_id);
    }

    fn index_numeric(&mut self, seq_id: SeqId, field: &str, key: i64) {
        self.numeric_index
            .entry(field.to_string())
            .or_default()
            .insert(key, seq_id);
    }

    fn index_field_value(
        &mut self,
        seq_id: SeqId,
        field: &str,
        field_type: FieldType,
        value: &Value,
    ) {
        match field_type {
            FieldType::String => {
                if let Some(s) = value.as_str() {
                    self.index_token(seq_id, field, s);
                }
            }
            FieldType::StringArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(s) = item.as_str() {
                            self.index_token(seq_id, field, s);
                        }
                    }
                }
            }
            FieldType::Int32 | FieldType::Int64 => {
                if let Some(v) = value.as_i64() {
                    self.index_numeric(seq_id, field, v);
                }
            }
            FieldType::Float => {
                if let Some(v) = value.as_f64() {
                    self.index_numeric(seq_id, field, float_to_key(v));
                }
            }
            FieldType::Bool => {
                if let Some(v) = value.as_bool() {
                    self.index_numeric(seq_id, field, v as i64);
                }
            }
            FieldType::Int32Array | FieldType::Int64Array => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_i64() {
                            self.index_numeric(seq_id, field, v);
                        }
                    }
                }
            }
            FieldType::FloatArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_f64() {
                            self.index_numeric(seq_id, field, float_to_key(v));
                        }
                    }
                }
            }
            FieldType::BoolArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_bool() {
                            self.index_numeric(seq_id, field, v as i64);
                        }
                    }
                }
            }
            // geo search is outside this core; geopoints are validated only
            FieldType::Geopoint | FieldType::GeopointArray => {}
        }
    }

    /// Helper values are a seq_id, an array of seq_ids, or an array of
    /// [index_in_object_array, seq_id] pairs. The unresolved sentinel is not
    /// indexed.
    fn index_reference_helper(&mut self, seq_id: SeqId, helper: &str, value: &Value) {
        let mut insert = |target: u64| {
            if target != UNRESOLVED_SEQ_ID as u64 {
                self.reference_index
                    .entry(helper.to_string())
                    .or_default()
                    .insert(target as i64, seq_id);
            }
        };

        if let Some(target) = value.as_u64() {
            insert(target);
            return;
        }

        if let Some(items) = value.as_array() {
            for item in items {
                if let Some(target) = item.as_u64() {
                    insert(target);
                } else if let Some(pair) = item.as_array() {
                    if let Some(target) = pair.get(1).and_then(Value::as_u64) {
                        insert(target);
                    }
                }
            }
        }
    }

    /// Remove a document's contributions from every index. The caller
    /// supplies the document as it was indexed.
    pub fn remove_document(&mut self, seq_id: SeqId, document: &Value) {
        for i in 0..self.schema.fields.len() {
            let field = self.schema.fields[i].clone();

            if let Some(value) = document.get(&field.name) {
                self.remove_field_value(seq_id, &field.name, field.field_type, value);
            }

            if field.reference.is_some() {
                let helper = field.reference_helper_name();
                if let Some(value) = document.get(&helper) {
                    self.remove_reference_helper(seq_id, &helper, value);
                }
            }
        }

        self.seq_ids.erase(seq_id);
    }

    fn remove_token(&mut self, seq_id: SeqId, field: &str, token: &str) {
        if let Some(field_tokens) = self.token_index.get_mut(field) {
            if let Some(handle) = field_tokens.get_mut(token) {
                handle.erase(seq_id);
                if handle.num_ids() == 0 {
                    field_tokens.remove(token);
                }
            }
        }
    }

    fn remove_numeric(&mut self, seq_id: SeqId, field: &str, key: i64) {
        if let Some(tree) = self.numeric_index.get_mut(field) {
            tree.remove(key, seq_id);
        }
    }

    fn remove_field_value(
        &mut self,
        seq_id: SeqId,
        field: &str,
        field_type: FieldType,
        value: &Value,
    ) {
        match field_type {
            FieldType::String => {
                if let Some(s) = value.as_str() {
                    self.remove_token(seq_id, field, s);
                }
            }
            FieldType::StringArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(s) = item.as_str() {
                            self.remove_token(seq_id, field, s);
                        }
                    }
                }
            }
            FieldType::Int32 | FieldType::Int64 => {
                if let Some(v) = value.as_i64() {
                    self.remove_numeric(seq_id, field, v);
                }
            }
            FieldType::Float => {
                if let Some(v) = value.as_f64() {
                    self.remove_numeric(seq_id, field, float_to_key(v));
                }
            }
            FieldType::Bool => {
                if let Some(v) = value.as_bool() {
                    self.remove_numeric(seq_id, field, v as i64);
                }
            }
            FieldType::Int32Array | FieldType::Int64Array => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_i64() {
                            self.remove_numeric(seq_id, field, v);
                        }
                    }
                }
            }
            FieldType::FloatArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_f64() {
                            self.remove_numeric(seq_id, field, float_to_key(v));
                        }
                    }
                }
            }
            FieldType::BoolArray => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(v) = item.as_bool() {
                            self.remove_numeric(seq_id, field, v as i64);
                        }
                    }
                }
            }
            FieldType::Geopoint | FieldType::GeopointArray => {}
        }
    }

    fn remove_reference_helper(&mut self, seq_id: SeqId, helper: &str, value: &Value) {
        let Some(tree) = self.reference_index.get_mut(helper) else {
            return;
        };

        if let Some(target) = value.as_u64() {
            if target != UNRESOLVED_SEQ_ID as u64 {
                tree.remove(target as i64, seq_id);
            }
            return;
        }

        if let Some(items) = value.as_array() {
            for item in items {
                let target = item
                    .as_u64()
                    .or_else(|| item.as_array().and_then(|pair| pair.get(1)?.as_u64()));
                if let Some(target) = target {
                    if target != UNRESOLVED_SEQ_ID as u64 {
                        tree.remove(target as i64, seq_id);
                    }
                }
            }
        }
    }

    /// Build a lazy iterator for a filter expression.
    pub fn filter_iterator<'a>(
        &'a self,
        filter: &str,
        registry: Option<&CollectionRegistry>,
        timeout_us: Option<u64>,
    ) -> Result<FilterResultIterator<'a>> {
        let node = FilterParser::new().parse(filter)?;
        FilterResultIterator::new(&node, self, registry, timeout_us)
    }

    pub fn filter_node_iterator<'a>(
        &'a self,
        node: &FilterNode,
        registry: Option<&CollectionRegistry>,
        timeout_us: Option<u64>,
    ) -> Result<FilterResultIterator<'a>> {
        FilterResultIterator::new(node, self, registry, timeout_us)
    }

    /// Evaluate a filter expression to a sorted id array.
    pub fn filter_ids(
        &self,
        filter: &str,
        registry: Option<&CollectionRegistry>,
    ) -> Result<Vec<SeqId>> {
        let mut iterator = self.filter_iterator(filter, registry, None)?;
        Ok(iterator.to_filter_id_array())
    }

    pub fn filter_node_ids(
        &self,
        node: &FilterNode,
        registry: Option<&CollectionRegistry>,
    ) -> Result<Vec<SeqId>> {
        let mut iterator = self.filter_node_iterator(node, registry, None)?;
        Ok(iterator.to_filter_id_array())
    }
}
