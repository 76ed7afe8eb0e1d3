use serde::{Serialize, Deserialize};

/// Suffix of the hidden sibling field that persists resolved reference
/// seq_ids for a reference field.
pub const REFERENCE_HELPER_SUFFIX: &str = "$REF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float,
    Bool,
    Geopoint,
    StringArray,
    Int32Array,
    Int64Array,
    FloatArray,
    BoolArray,
    GeopointArray,
}

impl FieldType {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            FieldType::StringArray
                | FieldType::Int32Array
                | FieldType::Int64Array
                | FieldType::FloatArray
                | FieldType::BoolArray
                | FieldType::GeopointArray
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int32
                | FieldType::Int64
                | FieldType::Float
                | FieldType::Bool
                | FieldType::Int32Array
                | FieldType::Int64Array
                | FieldType::FloatArray
                | FieldType::BoolArray
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::String | FieldType::StringArray)
    }
}

/// How to handle a JSON value whose type does not match the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirtyValues {
    Reject,
    Drop,
    CoerceOrReject,
    CoerceOrDrop,
}

/// Write operation kind; decides which fields must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOperation {
    Create,
    Update,
    Upsert,
    Emplace,
}

impl IndexOperation {
    /// Update-like operations carry partial documents, so missing required
    /// fields are tolerated.
    pub fn is_partial(&self) -> bool {
        matches!(self, IndexOperation::Update | IndexOperation::Emplace)
    }
}

/// Declared link from a field to another collection's field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub collection: String,
    pub field: String,
    /// Async references tolerate a missing target collection; the helper
    /// records the unresolved sentinel instead.
    pub is_async: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub optional: bool,
    /// Field declared inside an array of objects; its values arrive as a
    /// parallel array.
    pub nested: bool,
    /// For FloatArray vector fields: required dimensionality, 0 = free.
    pub num_dim: usize,
    pub reference: Option<ReferenceInfo>,
}

impl FieldSchema {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.to_string(),
            field_type,
            optional: false,
            nested: false,
            num_dim: 0,
            reference: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    pub fn with_num_dim(mut self, num_dim: usize) -> Self {
        self.num_dim = num_dim;
        self
    }

    pub fn with_reference(mut self, collection: &str, field: &str, is_async: bool) -> Self {
        self.reference = Some(ReferenceInfo {
            collection: collection.to_string(),
            field: field.to_string(),
            is_async,
        });
        self
    }

    /// Name of the sibling field persisting resolved reference seq_ids.
    pub fn reference_helper_name(&self) -> String {
        format!("{}{}", self.name, REFERENCE_HELPER_SUFFIX)
    }

    /// A dotted name declares a field inside an array of objects; the part
    /// before the first dot is the enclosing array field in the document.
    pub fn object_array_root(&self) -> Option<(&str, &str)> {
        self.name.split_once('.')
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        CollectionSchema { fields: Vec::new() }
    }

    pub fn add_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_string_field(self, name: &str) -> Self {
        self.add_field(FieldSchema::new(name, FieldType::String))
    }

    pub fn add_string_array_field(self, name: &str) -> Self {
        self.add_field(FieldSchema::new(name, FieldType::StringArray))
    }

    pub fn add_int_field(self, name: &str) -> Self {
        self.add_field(FieldSchema::new(name, FieldType::Int64))
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields declaring a reference to another collection.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.reference.is_some())
    }

    /// The field referencing the given collection, if declared.
    pub fn reference_field_for(&self, collection: &str) -> Option<&FieldSchema> {
        self.reference_fields().find(|f| {
            f.reference
                .as_ref()
                .is_some_and(|r| r.collection == collection)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_lookup() {
        let schema = CollectionSchema::new()
            .add_string_field("name")
            .add_string_array_field("tags")
            .add_field(FieldSchema::new("age", FieldType::Int32).optional());

        assert_eq!(schema.get_field("age").unwrap().field_type, FieldType::Int32);
        assert!(schema.get_field("age").unwrap().optional);
        assert!(schema.get_field("missing").is_none());
    }

    #[test]
    fn test_reference_helper_name() {
        let field = FieldSchema::new("product_id", FieldType::String)
            .with_reference("products", "id", false);
        assert_eq!(field.reference_helper_name(), "product_id$REF");
    }

    #[test]
    fn test_reference_field_for() {
        let schema = CollectionSchema::new().add_field(
            FieldSchema::new("customer_id", FieldType::String)
                .with_reference("customers", "id", false),
        );

        assert!(schema.reference_field_for("customers").is_some());
        assert!(schema.reference_field_for("orders").is_none());
    }

    #[test]
    fn test_object_array_root() {
        let field = FieldSchema::new("items.product_id", FieldType::StringArray)
            .nested()
            .with_reference("products", "id", false);
        assert_eq!(field.object_array_root(), Some(("items", "product_id")));

        let plain = FieldSchema::new("name", FieldType::String);
        assert_eq!(plain.object_array_root(), None);
    }

    #[test]
    fn test_field_type_predicates() {
        assert!(FieldType::Int32Array.is_array());
        assert!(FieldType::Int32Array.is_numeric());
        assert!(FieldType::StringArray.is_string());
        assert!(!FieldType::Geopoint.is_numeric());
    }
}
