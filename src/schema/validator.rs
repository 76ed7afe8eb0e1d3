use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::schema::schema::{CollectionSchema, DirtyValues, FieldSchema, FieldType, IndexOperation};

/// Outcome of coercing one value: kept (possibly rewritten in place) or
/// dropped per the dirty-value policy. The caller erases dropped fields and
/// array elements.
#[derive(Debug, PartialEq, Eq)]
enum Coerced {
    Kept,
    Dropped,
}

/// Validates a JSON document against a schema, coercing values in place per
/// the dirty-value policy. Fields not declared in the schema pass through
/// untouched.
pub struct DocumentValidator;

impl DocumentValidator {
    pub fn validate(
        document: &mut Value,
        schema: &CollectionSchema,
        op: IndexOperation,
        dirty_values: DirtyValues,
    ) -> Result<()> {
        if !document.is_object() {
            return Err(Error::validation("Document must be a JSON object."));
        }

        for field in &schema.fields {
            let present = document
                .as_object()
                .is_some_and(|obj| obj.contains_key(&field.name));

            if !present {
                if field.optional || op.is_partial() {
                    continue;
                }
                return Err(Error::validation(format!(
                    "Field `{}` has been declared in the schema, but is not found in the document.",
                    field.name
                )));
            }

            Self::coerce_field(field, document, dirty_values)?;
        }

        Ok(())
    }

    fn coerce_field(
        field: &FieldSchema,
        document: &mut Value,
        dirty_values: DirtyValues,
    ) -> Result<()> {
        let obj = document.as_object_mut().unwrap();

        if field.field_type.is_array() {
            return Self::coerce_array_field(field, obj, dirty_values);
        }

        let item = obj.get_mut(&field.name).unwrap();

        let outcome = match field.field_type {
            FieldType::String if !item.is_string() => {
                Self::coerce_string(field, item, dirty_values, false)?
            }
            FieldType::Int32 => {
                if !is_integer(item) {
                    let coerced = Self::coerce_integer(field, item, dirty_values, false, true)?;
                    if coerced == Coerced::Dropped {
                        obj.remove(&field.name);
                        return Ok(());
                    }
                }
                return Self::check_int32_bounds(field, obj, dirty_values);
            }
            FieldType::Int64 if !is_integer(item) => {
                Self::coerce_integer(field, item, dirty_values, false, false)?
            }
            FieldType::Float if !item.is_number() => {
                // is_number admits integers into float fields
                Self::coerce_float(field, item, dirty_values, false)?
            }
            FieldType::Bool if !item.is_boolean() => {
                Self::coerce_bool(field, item, dirty_values, false)?
            }
            FieldType::Geopoint => {
                return Self::coerce_geopoint(field, item, dirty_values).map(|_| ());
            }
            _ => Coerced::Kept,
        };

        if outcome == Coerced::Dropped {
            obj.remove(&field.name);
        }

        Ok(())
    }

    fn coerce_array_field(
        field: &FieldSchema,
        obj: &mut serde_json::Map<String, Value>,
        dirty_values: DirtyValues,
    ) -> Result<()> {
        let item = obj.get_mut(&field.name).unwrap();

        if !item.is_array() {
            if field.optional
                && matches!(dirty_values, DirtyValues::Drop | DirtyValues::CoerceOrDrop)
            {
                obj.remove(&field.name);
                return Ok(());
            }
            return Err(Error::validation(format!(
                "Field `{}` must be an array.",
                field.name
            )));
        }

        // flat [lat1, lng1, lat2, lng2, ...] geopoints of a nested object array
        let first_is_number = item
            .as_array()
            .unwrap()
            .first()
            .is_some_and(Value::is_number);
        if field.nested && field.field_type == FieldType::GeopointArray && first_is_number {
            let elems = item.as_array_mut().unwrap();
            if !elems.is_empty() && elems.len() % 2 != 0 {
                return Err(Error::validation(format!(
                    "Nested field `{}` does not contain valid geopoint values.",
                    field.name
                )));
            }

            for pair in elems.chunks_mut(2) {
                for coord in pair {
                    if !coord.is_number() {
                        Self::coerce_coordinate(field, coord)?;
                    }
                }
            }
            return Ok(());
        }

        if field.field_type == FieldType::FloatArray
            && field.num_dim != 0
            && item.as_array().unwrap().len() != field.num_dim
        {
            return Err(Error::validation(format!(
                "Field `{}` must have {} dimensions.",
                field.name, field.num_dim
            )));
        }

        let elems = item.as_array_mut().unwrap();
        let mut i = 0;
        while i < elems.len() {
            let elem = &mut elems[i];

            let outcome = match field.field_type {
                FieldType::StringArray if !elem.is_string() => {
                    Self::coerce_string(field, elem, dirty_values, true)?
                }
                FieldType::Int32Array if !is_integer(elem) => {
                    Self::coerce_integer(field, elem, dirty_values, true, true)?
                }
                FieldType::Int64Array if !is_integer(elem) => {
                    Self::coerce_integer(field, elem, dirty_values, true, false)?
                }
                FieldType::FloatArray if !elem.is_number() => {
                    Self::coerce_float(field, elem, dirty_values, true)?
                }
                FieldType::BoolArray if !elem.is_boolean() => {
                    Self::coerce_bool(field, elem, dirty_values, true)?
                }
                FieldType::GeopointArray => {
                    Self::coerce_geopoint_element(field, elem, dirty_values)?;
                    Coerced::Kept
                }
                FieldType::Int32Array => {
                    if elem.as_i64().is_some_and(|v| v > i32::MAX as i64) {
                        return Err(Error::validation(format!(
                            "Field `{}` exceeds maximum value of int32.",
                            field.name
                        )));
                    }
                    Coerced::Kept
                }
                _ => Coerced::Kept,
            };

            if outcome == Coerced::Dropped {
                elems.remove(i);
            } else {
                i += 1;
            }
        }

        Ok(())
    }

    /// Shared reject/drop decision for an uncoercible value.
    fn reject_or_drop(
        field: &FieldSchema,
        item: &Value,
        dirty_values: DirtyValues,
        is_array: bool,
        type_word: &str,
        article: &str,
    ) -> Result<Coerced> {
        let can_drop = matches!(dirty_values, DirtyValues::Drop | DirtyValues::CoerceOrDrop);

        if can_drop && field.optional {
            return Ok(Coerced::Dropped);
        }

        if field.nested && item.is_array() {
            return Err(Error::validation(format!(
                "Field `{}` has an incorrect type. \
                 Hint: field inside an array of objects must be an array type as well.",
                field.name
            )));
        }

        let suffix = if is_array {
            "an array of".to_string()
        } else {
            article.to_string()
        };
        Err(Error::validation(format!(
            "Field `{}` must be {} {}.",
            field.name, suffix, type_word
        )))
    }

    fn coerce_string(
        field: &FieldSchema,
        item: &mut Value,
        dirty_values: DirtyValues,
        is_array: bool,
    ) -> Result<Coerced> {
        match dirty_values {
            DirtyValues::Reject | DirtyValues::Drop => {
                return Self::reject_or_drop(field, item, dirty_values, is_array, "string", "a");
            }
            DirtyValues::CoerceOrReject | DirtyValues::CoerceOrDrop => {}
        }

        if let Some(v) = item.as_i64() {
            *item = Value::String(v.to_string());
        } else if let Some(v) = item.as_u64() {
            *item = Value::String(v.to_string());
        } else if let Some(v) = item.as_f64() {
            *item = Value::String(v.to_string());
        } else if let Some(v) = item.as_bool() {
            *item = Value::String(if v { "true" } else { "false" }.to_string());
        } else {
            return Self::reject_or_drop(field, item, dirty_values, is_array, "string", "a");
        }

        Ok(Coerced::Kept)
    }

    fn coerce_integer(
        field: &FieldSchema,
        item: &mut Value,
        dirty_values: DirtyValues,
        is_array: bool,
        is_int32: bool,
    ) -> Result<Coerced> {
        let type_word = if is_int32 { "int32" } else { "int64" };

        match dirty_values {
            DirtyValues::Reject | DirtyValues::Drop => {
                return Self::reject_or_drop(field, item, dirty_values, is_array, type_word, "an");
            }
            DirtyValues::CoerceOrReject | DirtyValues::CoerceOrDrop => {}
        }

        if let Some(v) = item.as_f64() {
            *item = Value::from(v as i64);
        } else if let Some(v) = item.as_bool() {
            *item = Value::from(v as i64);
        } else if let Some(parsed) = item.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
            if is_int32 && (parsed > i32::MAX as i64 || parsed < i32::MIN as i64) {
                return Self::reject_or_drop(field, item, dirty_values, is_array, type_word, "an");
            }
            *item = Value::from(parsed);
        } else {
            return Self::reject_or_drop(field, item, dirty_values, is_array, type_word, "an");
        }

        Ok(Coerced::Kept)
    }

    fn check_int32_bounds(
        field: &FieldSchema,
        obj: &mut serde_json::Map<String, Value>,
        dirty_values: DirtyValues,
    ) -> Result<()> {
        let over = obj
            .get(&field.name)
            .and_then(Value::as_i64)
            .is_some_and(|v| v > i32::MAX as i64)
            || obj.get(&field.name).and_then(Value::as_u64).is_some_and(|v| v > i32::MAX as u64);

        if over {
            if field.optional
                && matches!(dirty_values, DirtyValues::Drop | DirtyValues::CoerceOrReject)
            {
                obj.remove(&field.name);
            } else {
                return Err(Error::validation(format!(
                    "Field `{}` exceeds maximum value of int32.",
                    field.name
                )));
            }
        }

        Ok(())
    }

    fn coerce_float(
        field: &FieldSchema,
        item: &mut Value,
        dirty_values: DirtyValues,
        is_array: bool,
    ) -> Result<Coerced> {
        match dirty_values {
            DirtyValues::Reject | DirtyValues::Drop => {
                return Self::reject_or_drop(field, item, dirty_values, is_array, "float", "a");
            }
            DirtyValues::CoerceOrReject | DirtyValues::CoerceOrDrop => {}
        }

        if let Some(parsed) = item.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
            *item = Value::from(parsed);
        } else if let Some(v) = item.as_bool() {
            *item = Value::from(if v { 1.0 } else { 0.0 });
        } else {
            return Self::reject_or_drop(field, item, dirty_values, is_array, "float", "a");
        }

        Ok(Coerced::Kept)
    }

    fn coerce_bool(
        field: &FieldSchema,
        item: &mut Value,
        dirty_values: DirtyValues,
        is_array: bool,
    ) -> Result<Coerced> {
        match dirty_values {
            DirtyValues::Reject | DirtyValues::Drop => {
                return Self::reject_or_drop(field, item, dirty_values, is_array, "bool", "a");
            }
            DirtyValues::CoerceOrReject | DirtyValues::CoerceOrDrop => {}
        }

        if let Some(v) = item.as_i64() {
            if v == 0 || v == 1 {
                *item = Value::from(v == 1);
                return Ok(Coerced::Kept);
            }
        } else if let Some(s) = item.as_str() {
            if s.eq_ignore_ascii_case("true") {
                *item = Value::from(true);
                return Ok(Coerced::Kept);
            }
            if s.eq_ignore_ascii_case("false") {
                *item = Value::from(false);
                return Ok(Coerced::Kept);
            }
        }

        Self::reject_or_drop(field, item, dirty_values, is_array, "bool", "a")
    }

    /// A geopoint is a [lat, lng] pair; string coordinates are promoted to
    /// floats.
    fn coerce_geopoint(
        field: &FieldSchema,
        item: &mut Value,
        _dirty_values: DirtyValues,
    ) -> Result<Coerced> {
        let valid_shape = item.as_array().is_some_and(|a| a.len() == 2);
        if !valid_shape {
            return Err(Error::validation(format!(
                "Field `{}` must be a 2 element array: [lat, lng].",
                field.name
            )));
        }

        for coord in item.as_array_mut().unwrap() {
            if !coord.is_number() {
                Self::coerce_coordinate(field, coord)?;
            }
        }

        Ok(Coerced::Kept)
    }

    fn coerce_geopoint_element(
        field: &FieldSchema,
        elem: &mut Value,
        _dirty_values: DirtyValues,
    ) -> Result<()> {
        let valid_shape = elem.as_array().is_some_and(|a| a.len() == 2);
        if !valid_shape {
            return Err(Error::validation(format!(
                "Field `{}` must contain 2 element arrays: [ [lat, lng],... ].",
                field.name
            )));
        }

        for coord in elem.as_array_mut().unwrap() {
            if !coord.is_number() {
                Self::coerce_coordinate(field, coord)?;
            }
        }

        Ok(())
    }

    fn coerce_coordinate(field: &FieldSchema, coord: &mut Value) -> Result<()> {
        match coord.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
            Some(parsed) => {
                *coord = Value::from(parsed);
                Ok(())
            }
            None => Err(Error::validation(format!(
                "Field `{}` must be a 2 element array: [lat, lng].",
                field.name
            ))),
        }
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::FieldSchema;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new()
            .add_string_field("name")
            .add_field(FieldSchema::new("age", FieldType::Int32))
            .add_field(FieldSchema::new("rating", FieldType::Float).optional())
            .add_field(FieldSchema::new("in_stock", FieldType::Bool).optional())
            .add_field(FieldSchema::new("tags", FieldType::StringArray).optional())
    }

    #[test]
    fn test_valid_document_passes() {
        let mut doc = json!({
            "name": "shoe", "age": 3, "rating": 4.5,
            "in_stock": true, "tags": ["a", "b"],
        });
        assert!(DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Reject
        )
        .is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut doc = json!({"age": 3});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();

        assert_eq!(err.code(), 400);
        assert_eq!(
            err.context,
            "Field `name` has been declared in the schema, but is not found in the document."
        );
    }

    #[test]
    fn test_update_tolerates_missing_fields() {
        let mut doc = json!({"age": 3});
        assert!(DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Update,
            DirtyValues::Reject
        )
        .is_ok());
    }

    #[test]
    fn test_reject_policy_fails_on_mismatch() {
        let mut doc = json!({"name": 42, "age": 3});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();

        assert_eq!(err.context, "Field `name` must be a string.");
    }

    #[test]
    fn test_coerce_number_to_string() {
        let mut doc = json!({"name": 42, "age": 3});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();

        assert_eq!(doc["name"], json!("42"));
    }

    #[test]
    fn test_coerce_string_to_int() {
        let mut doc = json!({"name": "x", "age": "27"});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();

        assert_eq!(doc["age"], json!(27));
    }

    #[test]
    fn test_coerce_float_truncates_to_int() {
        let mut doc = json!({"name": "x", "age": 2.9});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();

        assert_eq!(doc["age"], json!(2));
    }

    #[test]
    fn test_coerce_bool_variants() {
        let mut doc = json!({"name": "x", "age": 1, "in_stock": "TRUE"});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();
        assert_eq!(doc["in_stock"], json!(true));

        let mut doc = json!({"name": "x", "age": 1, "in_stock": 0});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();
        assert_eq!(doc["in_stock"], json!(false));

        let mut doc = json!({"name": "x", "age": 1, "in_stock": 7});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap_err();
        assert_eq!(err.context, "Field `in_stock` must be a bool.");
    }

    #[test]
    fn test_coerce_or_drop_removes_optional_field() {
        let mut doc = json!({"name": "x", "age": 1, "rating": {"oops": true}});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrDrop,
        )
        .unwrap();

        assert!(doc.get("rating").is_none());
    }

    #[test]
    fn test_drop_policy_on_required_field_fails() {
        let mut doc = json!({"name": [1], "age": 1});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Drop,
        )
        .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_int32_overflow() {
        let mut doc = json!({"name": "x", "age": 5_000_000_000i64});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();
        assert_eq!(err.context, "Field `age` exceeds maximum value of int32.");
    }

    #[test]
    fn test_array_shape_required() {
        let mut doc = json!({"name": "x", "age": 1, "tags": "gold"});
        let err = DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();
        assert_eq!(err.context, "Field `tags` must be an array.");

        // with a drop policy the optional array field is removed instead
        let mut doc = json!({"name": "x", "age": 1, "tags": "gold"});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::Drop,
        )
        .unwrap();
        assert!(doc.get("tags").is_none());
    }

    #[test]
    fn test_array_elements_coerced() {
        let mut doc = json!({"name": "x", "age": 1, "tags": ["a", 5, true]});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();

        assert_eq!(doc["tags"], json!(["a", "5", "true"]));
    }

    #[test]
    fn test_array_element_dropped() {
        let mut doc = json!({"name": "x", "age": 1, "tags": ["a", {"bad": 1}, "b"]});
        DocumentValidator::validate(
            &mut doc,
            &schema(),
            IndexOperation::Create,
            DirtyValues::CoerceOrDrop,
        )
        .unwrap();

        assert_eq!(doc["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_geopoint_shapes() {
        let geo_schema = CollectionSchema::new()
            .add_field(FieldSchema::new("loc", FieldType::Geopoint));

        let mut doc = json!({"loc": [48.86, "2.35"]});
        DocumentValidator::validate(
            &mut doc,
            &geo_schema,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap();
        assert_eq!(doc["loc"], json!([48.86, 2.35]));

        let mut doc = json!({"loc": [48.86]});
        let err = DocumentValidator::validate(
            &mut doc,
            &geo_schema,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap_err();
        assert_eq!(
            err.context,
            "Field `loc` must be a 2 element array: [lat, lng]."
        );
    }

    #[test]
    fn test_nested_geopoint_array_flat_shape() {
        let geo_schema = CollectionSchema::new()
            .add_field(FieldSchema::new("stops.loc", FieldType::GeopointArray).nested());

        let mut doc = json!({"stops.loc": [1.0, 2.0, 3.0, 4.0]});
        assert!(DocumentValidator::validate(
            &mut doc,
            &geo_schema,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject
        )
        .is_ok());

        let mut doc = json!({"stops.loc": [1.0, 2.0, 3.0]});
        let err = DocumentValidator::validate(
            &mut doc,
            &geo_schema,
            IndexOperation::Create,
            DirtyValues::CoerceOrReject,
        )
        .unwrap_err();
        assert_eq!(
            err.context,
            "Nested field `stops.loc` does not contain valid geopoint values."
        );
    }

    #[test]
    fn test_vector_dimension_check() {
        let vec_schema = CollectionSchema::new()
            .add_field(FieldSchema::new("embedding", FieldType::FloatArray).with_num_dim(3));

        let mut doc = json!({"embedding": [0.1, 0.2, 0.3]});
        assert!(DocumentValidator::validate(
            &mut doc,
            &vec_schema,
            IndexOperation::Create,
            DirtyValues::Reject
        )
        .is_ok());

        let mut doc = json!({"embedding": [0.1, 0.2]});
        let err = DocumentValidator::validate(
            &mut doc,
            &vec_schema,
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();
        assert_eq!(err.context, "Field `embedding` must have 3 dimensions.");
    }

    #[test]
    fn test_nested_type_hint() {
        let nested_schema = CollectionSchema::new()
            .add_field(FieldSchema::new("items.qty", FieldType::Int32).nested());

        // a field inside an array of objects arrives as an array; a scalar
        // declaration gets the hint
        let mut doc = json!({"items.qty": [1, 2]});
        let err = DocumentValidator::validate(
            &mut doc,
            &nested_schema,
            IndexOperation::Create,
            DirtyValues::Reject,
        )
        .unwrap_err();
        assert!(err.context.contains("must be an array type as well"));
    }
}
