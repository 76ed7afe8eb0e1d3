use serde_json::json;

use Veldrix::core::config::EngineConfig;
use Veldrix::index::registry::CollectionRegistry;
use Veldrix::posting::intersect::ResultIterState;
use Veldrix::posting::intersector::BlockIntersector;
use Veldrix::schema::schema::{CollectionSchema, DirtyValues, FieldSchema, FieldType, IndexOperation};

fn main() {
    let registry = CollectionRegistry::new();

    registry
        .create_collection(
            "brands",
            CollectionSchema::new()
                .add_string_field("brand_id")
                .add_string_field("country"),
        )
        .unwrap();

    registry
        .create_collection(
            "products",
            CollectionSchema::new()
                .add_string_field("name")
                .add_string_array_field("tags")
                .add_field(FieldSchema::new("price", FieldType::Float))
                .add_field(
                    FieldSchema::new("brand_id", FieldType::String)
                        .with_reference("brands", "brand_id", false),
                ),
        )
        .unwrap();

    for (brand_id, country) in [("acme", "de"), ("umbra", "jp")] {
        let mut doc = json!({"brand_id": brand_id, "country": country});
        registry
            .add_document("brands", &mut doc, IndexOperation::Create, DirtyValues::Reject)
            .unwrap();
    }

    let products = [
        json!({"name": "boot",   "tags": ["leather", "sale"], "price": 89.0, "brand_id": "acme"}),
        json!({"name": "shoe",   "tags": ["canvas"],          "price": 49.0, "brand_id": "umbra"}),
        json!({"name": "sandal", "tags": ["sale"],            "price": 19.0, "brand_id": "umbra"}),
        json!({"name": "loafer", "tags": ["leather"],         "price": "120", "brand_id": "acme"}),
    ];
    for product in products {
        let mut doc = product;
        registry
            .add_document(
                "products",
                &mut doc,
                IndexOperation::Create,
                DirtyValues::CoerceOrReject,
            )
            .unwrap();
    }

    for filter in [
        "tags:sale",
        "tags:leather && price:<100",
        "price:[19..49]",
        "tags:!=sale",
        "$brands(country:jp)",
        "!$brands(country:jp) || tags:sale",
    ] {
        let ids = registry.filter_ids("products", filter, None).unwrap();
        println!("{filter:40} -> {ids:?}");
    }

    // the block-parallel intersector over raw posting sets
    let products = registry.get("products").unwrap();
    let guard = products.read();
    let leather = guard.token_handle("tags", "leather").unwrap();
    let universe = guard.seq_ids();

    let intersector = BlockIntersector::new(&EngineConfig::default()).unwrap();
    let ids = intersector.intersect(&[leather, universe], ResultIterState::default(), None);
    println!("{:40} -> {ids:?}", "intersector: tags:leather x universe");
}
