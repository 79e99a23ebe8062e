//! Bounds upstream catalog responses before they reach the agent.
//!
//! Each entity kind has an allow-list registered as data. Compact mode copies
//! only those fields and flattens nested values through dotted source paths
//! (`Manufacturer.Name` becomes `manufacturer`). Full mode keeps items
//! verbatim. Both modes clamp the item count to `min(limit, max_limit)`.
//!
//! The serialized result is never bulkier than the payload it came from:
//! output names are no longer than the source keys they replace, the envelope
//! carries only `items` plus truncation metadata, and a bare sequence or lone
//! record comes back in its own form when nothing was dropped.

use crate::errors::ShapingError;
use once_cell::sync::Lazy;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Product,
    Substitute,
    ProductPricing,
    PricingOption,
    MediaAsset,
    Category,
    Manufacturer,
    PackagingOption,
    AssociatedProduct,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Product,
        EntityKind::Substitute,
        EntityKind::ProductPricing,
        EntityKind::PricingOption,
        EntityKind::MediaAsset,
        EntityKind::Category,
        EntityKind::Manufacturer,
        EntityKind::PackagingOption,
        EntityKind::AssociatedProduct,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Substitute => "substitute",
            EntityKind::ProductPricing => "product-pricing",
            EntityKind::PricingOption => "pricing-option",
            EntityKind::MediaAsset => "media-asset",
            EntityKind::Category => "category",
            EntityKind::Manufacturer => "manufacturer",
            EntityKind::PackagingOption => "packaging-option",
            EntityKind::AssociatedProduct => "associated-product",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ShapingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('_', "-");
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ShapingError::SchemaUnknown(raw.to_string()))
    }
}

/// One output field. `sources` are tried in order; the output name itself is
/// always tried last so an already-shaped record maps onto itself. A name is
/// never longer than the longest key along each of its source paths.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub sources: &'static [&'static str],
}

const fn field(name: &'static str, sources: &'static [&'static str]) -> FieldRule {
    FieldRule { name, sources }
}

#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub kind: EntityKind,
    /// Paths to the item sequence, first array found wins.
    pub collection_keys: &'static [&'static str],
    /// Paths to a single record, used when no collection is present.
    pub record_keys: &'static [&'static str],
    /// Top-level fields carrying the upstream's own match count.
    pub count_keys: &'static [&'static str],
    pub fields: &'static [FieldRule],
}

static PRODUCT_FIELDS: &[FieldRule] = &[
    field("partNumber", &["ManufacturerProductNumber", "ManufacturerPartNumber"]),
    field(
        "digikeyPartNumber",
        &["ProductVariations.0.DigiKeyProductNumber", "DigiKeyProductNumber", "DigiKeyPartNumber"],
    ),
    field("manufacturer", &["Manufacturer.Name", "Manufacturer.Value"]),
    field("description", &["Description.ProductDescription", "ProductDescription"]),
    field("unitPrice", &["UnitPrice"]),
    field("quantityAvailable", &["QuantityAvailable"]),
    field("datasheetUrl", &["DatasheetUrl", "PrimaryDatasheet"]),
    field("productUrl", &["ProductUrl"]),
    field("category", &["Category.Name"]),
    field("status", &["ProductStatus.Status"]),
];

static SUBSTITUTE_FIELDS: &[FieldRule] = &[
    field("partNumber", &["ManufacturerProductNumber"]),
    field("digikeyPartNumber", &["DigiKeyProductNumber"]),
    field("manufacturer", &["Manufacturer.Name"]),
    field("description", &["Description", "ProductDescription"]),
    field("substituteType", &["SubstituteType"]),
    field("unitPrice", &["UnitPrice"]),
    field("quantityAvailable", &["QuantityAvailable"]),
    field("productUrl", &["ProductUrl"]),
];

static PRODUCT_PRICING_FIELDS: &[FieldRule] = &[
    field("partNumber", &["ManufacturerProductNumber"]),
    field("manufacturer", &["Manufacturer.Name"]),
    field("description", &["Description.ProductDescription", "Description"]),
    field("quantityAvailable", &["QuantityAvailable"]),
    field("digikeyPartNumber", &["ProductVariations.0.DigiKeyProductNumber"]),
    field("packaging", &["ProductVariations.0.PackageType.Name"]),
    field(
        "minimumOrderQuantity",
        &["ProductVariations.0.MinimumOrderQuantity"],
    ),
    field("standardPricing", &["ProductVariations.0.StandardPricing"]),
    field("myPricing", &["ProductVariations.0.MyPricing"]),
];

static PRICING_OPTION_FIELDS: &[FieldRule] = &[
    field("option", &["PricingOptionFor"]),
    field("quantity", &["TotalQuantityPriced"]),
    field("totalPrice", &["TotalPrice"]),
    field("quantityAvailable", &["QuantityAvailable"]),
    field("digikeyPartNumber", &["Products.0.DigiKeyProductNumber"]),
    field("unitPrice", &["Products.0.UnitPrice"]),
    field("packaging", &["Products.0.PackageType.Name"]),
    field("minimumOrderQuantity", &["Products.0.MinimumOrderQuantity"]),
];

static MEDIA_FIELDS: &[FieldRule] = &[
    field("mediaType", &["MediaType"]),
    field("title", &["Title"]),
    field("url", &["Url"]),
    field("thumbnail", &["Thumbnail", "SmallPhoto"]),
];

static CATEGORY_FIELDS: &[FieldRule] = &[
    field("categoryId", &["CategoryId"]),
    field("name", &["Name"]),
    field("parentId", &["ParentId"]),
    field("productCount", &["ProductCount"]),
    field("newProductCount", &["NewProductCount"]),
];

static MANUFACTURER_FIELDS: &[FieldRule] = &[
    field("id", &["Id"]),
    field("name", &["Name"]),
];

static PACKAGING_FIELDS: &[FieldRule] = &[
    field("partNumber", &["ManufacturerProductNumber"]),
    field(
        "digikeyPartNumber",
        &["ProductVariations.0.DigiKeyProductNumber", "DigiKeyProductNumber"],
    ),
    field(
        "packaging",
        &["ProductVariations.0.PackageType.Name", "PackageType.Name", "Packaging.Value"],
    ),
    field("unitPrice", &["UnitPrice"]),
    field(
        "quantityAvailable",
        &["ProductVariations.0.QuantityAvailableforPackageType", "QuantityAvailable"],
    ),
    field(
        "minimumOrderQuantity",
        &["ProductVariations.0.MinimumOrderQuantity", "MinimumOrderQuantity"],
    ),
    field("productUrl", &["ProductUrl"]),
];

static ASSOCIATED_FIELDS: &[FieldRule] = &[
    field("partNumber", &["ManufacturerProductNumber"]),
    field("digikeyPartNumber", &["DigiKeyProductNumber"]),
    field("manufacturer", &["Manufacturer.Name"]),
    field(
        "description",
        &["Description.ProductDescription", "Description", "ProductDescription"],
    ),
    field("unitPrice", &["UnitPrice"]),
    field("quantityAvailable", &["QuantityAvailable"]),
    field("productUrl", &["ProductUrl"]),
];

fn builtin_schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema {
            kind: EntityKind::Product,
            collection_keys: &["Products"],
            record_keys: &["Product"],
            count_keys: &["ProductsCount"],
            fields: PRODUCT_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::Substitute,
            collection_keys: &["ProductSubstitutes"],
            record_keys: &[],
            count_keys: &["ProductSubstitutesCount"],
            fields: SUBSTITUTE_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::ProductPricing,
            collection_keys: &["ProductPricings"],
            record_keys: &[],
            count_keys: &["ProductsCount"],
            fields: PRODUCT_PRICING_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::PricingOption,
            collection_keys: &["MyPricingOptions", "PricingOptions"],
            record_keys: &[],
            count_keys: &[],
            fields: PRICING_OPTION_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::MediaAsset,
            collection_keys: &["MediaLinks"],
            record_keys: &[],
            count_keys: &[],
            fields: MEDIA_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::Category,
            collection_keys: &["Categories"],
            record_keys: &["Category"],
            count_keys: &["ProductCount"],
            fields: CATEGORY_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::Manufacturer,
            collection_keys: &["Manufacturers"],
            record_keys: &[],
            count_keys: &[],
            fields: MANUFACTURER_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::PackagingOption,
            collection_keys: &[
                "AlternatePackaging",
                "AlternatePackagings.AlternatePackaging",
                "AlternatePackagings",
            ],
            record_keys: &[],
            count_keys: &[],
            fields: PACKAGING_FIELDS,
        },
        EntitySchema {
            kind: EntityKind::AssociatedProduct,
            collection_keys: &["AssociatedProducts", "Products"],
            record_keys: &[],
            count_keys: &[],
            fields: ASSOCIATED_FIELDS,
        },
    ]
}

/// Container key of a result this engine produced, so shaped output can be
/// shaped again.
const ITEMS_KEY: &str = "items";

static BUILTIN_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(|| {
    let mut registry = SchemaRegistry::empty();
    for schema in builtin_schemas() {
        registry.register(schema);
    }
    registry
});

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<EntityKind, EntitySchema>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> &'static SchemaRegistry {
        &BUILTIN_REGISTRY
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.kind, schema);
    }

    pub fn get(&self, kind: EntityKind) -> Result<&EntitySchema, ShapingError> {
        self.schemas
            .get(&kind)
            .ok_or_else(|| ShapingError::SchemaUnknown(kind.as_str().to_string()))
    }

    pub fn shape(&self, request: ShapingRequest) -> Result<ShapedResult, ShapingError> {
        let schema = self.get(request.entity_kind)?;
        let reported_total = request.payload.as_object().and_then(|map| {
            schema
                .count_keys
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_u64))
        });

        let located = locate_items(schema, request.payload);
        let form = located.form;
        let total = located.items.len();
        let effective_limit = request.limit.min(request.max_limit);
        let truncated = total > effective_limit;

        let items: Vec<Value> = located
            .items
            .into_iter()
            .take(effective_limit)
            .map(|item| {
                if request.compact {
                    compact_item(schema, &item)
                } else {
                    item
                }
            })
            .collect();

        Ok(ShapedResult {
            entity_kind: request.entity_kind,
            compact: request.compact,
            form,
            count: items.len(),
            total: truncated.then_some(total),
            truncated,
            reported_total,
            items,
            extras: if request.compact {
                Map::new()
            } else {
                located.extras
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ShapingRequest {
    pub payload: Value,
    pub entity_kind: EntityKind,
    pub compact: bool,
    pub limit: usize,
    pub max_limit: usize,
}

impl ShapingRequest {
    pub fn new(payload: Value, entity_kind: EntityKind) -> Self {
        Self {
            payload,
            entity_kind,
            compact: true,
            limit: usize::MAX,
            max_limit: usize::MAX,
        }
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn limit(mut self, limit: usize, max_limit: usize) -> Self {
        self.limit = limit;
        self.max_limit = max_limit;
        self
    }
}

/// Shape of the payload the items were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceForm {
    /// An object holding the items under a container or record key.
    Envelope,
    /// A bare sequence (or nothing at all).
    Sequence,
    /// A lone record or scalar with no container around it.
    Record,
}

/// Serializes as `{"items", "truncated"?, "total"?, "reported_total"?, ...extras}`.
/// `reported_total` appears in compact mode only, since full mode already
/// passes the upstream count field through with the extras. A bare sequence or
/// lone record that lost nothing serializes in its own form.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedResult {
    pub entity_kind: EntityKind,
    pub compact: bool,
    pub form: SourceForm,
    pub items: Vec<Value>,
    pub count: usize,
    /// Upstream item count, present only when items were dropped.
    pub total: Option<usize>,
    pub truncated: bool,
    pub reported_total: Option<u64>,
    /// Sibling fields of the item container; full mode only.
    pub extras: Map<String, Value>,
}

impl ShapedResult {
    /// Number of items the upstream sent, whether or not any were dropped.
    pub fn original_total(&self) -> usize {
        self.total.unwrap_or(self.count)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for ShapedResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.truncated {
            match (self.form, self.items.as_slice()) {
                (SourceForm::Sequence, items) => return items.serialize(serializer),
                (SourceForm::Record, [item]) => return item.serialize(serializer),
                _ => {}
            }
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(ITEMS_KEY, &self.items)?;
        if self.truncated {
            map.serialize_entry("truncated", &true)?;
            map.serialize_entry("total", &self.original_total())?;
        }
        if self.compact {
            if let Some(reported) = self.reported_total {
                map.serialize_entry("reported_total", &reported)?;
            }
        } else {
            for (key, value) in &self.extras {
                if !matches!(key.as_str(), ITEMS_KEY | "truncated" | "total") {
                    map.serialize_entry(key, value)?;
                }
            }
        }
        map.end()
    }
}

/// Shapes with the built-in allow-lists.
pub fn shape(request: ShapingRequest) -> Result<ShapedResult, ShapingError> {
    SchemaRegistry::builtin().shape(request)
}

struct LocatedItems {
    items: Vec<Value>,
    extras: Map<String, Value>,
    form: SourceForm,
}

fn locate_items(schema: &EntitySchema, payload: Value) -> LocatedItems {
    let mut map = match payload {
        Value::Array(items) => {
            return LocatedItems {
                items,
                extras: Map::new(),
                form: SourceForm::Sequence,
            }
        }
        Value::Object(map) => map,
        Value::Null => {
            return LocatedItems {
                items: Vec::new(),
                extras: Map::new(),
                form: SourceForm::Sequence,
            }
        }
        scalar => {
            return LocatedItems {
                items: vec![scalar],
                extras: Map::new(),
                form: SourceForm::Record,
            }
        }
    };

    let container = schema
        .collection_keys
        .iter()
        .find(|path| matches!(resolve_path(&map, path), Some(Value::Array(_))))
        .or_else(|| {
            schema
                .record_keys
                .iter()
                .find(|path| matches!(resolve_path(&map, path), Some(Value::Object(_))))
        })
        .copied()
        .or_else(|| matches!(map.get(ITEMS_KEY), Some(Value::Array(_))).then_some(ITEMS_KEY));

    let Some(path) = container else {
        return LocatedItems {
            items: vec![Value::Object(map)],
            extras: Map::new(),
            form: SourceForm::Record,
        };
    };

    let found = resolve_path(&map, path).cloned().unwrap_or(Value::Null);
    let top = path.split('.').next().unwrap_or(path);
    map.remove(top);
    let items = match found {
        Value::Array(items) => items,
        other => vec![other],
    };
    LocatedItems {
        items,
        extras: map,
        form: SourceForm::Envelope,
    }
}

fn resolve_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn compact_item(schema: &EntitySchema, item: &Value) -> Value {
    let Some(map) = item.as_object() else {
        return item.clone();
    };
    let mut out = Map::new();
    for rule in schema.fields {
        let value = rule
            .sources
            .iter()
            .chain(std::iter::once(&rule.name))
            .filter_map(|path| resolve_path(map, path))
            .find(|value| !is_empty_value(value));
        if let Some(value) = value {
            out.insert(rule.name.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_kind_parses_kebab_and_snake_case() {
        assert_eq!(
            "pricing_option".parse::<EntityKind>().expect("kind"),
            EntityKind::PricingOption
        );
        assert_eq!(
            "Media-Asset".parse::<EntityKind>().expect("kind"),
            EntityKind::MediaAsset
        );
        let err = "widget".parse::<EntityKind>().unwrap_err();
        assert_eq!(err, ShapingError::SchemaUnknown("widget".to_string()));
    }

    #[test]
    fn every_kind_has_a_builtin_schema() {
        for kind in EntityKind::ALL {
            assert!(SchemaRegistry::builtin().get(kind).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn empty_registry_refuses_to_guess() {
        let registry = SchemaRegistry::empty();
        let err = registry
            .shape(ShapingRequest::new(json!([{"a": 1}]), EntityKind::Product))
            .unwrap_err();
        assert!(matches!(err, ShapingError::SchemaUnknown(kind) if kind == "product"));
    }

    #[test]
    fn compact_flattens_one_level_of_nesting() {
        let payload = json!({
            "ProductsCount": 812,
            "Products": [{
                "ManufacturerProductNumber": "LM358DR",
                "Manufacturer": {"Id": 296, "Name": "Texas Instruments"},
                "Description": {"ProductDescription": "IC OPAMP GP 2 CIRCUIT 8SOIC", "DetailedDescription": "long"},
                "UnitPrice": 0.46,
                "QuantityAvailable": 120000,
                "DatasheetUrl": "https://www.ti.com/lit/ds/symlink/lm358.pdf",
                "ProductVariations": [{"DigiKeyProductNumber": "296-1395-1-ND"}],
                "Parameters": [{"ParameterText": "Voltage", "ValueText": "32V"}]
            }],
            "FilterOptions": {"Manufacturers": []}
        });
        let result = shape(ShapingRequest::new(payload, EntityKind::Product).limit(5, 50))
            .expect("shape");
        assert_eq!(result.reported_total, Some(812));
        assert_eq!(
            result.items[0],
            json!({
                "partNumber": "LM358DR",
                "digikeyPartNumber": "296-1395-1-ND",
                "manufacturer": "Texas Instruments",
                "description": "IC OPAMP GP 2 CIRCUIT 8SOIC",
                "unitPrice": 0.46,
                "quantityAvailable": 120000,
                "datasheetUrl": "https://www.ti.com/lit/ds/symlink/lm358.pdf"
            })
        );
        assert!(result.extras.is_empty());
    }

    #[test]
    fn full_mode_keeps_sibling_fields_as_extras() {
        let payload = json!({"ProductsCount": 2, "Products": [{"X": 1}, {"Y": 2}], "SearchLocaleUsed": {"Site": "US"}});
        let result = shape(
            ShapingRequest::new(payload, EntityKind::Product)
                .compact(false)
                .limit(10, 50),
        )
        .expect("shape");
        assert_eq!(result.items, vec![json!({"X": 1}), json!({"Y": 2})]);
        assert_eq!(result.extras.get("SearchLocaleUsed"), Some(&json!({"Site": "US"})));
        assert_eq!(result.extras.get("ProductsCount"), Some(&json!(2)));
        assert!(!result.extras.contains_key("Products"));
    }

    #[test]
    fn single_record_key_becomes_one_item() {
        let payload = json!({"Product": {"ManufacturerProductNumber": "NE555P"}, "SearchLocaleUsed": {}});
        let result = shape(ShapingRequest::new(payload, EntityKind::Product).limit(1, 1))
            .expect("shape");
        assert_eq!(result.count, 1);
        assert!(!result.truncated);
        assert_eq!(result.items[0], json!({"partNumber": "NE555P"}));
    }

    #[test]
    fn nested_collection_path_is_found() {
        let payload = json!({"AlternatePackagings": {"AlternatePackaging": [
            {"ManufacturerProductNumber": "A", "ProductVariations": [{"PackageType": {"Name": "Cut Tape"}}]},
            {"ManufacturerProductNumber": "A", "ProductVariations": [{"PackageType": {"Name": "Tape & Reel"}}]}
        ]}});
        let result = shape(ShapingRequest::new(payload, EntityKind::PackagingOption).limit(10, 50))
            .expect("shape");
        assert_eq!(result.count, 2);
        assert_eq!(result.items[1]["packaging"], "Tape & Reel");
    }

    #[test]
    fn object_without_known_container_is_its_own_item() {
        let payload = json!({"CategoryId": 1, "Name": "Resistors", "ChildCategories": [{"CategoryId": 52}]});
        let result = shape(ShapingRequest::new(payload, EntityKind::Category).limit(1, 1))
            .expect("shape");
        assert_eq!(result.items, vec![json!({"categoryId": 1, "name": "Resistors"})]);
    }

    #[test]
    fn null_payload_yields_empty_result() {
        let result = shape(ShapingRequest::new(Value::Null, EntityKind::MediaAsset).limit(5, 50))
            .expect("shape");
        assert_eq!(result.count, 0);
        assert!(!result.truncated);
        assert_eq!(result.original_total(), 0);
    }

    #[test]
    fn falls_back_past_empty_sources() {
        let payload = json!([{"Thumbnail": "", "SmallPhoto": "https://img/small.jpg", "Url": "https://img/full.jpg"}]);
        let result = shape(ShapingRequest::new(payload, EntityKind::MediaAsset).limit(5, 50))
            .expect("shape");
        assert_eq!(result.items[0]["thumbnail"], "https://img/small.jpg");
    }

    #[test]
    fn serialization_omits_truncation_fields_when_complete() {
        let payload = json!({"Manufacturers": [{"Id": 1, "Name": "TI"}]});
        let value = shape(ShapingRequest::new(payload, EntityKind::Manufacturer).limit(5, 50))
            .expect("shape")
            .to_value();
        assert_eq!(value, json!({"items": [{"id": 1, "name": "TI"}]}));
    }

    #[test]
    fn bare_sequence_keeps_its_form_unless_truncated() {
        let payload = json!([{"Id": 1, "Name": "TI"}, {"Id": 2, "Name": "AD"}, {"Id": 3, "Name": "ST"}]);
        let whole = shape(ShapingRequest::new(payload.clone(), EntityKind::Manufacturer).limit(5, 50))
            .expect("whole")
            .to_value();
        assert_eq!(whole.as_array().map(Vec::len), Some(3));

        let cut = shape(ShapingRequest::new(payload, EntityKind::Manufacturer).limit(1, 50))
            .expect("cut")
            .to_value();
        assert_eq!(cut["items"], json!([{"id": 1, "name": "TI"}]));
        assert_eq!(cut["truncated"], true);
        assert_eq!(cut["total"], 3);
    }

    #[test]
    fn full_mode_flattens_extras_and_skips_reported_total() {
        let payload = json!({"ProductsCount": 2, "Products": [{"X": 1}, {"Y": 2}]});
        let value = shape(
            ShapingRequest::new(payload, EntityKind::Product)
                .compact(false)
                .limit(1, 50),
        )
        .expect("shape")
        .to_value();
        assert_eq!(
            value,
            json!({"items": [{"X": 1}], "truncated": true, "total": 2, "ProductsCount": 2})
        );
    }

    #[test]
    fn shaped_envelope_can_be_shaped_again() {
        let payload = json!({"Manufacturers": [{"Id": 1, "Name": "TI"}, {"Id": 2, "Name": "AD"}]});
        let once = shape(ShapingRequest::new(payload, EntityKind::Manufacturer).limit(1, 50))
            .expect("once");
        let twice = shape(ShapingRequest::new(once.to_value(), EntityKind::Manufacturer).limit(1, 50))
            .expect("twice");
        assert_eq!(once.items, twice.items);
    }

    #[test]
    fn output_names_are_never_longer_than_their_sources() {
        for kind in EntityKind::ALL {
            let schema = SchemaRegistry::builtin().get(kind).expect("schema");
            for rule in schema.fields {
                for source in rule.sources {
                    let longest = source.split('.').map(str::len).max().unwrap_or(0);
                    assert!(
                        rule.name.len() <= longest,
                        "{}: {} is longer than {}",
                        kind,
                        rule.name,
                        source
                    );
                }
            }
        }
    }

    #[test]
    fn small_payloads_never_grow() {
        let record = |id: u64, name: &str| json!({"Id": id, "Name": name});
        let payloads = [
            json!({"Manufacturers": [record(1, "TI")]}),
            json!({"Manufacturers": [record(1, "TI"), record(2, "AD"), record(3, "ST")]}),
            json!([record(1, "TI")]),
            json!([record(1, "TI"), record(2, "AD"), record(3, "ST")]),
            record(7, "NXP"),
            json!({"Manufacturers": []}),
            json!([]),
            Value::Null,
        ];
        for payload in payloads {
            let raw = serde_json::to_vec(&payload).expect("raw").len();
            for compact in [true, false] {
                for limit in [1, 5] {
                    let shaped = shape(
                        ShapingRequest::new(payload.clone(), EntityKind::Manufacturer)
                            .compact(compact)
                            .limit(limit, 50),
                    )
                    .expect("shape");
                    let size = serde_json::to_vec(&shaped).expect("shaped").len();
                    assert!(
                        size <= raw,
                        "{} compact={} limit={}: {} > {}",
                        payload,
                        compact,
                        limit,
                        size,
                        raw
                    );
                }
            }
        }
    }
}
