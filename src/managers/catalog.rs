use crate::constants::shaping as caps;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::shaping::{EntityKind, SchemaRegistry, ShapedResult, ShapingRequest};
use crate::services::tool_executor::ToolHandler;
use crate::services::upstream::{AuthorizedInvoker, UpstreamRequest};
use crate::services::validation::Validation;
use crate::utils::text::json_size;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const SEARCH_PREFIX: [&str; 3] = ["products", "v4", "search"];

pub const SORT_FIELDS: &[&str] = &[
    "None",
    "Packaging",
    "ProductStatus",
    "DigiKeyProductNumber",
    "ManufacturerProductNumber",
    "Manufacturer",
    "MinimumQuantity",
    "QuantityAvailable",
    "Price",
    "Supplier",
    "PriceManufacturerStandardPackage",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogTool {
    KeywordSearch,
    ProductDetails,
    SearchManufacturers,
    SearchCategories,
    GetCategoryById,
    SearchProductSubstitutions,
    GetProductMedia,
    GetProductPricing,
    GetDigiReelPricing,
    GetPricingByQuantity,
    GetAlternatePackaging,
    GetProductAssociations,
}

impl CatalogTool {
    pub const ALL: [CatalogTool; 12] = [
        CatalogTool::KeywordSearch,
        CatalogTool::ProductDetails,
        CatalogTool::SearchManufacturers,
        CatalogTool::SearchCategories,
        CatalogTool::GetCategoryById,
        CatalogTool::SearchProductSubstitutions,
        CatalogTool::GetProductMedia,
        CatalogTool::GetProductPricing,
        CatalogTool::GetDigiReelPricing,
        CatalogTool::GetPricingByQuantity,
        CatalogTool::GetAlternatePackaging,
        CatalogTool::GetProductAssociations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CatalogTool::KeywordSearch => "keyword_search",
            CatalogTool::ProductDetails => "product_details",
            CatalogTool::SearchManufacturers => "search_manufacturers",
            CatalogTool::SearchCategories => "search_categories",
            CatalogTool::GetCategoryById => "get_category_by_id",
            CatalogTool::SearchProductSubstitutions => "search_product_substitutions",
            CatalogTool::GetProductMedia => "get_product_media",
            CatalogTool::GetProductPricing => "get_product_pricing",
            CatalogTool::GetDigiReelPricing => "get_digi_reel_pricing",
            CatalogTool::GetPricingByQuantity => "get_pricing_by_quantity",
            CatalogTool::GetAlternatePackaging => "get_alternate_packaging",
            CatalogTool::GetProductAssociations => "get_product_associations",
        }
    }
}

impl fmt::Display for CatalogTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CatalogTool {
    type Err = ToolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        CatalogTool::ALL
            .into_iter()
            .find(|tool| tool.name() == raw)
            .ok_or_else(|| ToolError::invalid_params(format!("Unknown tool: {}", raw)))
    }
}

/// Entity kind and item limits a list tool shapes with.
#[derive(Debug, Clone, Copy)]
struct ListShape {
    kind: EntityKind,
    default_limit: usize,
    max_limit: usize,
}

const PRODUCTS: ListShape = ListShape {
    kind: EntityKind::Product,
    default_limit: caps::KEYWORD_SEARCH_DEFAULT,
    max_limit: caps::KEYWORD_SEARCH_MAX,
};
const SUBSTITUTES: ListShape = ListShape {
    kind: EntityKind::Substitute,
    default_limit: caps::SUBSTITUTIONS_DEFAULT,
    max_limit: caps::SUBSTITUTIONS_MAX,
};
const MEDIA: ListShape = ListShape {
    kind: EntityKind::MediaAsset,
    default_limit: caps::MEDIA_DEFAULT,
    max_limit: caps::MEDIA_MAX,
};
const MANUFACTURERS: ListShape = ListShape {
    kind: EntityKind::Manufacturer,
    default_limit: caps::MANUFACTURERS_DEFAULT,
    max_limit: caps::MANUFACTURERS_MAX,
};
const CATEGORIES: ListShape = ListShape {
    kind: EntityKind::Category,
    default_limit: caps::CATEGORIES_DEFAULT,
    max_limit: caps::CATEGORIES_MAX,
};
const PRODUCT_PRICINGS: ListShape = ListShape {
    kind: EntityKind::ProductPricing,
    default_limit: caps::PRODUCT_PRICINGS_DEFAULT,
    max_limit: caps::PRODUCT_PRICINGS_MAX,
};
const PRICING_OPTIONS: ListShape = ListShape {
    kind: EntityKind::PricingOption,
    default_limit: caps::PRICING_OPTIONS_MAX,
    max_limit: caps::PRICING_OPTIONS_MAX,
};
const PACKAGING: ListShape = ListShape {
    kind: EntityKind::PackagingOption,
    default_limit: caps::PACKAGING_DEFAULT,
    max_limit: caps::PACKAGING_MAX,
};
const ASSOCIATIONS: ListShape = ListShape {
    kind: EntityKind::AssociatedProduct,
    default_limit: caps::ASSOCIATIONS_DEFAULT,
    max_limit: caps::ASSOCIATIONS_MAX,
};

/// Product catalog tools. Every call goes through the authorized invoker and
/// every list result through the shaper.
pub struct CatalogManager {
    logger: Logger,
    validation: Validation,
    invoker: AuthorizedInvoker,
    registry: &'static SchemaRegistry,
}

impl CatalogManager {
    pub fn new(logger: Logger, validation: Validation, invoker: AuthorizedInvoker) -> Self {
        Self {
            logger: logger.child("catalog"),
            validation,
            invoker,
            registry: SchemaRegistry::builtin(),
        }
    }

    /// One handler per tool, keyed by tool name.
    pub fn handlers(self: &Arc<Self>) -> HashMap<String, Arc<dyn ToolHandler>> {
        CatalogTool::ALL
            .into_iter()
            .map(|tool| {
                let handler: Arc<dyn ToolHandler> = Arc::new(CatalogToolHandler {
                    manager: self.clone(),
                    tool,
                });
                (tool.name().to_string(), handler)
            })
            .collect()
    }

    pub async fn handle_tool(&self, tool: CatalogTool, args: Value) -> Result<Value, ToolError> {
        match tool {
            CatalogTool::KeywordSearch => self.keyword_search(&args).await,
            CatalogTool::ProductDetails => self.product_details(&args).await,
            CatalogTool::SearchManufacturers => self.search_manufacturers(&args).await,
            CatalogTool::SearchCategories => self.search_categories(&args).await,
            CatalogTool::GetCategoryById => self.get_category_by_id(&args).await,
            CatalogTool::SearchProductSubstitutions => self.search_substitutions(&args).await,
            CatalogTool::GetProductMedia => self.get_product_media(&args).await,
            CatalogTool::GetProductPricing => self.get_product_pricing(&args).await,
            CatalogTool::GetDigiReelPricing => self.get_digi_reel_pricing(&args).await,
            CatalogTool::GetPricingByQuantity => self.get_pricing_by_quantity(&args).await,
            CatalogTool::GetAlternatePackaging => self.get_alternate_packaging(&args).await,
            CatalogTool::GetProductAssociations => self.get_product_associations(&args).await,
        }
    }

    fn compact(&self, args: &Value) -> Result<bool, ToolError> {
        self.validation.ensure_bool(args.get("compact"), "compact", true)
    }

    fn customer_id(&self, args: &Value) -> Result<Option<String>, ToolError> {
        self.validation
            .ensure_optional_id(args.get("customer_id"), "customer_id")
    }

    fn shape(
        &self,
        payload: Value,
        shape: ListShape,
        compact: bool,
        limit: usize,
    ) -> Result<Value, ToolError> {
        self.shape_result(payload, shape, compact, limit)
            .map(|result| result.to_value())
    }

    fn shape_result(
        &self,
        payload: Value,
        shape: ListShape,
        compact: bool,
        limit: usize,
    ) -> Result<ShapedResult, ToolError> {
        let raw_bytes = json_size(&payload);
        let result = self.registry.shape(
            ShapingRequest::new(payload, shape.kind)
                .compact(compact)
                .limit(limit, shape.max_limit),
        )?;
        self.logger.debug(
            "Shaped response",
            Some(&serde_json::json!({
                "entity_kind": shape.kind.as_str(),
                "compact": compact,
                "count": result.count,
                "truncated": result.truncated,
                "raw_bytes": raw_bytes,
                "shaped_bytes": json_size(&result.to_value()),
            })),
        );
        Ok(result)
    }

    async fn keyword_search(&self, args: &Value) -> Result<Value, ToolError> {
        let keywords = self.validation.ensure_string(
            args.get("keywords").unwrap_or(&Value::Null),
            "keywords",
            true,
        )?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), PRODUCTS.default_limit)?;
        let compact = self.compact(args)?;

        let mut body = Map::new();
        body.insert("Keywords".to_string(), Value::String(keywords));
        body.insert(
            "Limit".to_string(),
            Value::from(limit.min(PRODUCTS.max_limit) as u64),
        );
        if let Some(offset) = args.get("offset").and_then(|v| v.as_u64()) {
            body.insert("Offset".to_string(), Value::from(offset));
        }
        if let Some(id) = self
            .validation
            .ensure_optional_id(args.get("manufacturer_id"), "manufacturer_id")?
        {
            body.insert("ManufacturerId".to_string(), Value::String(id));
        }
        if let Some(id) = self
            .validation
            .ensure_optional_id(args.get("category_id"), "category_id")?
        {
            body.insert("CategoryId".to_string(), Value::String(id));
        }
        let options = self
            .validation
            .ensure_search_options(args.get("search_options"))?;
        if !options.is_empty() {
            body.insert("SearchOptionList".to_string(), serde_json::json!(options));
        }
        if let Some(field) =
            self.validation
                .ensure_optional_string(args.get("sort_field"), "sort_field", true)?
        {
            let field = SORT_FIELDS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(&field))
                .ok_or_else(|| {
                    ToolError::invalid_params(format!("Unknown sort_field: {}", field))
                        .with_hint(format!("Use one of: {}.", SORT_FIELDS.join(", ")))
                })?;
            let order = self.validation.ensure_sort_order(args.get("sort_order"))?;
            body.insert(
                "SortOptions".to_string(),
                serde_json::json!({"Field": field, "SortOrder": order}),
            );
        }

        let request = UpstreamRequest::post(
            SEARCH_PREFIX.into_iter().chain(["keyword"]),
            Value::Object(body),
        );
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, PRODUCTS, compact, limit)
    }

    async fn product_details(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let compact = self.compact(args)?;
        let mut request = UpstreamRequest::get(product_path(&part, &["productdetails"]))
            .customer_id(self.customer_id(args)?);
        if let Some(id) = self
            .validation
            .ensure_optional_id(args.get("manufacturer_id"), "manufacturer_id")?
        {
            request = request.query("manufacturerId", id);
        }
        let payload = self.invoker.call(&request).await?;
        let single = ListShape {
            default_limit: 1,
            max_limit: 1,
            ..PRODUCTS
        };
        self.shape(payload, single, compact, 1)
    }

    async fn search_manufacturers(&self, args: &Value) -> Result<Value, ToolError> {
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), MANUFACTURERS.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(SEARCH_PREFIX.into_iter().chain(["manufacturers"]));
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, MANUFACTURERS, compact, limit)
    }

    async fn search_categories(&self, args: &Value) -> Result<Value, ToolError> {
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), CATEGORIES.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(SEARCH_PREFIX.into_iter().chain(["categories"]));
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, CATEGORIES, compact, limit)
    }

    async fn get_category_by_id(&self, args: &Value) -> Result<Value, ToolError> {
        let id = self.validation.ensure_id(args.get("category_id"), "category_id")?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(
            SEARCH_PREFIX
                .into_iter()
                .map(str::to_string)
                .chain(["categories".to_string(), id]),
        );
        let payload = self.invoker.call(&request).await?;
        let single = ListShape {
            default_limit: 1,
            max_limit: 1,
            ..CATEGORIES
        };
        self.shape(payload, single, compact, 1)
    }

    async fn search_substitutions(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), SUBSTITUTES.default_limit)?;
        let compact = self.compact(args)?;
        let exclude_marketplace = self.validation.ensure_bool(
            args.get("exclude_marketplace"),
            "exclude_marketplace",
            false,
        )?;
        let mut request = UpstreamRequest::get(product_path(&part, &["substitutions"]))
            .customer_id(self.customer_id(args)?)
            .query("limit", limit.min(SUBSTITUTES.max_limit))
            .query("excludeMarketPlaceProducts", exclude_marketplace);
        let options = self
            .validation
            .ensure_search_options(args.get("search_options"))?;
        if !options.is_empty() {
            request = request.query("searchOptionList", options.join(","));
        }
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, SUBSTITUTES, compact, limit)
    }

    async fn get_product_media(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), MEDIA.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(product_path(&part, &["media"]));
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, MEDIA, compact, limit)
    }

    async fn get_product_pricing(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let quantity = self
            .validation
            .ensure_quantity(args.get("requested_quantity"), Some(1))?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), PRODUCT_PRICINGS.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(product_path(&part, &["productpricing"]))
            .customer_id(self.customer_id(args)?)
            .query("requestedQuantity", quantity);
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, PRODUCT_PRICINGS, compact, limit)
    }

    /// Single pricing object; returned as the vendor sends it.
    async fn get_digi_reel_pricing(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let quantity = self
            .validation
            .ensure_quantity(args.get("requested_quantity"), None)?;
        let request = UpstreamRequest::get(product_path(&part, &["digireelpricing"]))
            .customer_id(self.customer_id(args)?)
            .query("requestedQuantity", quantity);
        self.invoker.call(&request).await
    }

    async fn get_pricing_by_quantity(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let quantity = self
            .validation
            .ensure_quantity(args.get("requested_quantity"), None)?;
        let compact = self.compact(args)?;
        let quantity_segment = quantity.to_string();
        let mut request = UpstreamRequest::get(product_path(
            &part,
            &["pricingbyquantity", quantity_segment.as_str()],
        ))
        .customer_id(self.customer_id(args)?);
        if let Some(id) = self
            .validation
            .ensure_optional_id(args.get("manufacturer_id"), "manufacturer_id")?
        {
            request = request.query("manufacturerId", id);
        }
        let payload = self.invoker.call(&request).await?;
        self.shape(
            payload,
            PRICING_OPTIONS,
            compact,
            PRICING_OPTIONS.default_limit,
        )
    }

    async fn get_alternate_packaging(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), PACKAGING.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(product_path(&part, &["alternatepackaging"]))
            .customer_id(self.customer_id(args)?);
        let payload = self.invoker.call(&request).await?;
        self.shape(payload, PACKAGING, compact, limit)
    }

    async fn get_product_associations(&self, args: &Value) -> Result<Value, ToolError> {
        let part = self.validation.ensure_part_number(args.get("product_number"))?;
        let limit = self
            .validation
            .ensure_limit(args.get("limit"), ASSOCIATIONS.default_limit)?;
        let compact = self.compact(args)?;
        let request = UpstreamRequest::get(product_path(&part, &["associations"]))
            .customer_id(self.customer_id(args)?);
        let payload = self.invoker.call(&request).await?;
        self.shape_associations(payload, compact, limit)
    }

    /// Associations come grouped (kits, mating products, ...). Each group is
    /// bounded on its own.
    fn shape_associations(
        &self,
        payload: Value,
        compact: bool,
        limit: usize,
    ) -> Result<Value, ToolError> {
        let mut root = match payload {
            Value::Object(mut map) => match map.remove("ProductAssociations") {
                Some(Value::Object(inner)) => inner,
                Some(other) => {
                    map.insert("ProductAssociations".to_string(), other);
                    map
                }
                None => map,
            },
            other => return self.shape(other, ASSOCIATIONS, compact, limit),
        };

        let group_names: Vec<String> = root
            .iter()
            .filter(|(_, value)| value.is_array())
            .map(|(key, _)| key.clone())
            .collect();
        let mut groups = Map::new();
        let mut count = 0;
        for name in group_names {
            let items = root.remove(&name).unwrap_or(Value::Null);
            if compact && items.as_array().map(Vec::is_empty).unwrap_or(true) {
                continue;
            }
            let shaped = self.shape_result(items, ASSOCIATIONS, compact, limit)?;
            count += shaped.count;
            groups.insert(name, shaped.to_value());
        }

        let mut out = serde_json::json!({ "groups": groups, "count": count });
        if !compact && !root.is_empty() {
            out["extras"] = Value::Object(root);
        }
        Ok(out)
    }
}

fn product_path(part: &str, tail: &[&str]) -> Vec<String> {
    SEARCH_PREFIX
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(part.to_string()))
        .chain(tail.iter().map(|s| s.to_string()))
        .collect()
}

struct CatalogToolHandler {
    manager: Arc<CatalogManager>,
    tool: CatalogTool,
}

#[async_trait::async_trait]
impl ToolHandler for CatalogToolHandler {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.manager.handle_tool(self.tool, args).await
    }
}
