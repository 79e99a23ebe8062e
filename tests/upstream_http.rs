mod common;

use common::quiet_logger;
use digikey_mcp::app::App;
use digikey_mcp::config::{Environment, Settings};
use digikey_mcp::errors::ToolErrorKind;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer) -> Settings {
    let mut settings = Settings::new("client-abc", "secret-xyz", Environment::Sandbox);
    settings.api_base = server.uri();
    settings.locale.customer_id = "0".to_string();
    settings.token_timeout = Duration::from_secs(2);
    settings.request_timeout = Duration::from_secs(2);
    settings.retry.base_delay_ms = 1;
    settings.retry.max_delay_ms = 5;
    settings.retry.jitter = 0.0;
    settings
}

async fn mount_token(server: &MockServer, expected_exchanges: u64) {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(move |_: &wiremock::Request| {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": format!("token-{}", n),
                "expires_in": 599
            }))
        })
        .expect(expected_exchanges)
        .mount(server)
        .await;
}

fn products(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "ManufacturerProductNumber": format!("LM358-{}", i),
                "Manufacturer": {"Id": 296, "Name": "Texas Instruments"},
                "Description": {"ProductDescription": "IC OPAMP GP 2 CIRCUIT 8SOIC", "DetailedDescription": "General Purpose Amplifier 2 Circuit 8-SOIC"},
                "UnitPrice": 0.5,
                "QuantityAvailable": 1000 + i,
                "DatasheetUrl": "",
                "PhotoUrl": null,
                "Parameters": [{"ParameterText": "Slew Rate", "ValueText": "0.3V/us"}],
                "ProductVariations": [{"DigiKeyProductNumber": format!("296-{}-1-ND", i), "StandardPricing": []}]
            })
        })
        .collect();
    json!({"Products": items, "ProductsCount": 812, "ExactMatches": [], "FilterOptions": {"Manufacturers": []}})
}

fn result_of(payload: &Value) -> &Value {
    &payload["result"]
}

#[tokio::test]
async fn keyword_search_is_shaped_end_to_end() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/products/v4/search/keyword"))
        .and(header("authorization", "Bearer token-1"))
        .and(header("x-digikey-client-id", "client-abc"))
        .and(header("x-digikey-locale-site", "US"))
        .and(header("x-digikey-locale-language", "en"))
        .and(header("x-digikey-locale-currency", "USD"))
        .and(header("x-digikey-customer-id", "0"))
        .and(body_partial_json(json!({"Keywords": "lm358", "Limit": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(products(12)))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::initialize(&settings_for(&server), quiet_logger()).expect("app");
    let payload = app
        .tool_executor
        .execute("keyword_search", json!({"keywords": "lm358", "limit": 3}))
        .await
        .expect("payload");
    let result = result_of(&payload);
    assert_eq!(result["items"].as_array().map(Vec::len), Some(3));
    assert_eq!(result["total"], 12);
    assert_eq!(result["truncated"], true);
    assert_eq!(result["reported_total"], 812);
    assert_eq!(
        result["items"][0],
        json!({
            "partNumber": "LM358-0",
            "digikeyPartNumber": "296-0-1-ND",
            "manufacturer": "Texas Instruments",
            "description": "IC OPAMP GP 2 CIRCUIT 8SOIC",
            "unitPrice": 0.5,
            "quantityAvailable": 1000
        })
    );
    server.verify().await;
}

#[tokio::test]
async fn unauthorized_response_refreshes_token_and_retries_once() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/LM358DR/media"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"title": "Unauthorized", "status": 401})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/LM358DR/media"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaLinks": [
                {"MediaType": "Datasheets", "Title": "LM358 datasheet", "Url": "https://www.ti.com/lit/ds/lm358.pdf", "SmallPhoto": "", "Thumbnail": ""}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::initialize(&settings_for(&server), quiet_logger()).expect("app");
    let payload = app
        .tool_executor
        .execute("get_product_media", json!({"product_number": "LM358DR"}))
        .await
        .expect("payload");
    assert_eq!(
        result_of(&payload)["items"][0],
        json!({"mediaType": "Datasheets", "title": "LM358 datasheet", "url": "https://www.ti.com/lit/ds/lm358.pdf"})
    );
    server.verify().await;
}

#[tokio::test]
async fn pricing_passes_quantity_and_customer() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/LM358DR/productpricing"))
        .and(query_param("requestedQuantity", "250"))
        .and(header("x-digikey-customer-id", "12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ProductPricings": [{
                "ManufacturerProductNumber": "LM358DR",
                "Manufacturer": {"Name": "Texas Instruments"},
                "QuantityAvailable": 5000,
                "ProductVariations": [{
                    "DigiKeyProductNumber": "296-1395-1-ND",
                    "PackageType": {"Id": 2, "Name": "Cut Tape (CT)"},
                    "MinimumOrderQuantity": 1,
                    "StandardPricing": [{"BreakQuantity": 1, "UnitPrice": 0.46, "TotalPrice": 0.46}],
                    "MyPricing": []
                }]
            }],
            "ProductsCount": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::initialize(&settings_for(&server), quiet_logger()).expect("app");
    let payload = app
        .tool_executor
        .execute(
            "get_product_pricing",
            json!({"product_number": "LM358DR", "requested_quantity": 250, "customer_id": "12345"}),
        )
        .await
        .expect("payload");
    let item = &result_of(&payload)["items"][0];
    assert_eq!(item["packaging"], "Cut Tape (CT)");
    assert_eq!(item["standardPricing"][0]["BreakQuantity"], 1);
    assert!(item.get("myPricing").is_none());
    server.verify().await;
}

#[tokio::test]
async fn not_found_surfaces_as_typed_error() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/NOPE-123/productdetails"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "title": "Not Found",
            "detail": "Product NOPE-123 not found",
            "status": 404
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::initialize(&settings_for(&server), quiet_logger()).expect("app");
    let err = app
        .tool_executor
        .execute("product_details", json!({"product_number": "NOPE-123"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ToolErrorKind::NotFound);
    assert_eq!(err.message, "Product NOPE-123 not found");
    server.verify().await;
}

#[tokio::test]
async fn throttled_requests_back_off_and_succeed() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/manufacturers"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/v4/search/manufacturers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Manufacturers": [{"Id": 296, "Name": "Texas Instruments"}, {"Id": 497, "Name": "STMicroelectronics"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::initialize(&settings_for(&server), quiet_logger()).expect("app");
    let payload = app
        .tool_executor
        .execute("search_manufacturers", json!({"limit": 1}))
        .await
        .expect("payload");
    let result = result_of(&payload);
    assert_eq!(result["items"], json!([{"id": 296, "name": "Texas Instruments"}]));
    assert_eq!(result["total"], 2);
    server.verify().await;
}
