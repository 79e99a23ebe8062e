pub mod network {
    pub const PRODUCTION_API_BASE: &str = "https://api.digikey.com";
    pub const SANDBOX_API_BASE: &str = "https://sandbox-api.digikey.com";
    pub const TOKEN_PATH: &str = "/v1/oauth2/token";
    pub const TIMEOUT_TOKEN_EXCHANGE_MS: u64 = 15_000;
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_CONNECTION_MS: u64 = 5_000;
    pub const USER_AGENT: &str = concat!("digikey-mcp/", env!("CARGO_PKG_VERSION"));
}

pub mod auth {
    pub const SAFETY_MARGIN_SECS: u64 = 300;
    /// Longest `expires_in` accepted from the token endpoint (one year).
    pub const MAX_TOKEN_LIFETIME_SECS: u64 = 31_536_000;
    pub const CLIENT_ID_LOG_PREFIX: usize = 10;
}

pub mod locale {
    pub const SITE: &str = "US";
    pub const LANGUAGE: &str = "en";
    pub const CURRENCY: &str = "USD";
    pub const CUSTOMER_ID: &str = "0";
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 3;
    pub const BASE_DELAY_MS: u64 = 250;
    pub const MAX_DELAY_MS: u64 = 5_000;
    pub const JITTER: f64 = 0.2;
}

pub mod shaping {
    pub const KEYWORD_SEARCH_DEFAULT: usize = 5;
    pub const KEYWORD_SEARCH_MAX: usize = 50;
    pub const SUBSTITUTIONS_DEFAULT: usize = 10;
    pub const SUBSTITUTIONS_MAX: usize = 50;
    pub const MEDIA_DEFAULT: usize = 20;
    pub const MEDIA_MAX: usize = 50;
    pub const MANUFACTURERS_DEFAULT: usize = 100;
    pub const MANUFACTURERS_MAX: usize = 500;
    pub const CATEGORIES_DEFAULT: usize = 50;
    pub const CATEGORIES_MAX: usize = 200;
    pub const PRODUCT_PRICINGS_DEFAULT: usize = 10;
    pub const PRODUCT_PRICINGS_MAX: usize = 50;
    pub const PRICING_OPTIONS_MAX: usize = 10;
    pub const PACKAGING_DEFAULT: usize = 20;
    pub const PACKAGING_MAX: usize = 50;
    pub const ASSOCIATIONS_DEFAULT: usize = 10;
    pub const ASSOCIATIONS_MAX: usize = 50;
}

pub mod limits {
    pub const LOG_SUBSTRING_LENGTH: usize = 100;
    pub const ERROR_BODY_PREVIEW_BYTES: usize = 2_048;
    pub const MAX_PART_NUMBER_LENGTH: usize = 128;
    pub const MAX_REQUESTED_QUANTITY: u64 = 1_000_000_000;
}
