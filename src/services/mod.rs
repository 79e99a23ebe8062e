pub mod credentials;
pub mod logger;
pub mod shaping;
pub mod token_client;
pub mod tool_executor;
pub mod upstream;
pub mod validation;
