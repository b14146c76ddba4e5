//! Upstream LLM provider table and credential handling.

pub mod auth;
pub mod registry;

pub use auth::AuthScheme;
pub use registry::{
    builtin_specs, estimate_tokens, CredentialSource, EnvCredentials, ProviderConfig,
    ProviderRegistry, ProviderSpec, ProviderTable, StaticCredentials, TemperatureRange,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
