//! Versioned provider table.
//!
//! The table is immutable once built. `reload()` rebuilds it from the
//! credential source and swaps the whole snapshot in; readers holding the
//! previous `Arc<ProviderTable>` keep a consistent view until they drop it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use arc_swap::ArcSwap;
use http::HeaderValue;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{auth::AuthScheme, ProviderError, ProviderResult};

/// Lower bound for the completion budget regardless of prompt size.
const MIN_COMPLETION_TOKENS: i64 = 100;
/// Share of the ceiling held back as a safety margin.
const RESERVE_RATIO: f64 = 0.2;
/// Rough characters-per-token heuristic.
const TOKENS_PER_CHAR: f64 = 0.25;

/// Range used for models missing from the table.
pub const FALLBACK_TEMPERATURE_RANGE: TemperatureRange = TemperatureRange { min: 0.0, max: 2.0 };

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }
}

/// Static description of one provider, before credentials are resolved.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub model_id: &'static str,
    pub url: &'static str,
    pub model: &'static str,
    pub max_tokens: u32,
    pub temperature_max: f64,
    pub auth: AuthScheme,
    pub credential_var: &'static str,
}

/// The built-in provider table.
pub fn builtin_specs() -> Vec<ProviderSpec> {
    use AuthScheme::*;

    let spec = |model_id, url, model, max_tokens, temperature_max, auth, credential_var| {
        ProviderSpec {
            model_id,
            url,
            model,
            max_tokens,
            temperature_max,
            auth,
            credential_var,
        }
    };

    const DASHSCOPE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
    const VOLCES: &str = "https://ark.cn-beijing.volces.com/api/v3/chat/completions";

    vec![
        spec(
            "deepseek",
            "https://api.deepseek.com/chat/completions",
            "deepseek-chat",
            8191,
            2.0,
            PrefixedBearer,
            "DEEPSEEK_API_KEY",
        ),
        spec(
            "siliconDeepseek",
            "https://api.siliconflow.cn/v1/chat/completions",
            "deepseek-ai/DeepSeek-V3",
            4096,
            2.0,
            PrefixedBearer,
            "SILICON_DEEPSEEK_API_KEY",
        ),
        spec(
            "kimi",
            "https://api.moonshot.cn/v1/chat/completions",
            "moonshot-v1-8k",
            4096,
            1.0,
            RawBearer,
            "KIMI_API_KEY",
        ),
        spec(
            "yiwan",
            "https://api.lingyiwanwu.com/v1/chat/completions",
            "yi-lightning",
            8092,
            1.0,
            StripPrefixBearer,
            "YIWAN_API_KEY",
        ),
        spec(
            "baiduDeepseek",
            "https://qianfan.baidubce.com/v2/chat/completions",
            "deepseek-v3",
            4092,
            2.0,
            RawBearer,
            "BAIDU_API_KEY",
        ),
        spec(
            "qwen-turbo-latest",
            DASHSCOPE,
            "qwen-plus",
            8191,
            1.0,
            RawBearer,
            "ALIYUN_API_KEY",
        ),
        spec(
            "alideepseekv3",
            DASHSCOPE,
            "deepseek-v3",
            8191,
            2.0,
            RawBearer,
            "ALIYUN_API_KEY",
        ),
        spec(
            "alideepseekr1",
            DASHSCOPE,
            "deepseek-r1",
            4191,
            1.0,
            RawBearer,
            "ALIYUN_API_KEY",
        ),
        spec(
            "volcesDeepseek",
            VOLCES,
            "ep-20250212110141-mvgts",
            8096,
            1.0,
            RawBearer,
            "VOLCES_API_KEY",
        ),
        spec(
            "volcesDeepseekR1",
            VOLCES,
            "ep-20250215224020-9nkj4",
            8096,
            1.0,
            RawBearer,
            "VOLCES_API_KEY",
        ),
        spec(
            "tencentDeepseek",
            "https://api.lkeap.cloud.tencent.com/v1/chat/completions",
            "deepseek-v3",
            4096,
            1.0,
            RawBearer,
            "TENCENT_API_KEY",
        ),
        spec(
            "minimax-text",
            "https://api.minimax.chat/v1/text/chatcompletion_v2",
            "abab5.5-chat",
            8096,
            1.0,
            RawBearer,
            "MINIMAX_API_KEY",
        ),
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(skip)]
    pub model_id: String,
    pub url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature_range: TemperatureRange,
    #[serde(skip)]
    pub auth: AuthScheme,
    #[serde(skip)]
    pub api_key: String,
}

impl ProviderConfig {
    pub fn clamp_temperature(&self, temperature: f64) -> f64 {
        self.temperature_range.clamp(temperature)
    }

    /// `max(100, ceiling - input - ceil(ceiling * 0.2))`
    pub fn max_tokens_budget(&self, input_tokens: u32) -> u32 {
        let ceiling = i64::from(self.max_tokens);
        let reserve = (ceiling as f64 * RESERVE_RATIO).ceil() as i64;
        let budget = ceiling - i64::from(input_tokens) - reserve;
        budget.max(MIN_COMPLETION_TOKENS) as u32
    }

    /// `Authorization` value for this provider, or `None` when no usable key
    /// is configured.
    pub fn auth_header(&self) -> Option<HeaderValue> {
        if self.api_key.trim().is_empty() {
            return None;
        }
        let value = self.auth.header_value(&self.api_key);
        match HeaderValue::from_str(&value) {
            Ok(mut header) => {
                header.set_sensitive(true);
                Some(header)
            }
            Err(_) => {
                warn!(model = %self.model_id, "API key contains characters invalid in a header");
                None
            }
        }
    }
}

/// Approximate token count of a text: `ceil(chars * 0.25)`.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as f64 * TOKENS_PER_CHAR).ceil() as u32
}

#[derive(Debug, Clone)]
pub struct ProviderTable {
    pub version: u64,
    pub configs: BTreeMap<String, Arc<ProviderConfig>>,
}

impl ProviderTable {
    pub fn get(&self, model_id: &str) -> Option<&Arc<ProviderConfig>> {
        self.configs.get(model_id)
    }
}

/// Where API keys come from.
pub trait CredentialSource: Send + Sync {
    fn credential(&self, var: &str) -> Option<String>;
}

/// Reads keys from process environment variables.
#[derive(Debug, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credential(&self, var: &str) -> Option<String> {
        std::env::var(var).ok()
    }
}

/// Fixed key map, used by tests and embedded setups.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    keys: parking_lot::RwLock<HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn new<I, K, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keys: parking_lot::RwLock::new(
                keys.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ),
        }
    }

    pub fn set(&self, var: impl Into<String>, value: impl Into<String>) {
        self.keys.write().insert(var.into(), value.into());
    }
}

impl CredentialSource for StaticCredentials {
    fn credential(&self, var: &str) -> Option<String> {
        self.keys.read().get(var).cloned()
    }
}

pub struct ProviderRegistry {
    table: ArcSwap<ProviderTable>,
    specs: Vec<ProviderSpec>,
    credentials: Arc<dyn CredentialSource>,
    endpoint_overrides: HashMap<String, String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("version", &self.version())
            .field("models", &self.table.load().configs.len())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(
        specs: Vec<ProviderSpec>,
        credentials: Arc<dyn CredentialSource>,
        endpoint_overrides: HashMap<String, String>,
    ) -> Self {
        for model_id in endpoint_overrides.keys() {
            if !specs.iter().any(|s| s.model_id == model_id) {
                warn!(model = %model_id, "Endpoint override for unknown model ignored");
            }
        }
        let table = build_table(&specs, credentials.as_ref(), &endpoint_overrides, 1);
        Self {
            table: ArcSwap::from_pointee(table),
            specs,
            credentials,
            endpoint_overrides,
        }
    }

    /// Built-in table with keys from the environment.
    pub fn from_env(endpoint_overrides: HashMap<String, String>) -> Self {
        Self::new(builtin_specs(), Arc::new(EnvCredentials), endpoint_overrides)
    }

    pub fn version(&self) -> u64 {
        self.table.load().version
    }

    pub fn get_config(&self, model_id: &str) -> ProviderResult<Arc<ProviderConfig>> {
        self.table
            .load()
            .get(model_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownModel(model_id.to_string()))
    }

    pub fn all_configs(&self) -> Arc<ProviderTable> {
        self.table.load_full()
    }

    /// Re-read credentials and publish a new table. Returns the new version.
    pub fn reload(&self) -> u64 {
        let next_version = self.table.load().version + 1;
        let table = build_table(
            &self.specs,
            self.credentials.as_ref(),
            &self.endpoint_overrides,
            next_version,
        );
        let models = table.configs.len();
        self.table.store(Arc::new(table));
        info!(version = next_version, models, "Provider table reloaded");
        next_version
    }

    pub fn build_auth_header(&self, model_id: &str, raw_key: &str) -> ProviderResult<String> {
        let config = self.get_config(model_id)?;
        Ok(config.auth.header_value(raw_key))
    }

    /// Clamp a requested temperature into the model's range.
    pub fn validate_temperature(&self, model_id: &str, temperature: f64) -> f64 {
        match self.table.load().get(model_id) {
            Some(config) => config.clamp_temperature(temperature),
            None => FALLBACK_TEMPERATURE_RANGE.clamp(temperature),
        }
    }

    pub fn calculate_max_tokens(&self, model_id: &str, input_tokens: u32) -> ProviderResult<u32> {
        Ok(self.get_config(model_id)?.max_tokens_budget(input_tokens))
    }
}

fn build_table(
    specs: &[ProviderSpec],
    credentials: &dyn CredentialSource,
    overrides: &HashMap<String, String>,
    version: u64,
) -> ProviderTable {
    let mut configs = BTreeMap::new();
    for spec in specs {
        let api_key = credentials.credential(spec.credential_var).unwrap_or_default();
        if api_key.is_empty() {
            debug!(model = spec.model_id, var = spec.credential_var, "No API key configured");
        }
        let url = overrides
            .get(spec.model_id)
            .cloned()
            .unwrap_or_else(|| spec.url.to_string());
        configs.insert(
            spec.model_id.to_string(),
            Arc::new(ProviderConfig {
                model_id: spec.model_id.to_string(),
                url,
                model: spec.model.to_string(),
                max_tokens: spec.max_tokens,
                temperature_range: TemperatureRange {
                    min: 0.0,
                    max: spec.temperature_max,
                },
                auth: spec.auth,
                api_key,
            }),
        );
    }
    ProviderTable { version, configs }
}
