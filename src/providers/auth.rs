use serde::Serialize;

/// How a provider expects the raw API key to appear in `Authorization`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Bearer <key>` with the key used as given (trimmed).
    RawBearer,
    /// Drop any leading `Bearer ` and `sk-`, then `Bearer <rest>`.
    StripPrefixBearer,
    /// Drop the same prefixes, then `Bearer sk-<rest>`.
    PrefixedBearer,
}

impl AuthScheme {
    pub fn header_value(self, raw_key: &str) -> String {
        let key = raw_key.trim();
        match self {
            AuthScheme::RawBearer => format!("Bearer {}", key),
            AuthScheme::StripPrefixBearer => format!("Bearer {}", strip_key_prefixes(key)),
            AuthScheme::PrefixedBearer => format!("Bearer sk-{}", strip_key_prefixes(key)),
        }
    }
}

fn strip_key_prefixes(key: &str) -> &str {
    let key = strip_bearer(key);
    key.strip_prefix("sk-").unwrap_or(key)
}

fn strip_bearer(key: &str) -> &str {
    match key.get(..7) {
        Some(head) if head.eq_ignore_ascii_case("bearer ") => key[7..].trim_start(),
        _ => key,
    }
}

/// Mask a header value for logging, keeping only the scheme and a short tail.
pub fn mask_auth_header(value: &str) -> String {
    let (scheme, secret) = value.split_once(' ').unwrap_or(("", value));
    let tail: String = {
        let chars: Vec<char> = secret.chars().collect();
        if chars.len() <= 8 {
            String::new()
        } else {
            chars[chars.len() - 4..].iter().collect()
        }
    };
    if scheme.is_empty() {
        format!("***{}", tail)
    } else {
        format!("{} ***{}", scheme, tail)
    }
}
