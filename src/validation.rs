use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Length of generated aliases.
pub const ALIAS_LENGTH: usize = 6;

/// Aliases that would shadow the service's own routes.
const RESERVED_ALIASES: &[&str] = &["url", "stats", "health", "ready"];

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,6}(?:/.*)?$").unwrap()
});

static ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Deserialize, Validate)]
pub struct SaveRequest {
    #[validate(custom(function = "validate_url"))]
    pub url: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 64), custom(function = "validate_alias"))]
    pub alias: Option<String>,
}

impl SaveRequest {
    /// The requested alias, or a freshly generated one.
    pub fn alias_or_random(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => random_alias(ALIAS_LENGTH),
        }
    }
}

fn validate_url(url: &str) -> Result<(), ValidationError> {
    if URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(ValidationError::new("url").with_message("must be an http(s) URL with a domain".into()))
    }
}

fn validate_alias(alias: &str) -> Result<(), ValidationError> {
    if !ALIAS_RE.is_match(alias) {
        return Err(ValidationError::new("alias")
            .with_message("may only contain letters, digits, '-' and '_'".into()));
    }
    if RESERVED_ALIASES.contains(&alias) {
        return Err(ValidationError::new("alias").with_message("is reserved".into()));
    }
    Ok(())
}

/// Strip the scheme and a leading `www.` so equivalent URLs are stored alike.
pub fn format_url(url: &str) -> String {
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    url.strip_prefix("www.").unwrap_or(url).to_string()
}

pub fn random_alias(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
