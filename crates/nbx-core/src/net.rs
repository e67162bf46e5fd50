use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::NBX_VERSION;

const PROXY_KEYS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
    "NO_PROXY",
    "no_proxy",
];

/// Decide whether downloads honor the standard proxy environment variables.
///
/// - `NBX_KEEP_PROXIES=1/true/yes/on` forces proxies on.
/// - `NBX_KEEP_PROXIES=0/false/no/off/""` forces proxies off.
/// - Unset: proxies are used only when some proxy variable is non-empty.
pub(crate) fn keep_proxies() -> bool {
    match env::var("NBX_KEEP_PROXIES") {
        Ok(raw) => {
            let value = raw.trim().to_ascii_lowercase();
            !matches!(value.as_str(), "" | "0" | "false" | "no" | "off")
        }
        Err(_) => PROXY_KEYS.iter().any(|key| {
            env::var(key)
                .ok()
                .is_some_and(|value| !value.trim().is_empty())
        }),
    }
}

pub(crate) fn build_http_client() -> Result<Client> {
    let builder = Client::builder()
        .user_agent(format!("nbx/{NBX_VERSION}"))
        .connect_timeout(Duration::from_secs(60));
    let builder = if keep_proxies() {
        builder
    } else {
        builder.no_proxy()
    };
    builder.build().context("failed to build HTTP client")
}
