//! Cookie jar persistence between CLI runs
//!
//! The jar cannot be enumerated, so the `name=value` pairs it would send are
//! collected for the API base URL and for each session endpoint. Pairs that
//! only reach an endpoint keep that endpoint's path, so a refresh cookie
//! scoped to the refresh URL survives a restart with the same scope.

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use taxdesk_core::TaxdeskResult;
use taxdesk_store::StorageAdapter;
use tracing::{debug, warn};

pub const COOKIE_STORAGE_KEY: &str = "session-cookies";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SavedCookie {
    pair: String,
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedCookies {
    #[serde(default)]
    sites: BTreeMap<String, Vec<SavedCookie>>,
}

async fn read_saved(storage: &dyn StorageAdapter) -> TaxdeskResult<SavedCookies> {
    let Some(raw) = storage.read(COOKIE_STORAGE_KEY).await? else {
        return Ok(SavedCookies::default());
    };
    match serde_json::from_str(&raw) {
        Ok(saved) => Ok(saved),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable saved cookies");
            Ok(SavedCookies::default())
        }
    }
}

/// Pairs the jar would put in the `Cookie` header for `url`
fn header_pairs(jar: &Jar, url: &Url) -> Vec<String> {
    jar.cookies(url)
        .and_then(|header| header.to_str().ok().map(str::to_string))
        .map(|header| {
            header
                .split(';')
                .map(str::trim)
                .filter(|pair| !pair.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Jar pre-loaded with the cookies saved for `base_url`
pub async fn restore_jar(storage: &dyn StorageAdapter, base_url: &Url) -> TaxdeskResult<Arc<Jar>> {
    let jar = Arc::new(Jar::default());
    let saved = read_saved(storage).await?;

    if let Some(cookies) = saved.sites.get(base_url.as_str()) {
        for cookie in cookies {
            let mut url = base_url.clone();
            url.set_path(&cookie.path);
            jar.add_cookie_str(&format!("{}; Path={}", cookie.pair, cookie.path), &url);
        }
        debug!(count = cookies.len(), "Restored session cookies");
    }

    Ok(jar)
}

/// Save what the jar would send to `base_url` and to each of `scoped_urls`.
///
/// An empty jar forgets the site.
pub async fn save_jar(
    storage: &dyn StorageAdapter,
    jar: &Jar,
    base_url: &Url,
    scoped_urls: &[Url],
) -> TaxdeskResult<()> {
    let mut saved = read_saved(storage).await?;

    let mut cookies: Vec<SavedCookie> = header_pairs(jar, base_url)
        .into_iter()
        .map(|pair| SavedCookie {
            pair,
            path: "/".to_string(),
        })
        .collect();

    for url in scoped_urls {
        for pair in header_pairs(jar, url) {
            if cookies.iter().all(|saved| saved.pair != pair) {
                cookies.push(SavedCookie {
                    pair,
                    path: url.path().to_string(),
                });
            }
        }
    }

    if cookies.is_empty() {
        saved.sites.remove(base_url.as_str());
    } else {
        saved.sites.insert(base_url.to_string(), cookies);
    }

    if saved.sites.is_empty() {
        storage.remove(COOKIE_STORAGE_KEY).await
    } else {
        storage
            .write(COOKIE_STORAGE_KEY, &serde_json::to_string_pretty(&saved)?)
            .await
    }
}
