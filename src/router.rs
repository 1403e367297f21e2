//! Inbound path routing
//!
//! Maps `/<host>/<path...>?<query>` to the upstream URL that serves it.
//! Images go through the resizing backend when one is configured; anything
//! else is fetched from `<origin_scheme>://<host>` directly.

use crate::config::EdgeCacheConfig;
use crate::error::{EdgeCacheError, Result};
use mime_guess::mime;
use url::Url;

/// Query parameter that forces image routing; never forwarded upstream
const TYPE_HINT: &str = "type";

/// Where an inbound request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The bare root, answered with a greeting
    Hello,
    /// Paths that are never proxied (favicon probes)
    NotFound,
    /// Upstream URL to resolve through the cache
    Asset(String),
}

#[derive(Debug, Clone)]
pub struct AssetRouter {
    origin_scheme: String,
    resizer: Option<Url>,
}

impl AssetRouter {
    pub fn new(origin_scheme: &str, resizer_url: Option<&str>) -> Result<Self> {
        let resizer = resizer_url.map(Url::parse).transpose().map_err(|e| {
            EdgeCacheError::ConfigError(format!("Invalid resizer_url: {}", e))
        })?;
        Ok(AssetRouter {
            origin_scheme: origin_scheme.to_string(),
            resizer,
        })
    }

    pub fn from_config(config: &EdgeCacheConfig) -> Result<Self> {
        Self::new(&config.origin_scheme, config.resizer_url.as_deref())
    }

    /// Route an inbound request path and optional raw query string
    pub fn route(&self, path: &str, query: Option<&str>) -> Result<Route> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Ok(Route::Hello);
        }

        let filename = trimmed.rsplit('/').next().unwrap_or_default();
        if filename == "favicon.ico" {
            return Ok(Route::NotFound);
        }

        let (host, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if host.is_empty() {
            return Err(EdgeCacheError::InvalidUrl(format!(
                "No origin host in path: {}",
                path
            )));
        }

        let mut hinted_image = false;
        let mut pairs: Vec<(String, String)> = Vec::new();
        for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            if name == TYPE_HINT {
                hinted_image = value == "image";
            } else {
                pairs.push((name.into_owned(), value.into_owned()));
            }
        }

        let is_image = hinted_image
            || mime_guess::from_path(filename)
                .first()
                .map(|m| m.type_() == mime::IMAGE)
                .unwrap_or(false);

        let mut target = match (&self.resizer, is_image) {
            (Some(resizer), true) => {
                let mut target = resizer.clone();
                let base = resizer.path().trim_end_matches('/');
                target.set_path(&format!("{}/{}/{}", base, host, rest));
                target
            }
            _ => {
                let mut target = Url::parse(&format!("{}://{}/", self.origin_scheme, host))?;
                target.set_path(&format!("/{}", rest));
                target
            }
        };

        if pairs.is_empty() {
            target.set_query(None);
        } else {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            target.query_pairs_mut().clear().extend_pairs(pairs);
        }

        Ok(Route::Asset(target.into()))
    }
}
