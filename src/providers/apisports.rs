//! API-Sports client for per-league player and game data.
//!
//! API-Sports is reachable either directly (`x-apisports-key`) or through
//! RapidAPI (`x-rapidapi-key` + `x-rapidapi-host`). [`ApiSportsConfig::from_env`]
//! resolves which one to use for a sport from environment variables, and
//! [`ApiSportsClient::cached_get`] routes every request through the
//! [`CoalescingCache`] under the `"apisports"` budget.
//!
//! See: <https://api-sports.io/documentation>

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::cache::{CacheTtl, CoalescingCache, Params};
use crate::{PropEdgeError, Result};

/// Budget/cache namespace for all API-Sports requests.
pub const PROVIDER: &str = "apisports";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Default direct bases per sport.
const DEFAULT_BASES: &[(&str, &str)] = &[
    ("MLB", "https://v1.baseball.api-sports.io"),
    ("NFL", "https://v1.american-football.api-sports.io"),
    ("NBA", "https://v1.basketball.api-sports.io"),
    ("NHL", "https://v1.hockey.api-sports.io"),
    ("UFC", "https://v1.mma.api-sports.io"),
];

/// RapidAPI host slugs per sport.
const RAPIDAPI_SLUGS: &[(&str, &str)] = &[
    ("MLB", "baseball"),
    ("NFL", "american-football"),
    ("NBA", "basketball"),
    ("NHL", "hockey"),
    ("UFC", "mma"),
];

/// How requests authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiSportsAuth {
    /// `x-apisports-key` against the api-sports.io host.
    Direct { key: String },
    /// `x-rapidapi-key` + `x-rapidapi-host` against RapidAPI.
    RapidApi { key: String, host: String },
}

/// Resolved endpoint and credentials for one sport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSportsConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub auth: ApiSportsAuth,
}

impl ApiSportsConfig {
    /// Resolve configuration for `sport` (e.g. `"nfl"`) from the environment.
    ///
    /// Precedence:
    /// 1. `APISPORTS_<SPORT>_RAPIDAPI_KEY` / `_HOST`
    /// 2. `APISPORTS_<SPORT>_BASE` + `APISPORTS_<SPORT>_KEY`
    /// 3. `APISPORTS_RAPIDAPI_KEY` / `_HOST`
    /// 4. `APISPORTS_BASE` + `APISPORTS_KEY`
    /// 5. the sport's default base
    ///
    /// A RapidAPI key wins over a direct key when both resolve.
    pub fn from_env(sport: &str) -> Result<Self> {
        Self::from_lookup(sport, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(sport: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sport = sport.trim().to_ascii_uppercase();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut rapid_key = var(&format!("APISPORTS_{sport}_RAPIDAPI_KEY"));
        let mut rapid_host = var(&format!("APISPORTS_{sport}_RAPIDAPI_HOST"));
        let base = var(&format!("APISPORTS_{sport}_BASE")).or_else(|| var("APISPORTS_BASE"));
        let key = var(&format!("APISPORTS_{sport}_KEY")).or_else(|| var("APISPORTS_KEY"));

        if rapid_key.is_none() {
            rapid_key = var("APISPORTS_RAPIDAPI_KEY");
            if rapid_host.is_none() {
                rapid_host = var("APISPORTS_RAPIDAPI_HOST");
            }
        }

        let (base_url, auth) = match rapid_key {
            Some(key) => {
                let host = rapid_host
                    .or_else(|| base.as_deref().and_then(host_of))
                    .unwrap_or_else(|| format!("api-{}.p.rapidapi.com", rapidapi_slug(&sport)));
                let base_url = base.unwrap_or_else(|| format!("https://{host}"));
                (base_url, ApiSportsAuth::RapidApi { key, host })
            }
            None => {
                let key = key.ok_or_else(|| {
                    PropEdgeError::Configuration(format!(
                        "API-Sports: missing key for {sport} (set APISPORTS_{sport}_KEY or APISPORTS_KEY)"
                    ))
                })?;
                let base_url = match base {
                    Some(base) => base,
                    None => default_base(&sport)
                        .ok_or_else(|| {
                            PropEdgeError::Configuration(format!(
                                "API-Sports: no default base for {sport} (set APISPORTS_{sport}_BASE)"
                            ))
                        })?
                        .to_string(),
                };
                (base_url, ApiSportsAuth::Direct { key })
            }
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let pairs: Vec<(&'static str, &str)> = match &self.auth {
            ApiSportsAuth::Direct { key } => vec![("x-apisports-key", key.as_str())],
            ApiSportsAuth::RapidApi { key, host } => {
                vec![("x-rapidapi-key", key.as_str()), ("x-rapidapi-host", host.as_str())]
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let value = HeaderValue::from_str(value).map_err(|e| {
                PropEdgeError::Configuration(format!("API-Sports: invalid {name} header: {e}"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

fn default_base(sport: &str) -> Option<&'static str> {
    DEFAULT_BASES
        .iter()
        .find(|(s, _)| *s == sport)
        .map(|(_, base)| *base)
}

fn rapidapi_slug(sport: &str) -> String {
    RAPIDAPI_SLUGS
        .iter()
        .find(|(s, _)| *s == sport)
        .map(|(_, slug)| (*slug).to_string())
        .unwrap_or_else(|| sport.to_ascii_lowercase())
}

fn host_of(base: &str) -> Option<String> {
    let rest = base.split_once("//").map(|(_, rest)| rest)?;
    let host = rest.split('/').next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// HTTP client for one sport's API-Sports endpoint.
#[derive(Clone)]
pub struct ApiSportsClient {
    http: Client,
    base_url: String,
}

impl ApiSportsClient {
    /// Create a client for a resolved configuration.
    pub fn new(config: &ApiSportsConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(config.headers()?)
            .build()
            .map_err(|e| PropEdgeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    /// Client for `sport` configured from the environment.
    pub fn from_env(sport: &str) -> Result<Self> {
        Self::new(&ApiSportsConfig::from_env(sport)?)
    }

    /// `GET {base}{path}?{params}` without caching.
    ///
    /// API-Sports reports some failures (bad parameters, quota) as HTTP 200
    /// with a non-empty `errors` field; those are returned as
    /// [`PropEdgeError::Api`] so they are never cached.
    pub async fn get(&self, path: &str, params: &Params) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let query: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), query_value(v)))
            .collect();

        let response = self.http.get(&url).query(&query).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(PropEdgeError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PropEdgeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        if let Some(errors) = reported_errors(&body) {
            return Err(PropEdgeError::Api {
                status: status.as_u16(),
                message: errors,
            });
        }
        Ok(body)
    }

    /// [`get`](Self::get) through the cache, under the `"apisports"` budget.
    pub async fn cached_get(
        &self,
        cache: &CoalescingCache,
        path: &str,
        params: &Params,
        ttl: CacheTtl,
    ) -> Result<Value> {
        cache
            .fetch_with_cache(PROVIDER, path, params, ttl, || self.get(path, params))
            .await
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Non-empty `errors` (array or object) rendered as a message.
fn reported_errors(body: &Value) -> Option<String> {
    match body.get("errors")? {
        Value::Array(items) if !items.is_empty() => Some(Value::Array(items.clone()).to_string()),
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map.clone()).to_string()),
        _ => None,
    }
}
