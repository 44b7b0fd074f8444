//! Database references: locating a subtree and building REST query URLs.
//!
//! See <https://firebase.google.com/docs/reference/rest/database> for the
//! query parameters the server understands.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::subscribe::{Subscription, subscribe_with_client};
use crate::types::{DEFAULT_CONNECT_TIMEOUT, Error, SubscribeConfig};

/// Immutable handle on a database location plus query parameters.
///
/// Builder methods return a new `Reference` and leave `self` unchanged.
#[derive(Debug, Clone)]
pub struct Reference {
    url: Url,
    pass_keep_alive: bool,
    client: reqwest::Client,
}

/// Resolve `.` and `..` segments and collapse duplicate slashes. The result
/// always starts with `/` and never ends with one unless it is the root.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

impl Reference {
    /// Parse `url` as the database root. A non-empty `auth` (database secret
    /// or ID token) is sent as the `auth` query parameter on every request.
    pub fn new(url: &str, auth: &str) -> Result<Self, Error> {
        let mut url = Url::parse(url)?;
        url.set_path(&clean_path(url.path()));
        // No client-level connect timeout: each call bounds its own setup.
        let client = reqwest::Client::builder().build()?;
        let reference = Reference {
            url,
            pass_keep_alive: false,
            client,
        };
        if auth.is_empty() {
            Ok(reference)
        } else {
            Ok(reference.with_param("auth", auth))
        }
    }

    /// Reference to `path` below this location.
    pub fn child(&self, path: &str) -> Self {
        let mut next = self.clone();
        let joined = format!("{}/{}", self.url.path(), path);
        next.url.set_path(&clean_path(&joined));
        next
    }

    /// Same as [`child`](Self::child).
    pub fn ref_path(&self, path: &str) -> Self {
        self.child(path)
    }

    pub fn order_by_child(&self, child_key: &str) -> Self {
        self.with_quoted_str("orderBy", child_key)
    }

    pub fn order_by_key(&self) -> Self {
        self.order_by_child("$key")
    }

    pub fn order_by_value(&self) -> Self {
        self.order_by_child("$value")
    }

    pub fn limit_to_first(&self, n: u64) -> Self {
        self.with_param("limitToFirst", &n.to_string())
    }

    pub fn limit_to_last(&self, n: u64) -> Self {
        self.with_param("limitToLast", &n.to_string())
    }

    /// Lower bound. Strings are sent quoted, numbers and booleans bare.
    pub fn start_at<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self, Error> {
        self.with_json_param("startAt", value)
    }

    /// Upper bound. Strings are sent quoted, numbers and booleans bare.
    pub fn end_at<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self, Error> {
        self.with_json_param("endAt", value)
    }

    pub fn equal_to<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self, Error> {
        self.with_json_param("equalTo", value)
    }

    /// Whether subscriptions opened from this reference deliver `keep-alive`
    /// events. Off by default.
    pub fn pass_keep_alive(&self, pass: bool) -> Self {
        let mut next = self.clone();
        next.pass_keep_alive = pass;
        next
    }

    /// REST endpoint for this location: the path with `.json` appended.
    pub fn json_url(&self) -> String {
        let mut url = self.url.clone();
        let path = self.url.path();
        if path == "/" {
            url.set_path("/.json");
        } else {
            url.set_path(&format!("{path}.json"));
        }
        url.to_string()
    }

    /// Read the value at this location once and decode it. Getting the
    /// response headers is bounded by the default connect timeout (30 s).
    pub async fn value<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let resp = tokio::time::timeout(
            DEFAULT_CONNECT_TIMEOUT,
            self.client.get(self.json_url()).send(),
        )
        .await
        .map_err(|_| Error::Timeout)??;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status(status.to_string()));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Subscribe to changes at this location with default settings.
    pub async fn subscribe(&self) -> Result<Subscription, Error> {
        let config = SubscribeConfig {
            pass_keep_alive: self.pass_keep_alive,
            ..SubscribeConfig::default()
        };
        self.subscribe_with(config).await
    }

    /// Subscribe with an explicit config. The config's `pass_keep_alive`
    /// takes precedence over [`pass_keep_alive`](Self::pass_keep_alive),
    /// and its `connect_timeout` bounds the whole setup, TCP connect
    /// included.
    pub async fn subscribe_with(&self, config: SubscribeConfig) -> Result<Subscription, Error> {
        subscribe_with_client(&self.client, &self.json_url(), &config).await
    }

    // -----------------------------------------------------------------------
    // Query parameters
    // -----------------------------------------------------------------------

    /// Set `key` to `value`, replacing any earlier value for `key`.
    fn with_param(&self, key: &str, value: &str) -> Self {
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != key)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let mut next = self.clone();
        next.url
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair(key, value);
        next
    }

    fn with_quoted_str(&self, key: &str, value: &str) -> Self {
        // Escaping a `str` as a JSON string literal cannot fail.
        let quoted = serde_json::Value::from(value).to_string();
        self.with_param(key, &quoted)
    }

    fn with_json_param<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<Self, Error> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.with_param(key, &encoded))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
