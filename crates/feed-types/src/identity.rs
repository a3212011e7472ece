//! Agent identity, session keys and lazily-parsed labels

use crate::error::TypeError;
use crate::ids::{AppId, BizId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Parsed label map (`key -> value`)
pub type LabelMap = BTreeMap<String, String>;

/// Opaque label blob supplied by an agent
///
/// The blob is kept verbatim and only parsed the first time a label-based
/// predicate needs it. The parse result (including failure) is memoised.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Labels {
    raw: String,
    parsed: OnceLock<Option<LabelMap>>,
}

impl Labels {
    /// Wrap a raw label blob
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    /// Build labels from key/value pairs (serialised as a JSON object)
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map: LabelMap = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let raw = serde_json::to_string(&map).unwrap_or_default();
        let labels = Self::new(raw);
        let _ = labels.parsed.set(Some(map));
        labels
    }

    /// The raw blob as supplied
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parsed label map, or `None` when the blob is unparseable
    ///
    /// An empty blob parses to an empty map.
    #[must_use]
    pub fn parsed(&self) -> Option<&LabelMap> {
        self.parsed
            .get_or_init(|| Self::parse(&self.raw).ok())
            .as_ref()
    }

    /// Look up a single label value
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parsed()?.get(key).map(String::as_str)
    }

    /// Parse a raw blob eagerly
    ///
    /// # Errors
    /// Returns [`TypeError::UnparseableLabels`] if the blob is not a flat JSON
    /// object of string values.
    pub fn parse(raw: &str) -> Result<LabelMap, TypeError> {
        if raw.trim().is_empty() {
            return Ok(LabelMap::new());
        }
        serde_json::from_str(raw).map_err(|e| TypeError::UnparseableLabels(e.to_string()))
    }
}

impl fmt::Debug for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Labels").field(&self.raw).finish()
    }
}

impl PartialEq for Labels {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Labels {}

impl From<String> for Labels {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Labels {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Labels> for String {
    fn from(labels: Labels) -> Self {
        labels.raw
    }
}

/// Identity an agent reports on every flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Business the agent belongs to
    pub biz_id: BizId,
    /// Application the agent consumes configuration for
    pub app_id: AppId,
    /// Cloud (network zone) the agent runs in
    pub cloud_id: String,
    /// Agent IP
    pub ip: String,
    /// Install path of the consuming application on the host
    pub path: String,
    /// Cluster the agent is deployed in
    #[serde(default)]
    pub cluster_id: String,
    /// Zone (module) the agent is deployed in
    #[serde(default)]
    pub zone_id: String,
    /// Datacenter
    #[serde(default)]
    pub dc: String,
    /// Opaque label blob
    #[serde(default)]
    pub labels: Labels,
}

impl AgentIdentity {
    /// Create identity with the fields that form the session key
    #[must_use]
    pub fn new(
        biz_id: BizId,
        app_id: AppId,
        cloud_id: impl Into<String>,
        ip: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            biz_id,
            app_id,
            cloud_id: cloud_id.into(),
            ip: ip.into(),
            path: path.into(),
            cluster_id: String::new(),
            zone_id: String::new(),
            dc: String::new(),
            labels: Labels::default(),
        }
    }

    /// With cluster
    #[inline]
    #[must_use]
    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    /// With zone
    #[inline]
    #[must_use]
    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = zone_id.into();
        self
    }

    /// With datacenter
    #[inline]
    #[must_use]
    pub fn with_dc(mut self, dc: impl Into<String>) -> Self {
        self.dc = dc.into();
        self
    }

    /// With labels
    #[inline]
    #[must_use]
    pub fn with_labels(mut self, labels: impl Into<Labels>) -> Self {
        self.labels = labels.into();
        self
    }

    /// Session key for this identity, scoped within its application
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            cloud_id: self.cloud_id.clone(),
            ip: self.ip.clone(),
            path: normalize_path(&self.path),
        }
    }

    /// Check the fields the registry relies on
    ///
    /// # Errors
    /// Returns [`TypeError::InvalidIdentity`] when biz/app ids are unset or the
    /// IP is empty.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.biz_id.is_unset() {
            return Err(TypeError::InvalidIdentity("biz_id is required".into()));
        }
        if self.app_id.is_unset() {
            return Err(TypeError::InvalidIdentity("app_id is required".into()));
        }
        if self.ip.trim().is_empty() {
            return Err(TypeError::InvalidIdentity("ip is required".into()));
        }
        Ok(())
    }
}

/// Key of a session inside its application bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Cloud id
    pub cloud_id: String,
    /// Agent IP
    pub ip: String,
    /// Normalised install path
    pub path: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.cloud_id, self.ip, self.path)
    }
}

/// Normalise an install path for keying
///
/// Trims whitespace, collapses repeated separators, drops a trailing
/// separator and guarantees a leading one. An empty path becomes `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_path_variants() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("data/app/"), "/data/app");
        assert_eq!(normalize_path("  //data//app// "), "/data/app");
    }

    #[test]
    fn session_key_uses_normalized_path() {
        let a = AgentIdentity::new(BizId(1), AppId(2), "0", "10.0.0.1", "/data/app/");
        let b = AgentIdentity::new(BizId(1), AppId(2), "0", "10.0.0.1", "data//app");
        assert_eq!(a.session_key(), b.session_key());
        assert_eq!(a.session_key().to_string(), "0/10.0.0.1:/data/app");
    }

    #[test]
    fn labels_parse_lazily() {
        let labels = Labels::new(r#"{"env":"prod","set":"3"}"#);
        assert_eq!(labels.get("env"), Some("prod"));
        assert_eq!(labels.get("missing"), None);
    }

    #[test]
    fn labels_empty_blob_is_empty_map() {
        let labels = Labels::default();
        assert_eq!(labels.parsed().map(BTreeMap::len), Some(0));
    }

    #[test]
    fn labels_unparseable_is_none() {
        let labels = Labels::new("env=prod");
        assert!(labels.parsed().is_none());
        assert!(Labels::parse("[1,2]").is_err());
    }

    #[test]
    fn labels_from_pairs_roundtrip_raw() {
        let labels = Labels::from_pairs([("env", "prod")]);
        assert_eq!(labels.raw(), r#"{"env":"prod"}"#);
        assert_eq!(labels, Labels::new(r#"{"env":"prod"}"#));
    }

    #[test]
    fn identity_validation() {
        let ok = AgentIdentity::new(BizId(1), AppId(2), "0", "10.0.0.1", "/");
        assert!(ok.validate().is_ok());

        let no_app = AgentIdentity::new(BizId(1), AppId(0), "0", "10.0.0.1", "/");
        assert!(matches!(no_app.validate(), Err(TypeError::InvalidIdentity(_))));

        let no_ip = AgentIdentity::new(BizId(1), AppId(2), "0", " ", "/");
        assert!(no_ip.validate().is_err());
    }

    #[test]
    fn identity_serde_keeps_labels_raw() {
        let id = AgentIdentity::new(BizId(1), AppId(2), "0", "10.0.0.1", "/")
            .with_labels(r#"{"env":"prod"}"#);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains(r#""labels":"{\"env\":\"prod\"}""#));
        let back: AgentIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest::proptest! {
        #[test]
        fn normalize_path_is_idempotent(path in " {0,3}[/a-z]{0,24} {0,3}") {
            let once = normalize_path(&path);
            proptest::prop_assert_eq!(normalize_path(&once), once.clone());
            proptest::prop_assert!(once.starts_with('/'));
            proptest::prop_assert!(!once.contains("//"));
        }
    }
}
