//! Target-selection strategies
//!
//! A strategy arrives on the wire as a loose bag of optional lists and maps
//! ([`RawStrategy`]). It is validated once into [`Strategy`], whose rule is one
//! of exactly two shapes:
//!
//! - [`StrategyRule::Whitelist`]: union over cluster/zone/dc/ip/label criteria
//! - [`StrategyRule::Indexed`]: `LabelsOr` / `LabelsAnd` maps of operator
//!   expressions such as `"ge|3"` or `"eq|prod,gray"`
//!
//! A whitelist with no criteria is the unrestricted default rollout.

use crate::error::TypeError;
use crate::identity::LabelMap;
use crate::ids::AppId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Wire encoding of a strategy, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStrategy {
    /// Cluster whitelist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusterids: Vec<String>,
    /// Zone whitelist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zoneids: Vec<String>,
    /// Datacenter whitelist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dcs: Vec<String>,
    /// IP whitelist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    /// Label whitelist (`key -> value`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelMap,
    /// Indexed predicate maps, any of which may match
    #[serde(default, rename = "labels_or", skip_serializing_if = "Vec::is_empty")]
    pub labels_or: Vec<BTreeMap<String, String>>,
    /// Indexed predicate maps, any of which may match
    #[serde(default, rename = "labels_and", skip_serializing_if = "Vec::is_empty")]
    pub labels_and: Vec<BTreeMap<String, String>>,
}

impl RawStrategy {
    fn has_whitelist(&self) -> bool {
        !(self.clusterids.is_empty()
            && self.zoneids.is_empty()
            && self.dcs.is_empty()
            && self.ips.is_empty()
            && self.labels.is_empty())
    }

    fn has_indexed(&self) -> bool {
        !(self.labels_or.is_empty() && self.labels_and.is_empty())
    }
}

/// Comparison operator of a label expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelOp {
    /// Equal to any listed value
    Eq,
    /// Different from every listed value
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl LabelOp {
    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }
}

impl FromStr for LabelOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "lt" => Ok(Self::Lt),
            "le" => Ok(Self::Le),
            "gt" => Ok(Self::Gt),
            "ge" => Ok(Self::Ge),
            _ => Err(()),
        }
    }
}

/// A validated `<op>|v1,v2,...` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelExpr {
    /// Operator
    pub op: LabelOp,
    /// Operand values, never empty
    pub values: Vec<String>,
}

impl LabelExpr {
    /// Create expression from parts
    #[must_use]
    pub fn new(op: LabelOp, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            op,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the expression attached to `key`
    ///
    /// # Errors
    /// - [`TypeError::MalformedExpression`] without a `|` separator or values
    /// - [`TypeError::UnknownOperator`] for operators outside `eq/ne/lt/le/gt/ge`
    pub fn parse(key: &str, expr: &str) -> Result<Self, TypeError> {
        let malformed = || TypeError::MalformedExpression {
            key: key.to_string(),
            expr: expr.to_string(),
        };

        let (op, rest) = expr.split_once('|').ok_or_else(malformed)?;
        let op = op.parse::<LabelOp>().map_err(|()| TypeError::UnknownOperator {
            key: key.to_string(),
            op: op.to_string(),
        })?;

        let values: Vec<String> = rest
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return Err(malformed());
        }

        Ok(Self { op, values })
    }
}

impl fmt::Display for LabelExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.op.as_str(), self.values.join(","))
    }
}

/// One indexed predicate map: every key's expression must accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPredicate(pub BTreeMap<String, LabelExpr>);

impl LabelPredicate {
    fn parse(raw: &BTreeMap<String, String>) -> Result<Self, TypeError> {
        if raw.is_empty() {
            return Err(TypeError::EmptyPredicate);
        }
        raw.iter()
            .map(|(key, expr)| Ok((key.clone(), LabelExpr::parse(key, expr)?)))
            .collect::<Result<BTreeMap<_, _>, TypeError>>()
            .map(Self)
    }

    fn to_raw(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(key, expr)| (key.clone(), expr.to_string()))
            .collect()
    }

    /// Iterate `(key, expression)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LabelExpr)> {
        self.0.iter()
    }
}

/// Whitelist-union criteria
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    /// Cluster ids
    pub cluster_ids: Vec<String>,
    /// Zone ids
    pub zone_ids: Vec<String>,
    /// Datacenters
    pub dcs: Vec<String>,
    /// IPs
    pub ips: Vec<String>,
    /// Required label values
    pub labels: LabelMap,
}

impl Whitelist {
    /// Whether no criterion is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cluster_ids.is_empty()
            && self.zone_ids.is_empty()
            && self.dcs.is_empty()
            && self.ips.is_empty()
            && self.labels.is_empty()
    }
}

/// Indexed `LabelsOr` / `LabelsAnd` predicate sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedPredicates {
    /// `LabelsOr` maps
    pub labels_or: Vec<LabelPredicate>,
    /// `LabelsAnd` maps
    pub labels_and: Vec<LabelPredicate>,
}

/// The two strategy shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyRule {
    /// Union of whitelist criteria
    Whitelist(Whitelist),
    /// Operator predicates over labels
    Indexed(IndexedPredicates),
}

impl Default for StrategyRule {
    fn default() -> Self {
        Self::Whitelist(Whitelist::default())
    }
}

/// Validated strategy attached to a release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StrategyWire", into = "StrategyWire")]
pub struct Strategy {
    /// Application the strategy is scoped to
    pub app_id: AppId,
    /// Selection rule
    pub rule: StrategyRule,
}

impl Strategy {
    /// Unrestricted strategy for an application
    #[inline]
    #[must_use]
    pub fn unrestricted(app_id: AppId) -> Self {
        Self {
            app_id,
            rule: StrategyRule::default(),
        }
    }

    /// Whitelist strategy
    #[inline]
    #[must_use]
    pub fn whitelist(app_id: AppId, whitelist: Whitelist) -> Self {
        Self {
            app_id,
            rule: StrategyRule::Whitelist(whitelist),
        }
    }

    /// Indexed predicate strategy
    #[inline]
    #[must_use]
    pub fn indexed(app_id: AppId, predicates: IndexedPredicates) -> Self {
        Self {
            app_id,
            rule: StrategyRule::Indexed(predicates),
        }
    }

    /// Validate a wire strategy
    ///
    /// # Errors
    /// Returns [`TypeError`] for mixed encodings, empty predicate maps or
    /// malformed label expressions.
    pub fn from_raw(app_id: AppId, raw: RawStrategy) -> Result<Self, TypeError> {
        match (raw.has_whitelist(), raw.has_indexed()) {
            (true, true) => Err(TypeError::MixedStrategyEncoding),
            (_, true) => {
                let labels_or = raw
                    .labels_or
                    .iter()
                    .map(LabelPredicate::parse)
                    .collect::<Result<_, _>>()?;
                let labels_and = raw
                    .labels_and
                    .iter()
                    .map(LabelPredicate::parse)
                    .collect::<Result<_, _>>()?;
                Ok(Self::indexed(
                    app_id,
                    IndexedPredicates {
                        labels_or,
                        labels_and,
                    },
                ))
            }
            _ => Ok(Self::whitelist(
                app_id,
                Whitelist {
                    cluster_ids: raw.clusterids,
                    zone_ids: raw.zoneids,
                    dcs: raw.dcs,
                    ips: raw.ips,
                    labels: raw.labels,
                },
            )),
        }
    }

    /// Back to the wire encoding
    #[must_use]
    pub fn to_raw(&self) -> RawStrategy {
        match &self.rule {
            StrategyRule::Whitelist(w) => RawStrategy {
                clusterids: w.cluster_ids.clone(),
                zoneids: w.zone_ids.clone(),
                dcs: w.dcs.clone(),
                ips: w.ips.clone(),
                labels: w.labels.clone(),
                ..RawStrategy::default()
            },
            StrategyRule::Indexed(p) => RawStrategy {
                labels_or: p.labels_or.iter().map(LabelPredicate::to_raw).collect(),
                labels_and: p.labels_and.iter().map(LabelPredicate::to_raw).collect(),
                ..RawStrategy::default()
            },
        }
    }

    /// Whether this is the unrestricted rollout
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.rule {
            StrategyRule::Whitelist(w) => w.is_empty(),
            StrategyRule::Indexed(p) => p.labels_or.is_empty() && p.labels_and.is_empty(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StrategyWire {
    app_id: AppId,
    #[serde(flatten)]
    raw: RawStrategy,
}

impl TryFrom<StrategyWire> for Strategy {
    type Error = TypeError;

    fn try_from(wire: StrategyWire) -> Result<Self, Self::Error> {
        Self::from_raw(wire.app_id, wire.raw)
    }
}

impl From<Strategy> for StrategyWire {
    fn from(strategy: Strategy) -> Self {
        Self {
            raw: strategy.to_raw(),
            app_id: strategy.app_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parse_label_expression() {
        let expr = LabelExpr::parse("set", "GE| 3 ,4,").unwrap();
        assert_eq!(expr.op, LabelOp::Ge);
        assert_eq!(expr.values, vec!["3", "4"]);
        assert_eq!(expr.to_string(), "ge|3,4");
    }

    #[test]
    fn parse_label_expression_errors() {
        assert!(matches!(
            LabelExpr::parse("set", "3"),
            Err(TypeError::MalformedExpression { .. })
        ));
        assert!(matches!(
            LabelExpr::parse("set", "in|3"),
            Err(TypeError::UnknownOperator { .. })
        ));
        assert!(matches!(
            LabelExpr::parse("set", "eq|,"),
            Err(TypeError::MalformedExpression { .. })
        ));
    }

    #[test]
    fn empty_raw_is_unrestricted_whitelist() {
        let s = Strategy::from_raw(AppId(1), RawStrategy::default()).unwrap();
        assert!(s.is_empty());
        assert!(matches!(s.rule, StrategyRule::Whitelist(_)));
    }

    #[test]
    fn mixed_encoding_rejected() {
        let raw = RawStrategy {
            clusterids: vec!["c1".into()],
            labels_or: vec![map(&[("env", "eq|prod")])],
            ..RawStrategy::default()
        };
        assert_eq!(
            Strategy::from_raw(AppId(1), raw),
            Err(TypeError::MixedStrategyEncoding)
        );
    }

    #[test]
    fn empty_predicate_map_rejected() {
        let raw = RawStrategy {
            labels_and: vec![BTreeMap::new()],
            ..RawStrategy::default()
        };
        assert_eq!(
            Strategy::from_raw(AppId(1), raw),
            Err(TypeError::EmptyPredicate)
        );
    }

    #[test]
    fn strategy_json_shape() {
        let json = r#"{"app_id":3,"labels_and":[{"env":"eq|prod","set":"ge|2"}]}"#;
        let s: Strategy = serde_json::from_str(json).unwrap();
        match &s.rule {
            StrategyRule::Indexed(p) => {
                assert!(p.labels_or.is_empty());
                assert_eq!(p.labels_and.len(), 1);
            }
            other => panic!("expected indexed rule, got {other:?}"),
        }
        assert_eq!(serde_json::to_string(&s).unwrap(), json);
    }

    #[test]
    fn invalid_strategy_json_fails_to_deserialize() {
        let json = r#"{"app_id":3,"labels_or":[{"env":"like|prod"}]}"#;
        assert!(serde_json::from_str::<Strategy>(json).is_err());
    }
}
