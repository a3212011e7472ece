//! Strategy matching
//!
//! Composition rules:
//! - a strategy scoped to another application never matches
//! - an empty strategy matches every instance of its application
//! - whitelist: OR across criterion lists, OR within a list
//! - indexed: a predicate map matches when every key's expression accepts;
//!   the strategy matches when any `LabelsOr` map or any `LabelsAnd` map does

use crate::instance::AsInstance;
use crate::Instance;
use feed_types::{
    IndexedPredicates, LabelExpr, LabelMap, LabelOp, LabelPredicate, Strategy, StrategyRule,
    Whitelist,
};
use std::cmp::Ordering;

/// Stateless strategy evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyEngine;

impl StrategyEngine {
    /// Whether `instance` is targeted by `strategy`
    #[must_use]
    pub fn matches(strategy: &Strategy, instance: &Instance<'_>) -> bool {
        if strategy.app_id != instance.app_id {
            return false;
        }
        if strategy.is_empty() {
            return true;
        }
        match &strategy.rule {
            StrategyRule::Whitelist(whitelist) => match_whitelist(whitelist, instance),
            StrategyRule::Indexed(predicates) => match_indexed(predicates, instance),
        }
    }

    /// Keep the items targeted by `strategy`, preserving order
    ///
    /// `None` means no strategy is attached: everything is kept.
    #[must_use]
    pub fn filter<T: AsInstance>(strategy: Option<&Strategy>, items: Vec<T>) -> Vec<T> {
        match strategy {
            None => items,
            Some(s) => items
                .into_iter()
                .filter(|item| Self::matches(s, &item.as_instance()))
                .collect(),
        }
    }
}

fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|candidate| candidate == value)
}

fn match_whitelist(whitelist: &Whitelist, instance: &Instance<'_>) -> bool {
    if contains(&whitelist.cluster_ids, instance.cluster_id)
        || contains(&whitelist.zone_ids, instance.zone_id)
        || contains(&whitelist.dcs, instance.dc)
        || contains(&whitelist.ips, instance.ip)
    {
        return true;
    }
    if whitelist.labels.is_empty() {
        return false;
    }
    let Some(labels) = instance.labels.parsed() else {
        return false;
    };
    whitelist
        .labels
        .iter()
        .any(|(key, expected)| labels.get(key) == Some(expected))
}

fn match_indexed(predicates: &IndexedPredicates, instance: &Instance<'_>) -> bool {
    let Some(labels) = instance.labels.parsed() else {
        return false;
    };
    predicates
        .labels_or
        .iter()
        .chain(predicates.labels_and.iter())
        .any(|predicate| predicate_accepts(predicate, labels))
}

fn predicate_accepts(predicate: &LabelPredicate, labels: &LabelMap) -> bool {
    predicate.iter().all(|(key, expr)| {
        labels
            .get(key)
            .is_some_and(|actual| expression_accepts(expr, actual))
    })
}

/// Evaluate one `<op>|v1,v2,...` expression against a label value
fn expression_accepts(expr: &LabelExpr, actual: &str) -> bool {
    let mut orderings = expr.values.iter().map(|v| compare(actual, v));
    match expr.op {
        LabelOp::Eq => orderings.any(|o| o == Ordering::Equal),
        LabelOp::Ne => orderings.all(|o| o != Ordering::Equal),
        LabelOp::Lt => orderings.all(|o| o == Ordering::Less),
        LabelOp::Le => orderings.all(|o| o != Ordering::Greater),
        LabelOp::Gt => orderings.all(|o| o == Ordering::Greater),
        LabelOp::Ge => orderings.all(|o| o != Ordering::Less),
    }
}

/// Numeric when both sides are numbers, lexicographic otherwise
fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or_else(|| actual.cmp(expected)),
        _ => actual.cmp(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::{AgentIdentity, AppId, BizId, Labels, RawStrategy};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const APP: AppId = AppId(7);

    fn agent(cluster: &str, labels: &str) -> AgentIdentity {
        AgentIdentity::new(BizId(1), APP, "0", "10.0.0.1", "/app")
            .with_cluster(cluster)
            .with_zone("z1")
            .with_dc("dc1")
            .with_labels(labels)
    }

    fn indexed(or: &[&[(&str, &str)]], and: &[&[(&str, &str)]]) -> Strategy {
        let to_maps = |maps: &[&[(&str, &str)]]| -> Vec<BTreeMap<String, String>> {
            maps.iter()
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect()
                })
                .collect()
        };
        let raw = RawStrategy {
            labels_or: to_maps(or),
            labels_and: to_maps(and),
            ..RawStrategy::default()
        };
        Strategy::from_raw(APP, raw).unwrap()
    }

    fn check(strategy: &Strategy, identity: &AgentIdentity) -> bool {
        StrategyEngine::matches(strategy, &Instance::from(identity))
    }

    #[test]
    fn empty_strategy_matches_own_app_only() {
        let s = Strategy::unrestricted(APP);
        assert!(check(&s, &agent("c1", "")));

        let other = Strategy::unrestricted(AppId(8));
        assert!(!check(&other, &agent("c1", "")));
    }

    #[test]
    fn whitelist_or_across_lists() {
        let s = Strategy::whitelist(
            APP,
            Whitelist {
                cluster_ids: vec!["c9".into()],
                zone_ids: vec!["z1".into()],
                ..Whitelist::default()
            },
        );
        assert!(check(&s, &agent("c1", "")));
    }

    #[test]
    fn whitelist_labels() {
        let s = Strategy::whitelist(
            APP,
            Whitelist {
                labels: [("env".to_string(), "prod".to_string())].into(),
                ..Whitelist::default()
            },
        );
        assert!(check(&s, &agent("c1", r#"{"env":"prod"}"#)));
        assert!(!check(&s, &agent("c1", r#"{"env":"test"}"#)));
        assert!(!check(&s, &agent("c1", "garbage")));
    }

    #[test]
    fn whitelist_app_mismatch() {
        let s = Strategy::whitelist(
            AppId(8),
            Whitelist {
                cluster_ids: vec!["c1".into()],
                ..Whitelist::default()
            },
        );
        assert!(!check(&s, &agent("c1", "")));
    }

    #[test]
    fn labels_and_requires_every_key() {
        let s = indexed(&[], &[&[("env", "eq|prod"), ("set", "ge|3")]]);
        assert!(check(&s, &agent("c1", r#"{"env":"prod","set":"3"}"#)));
        assert!(check(&s, &agent("c1", r#"{"env":"prod","set":"10"}"#)));
        assert!(!check(&s, &agent("c1", r#"{"env":"prod","set":"2"}"#)));
        assert!(!check(&s, &agent("c1", r#"{"env":"prod"}"#)));
    }

    #[test]
    fn labels_or_and_labels_and_compose_with_or() {
        // Either list matching is enough, even though the second is named "and".
        let s = indexed(&[&[("env", "eq|gray")]], &[&[("set", "lt|2")]]);
        assert!(check(&s, &agent("c1", r#"{"env":"gray","set":"9"}"#)));
        assert!(check(&s, &agent("c1", r#"{"env":"prod","set":"1"}"#)));
        assert!(!check(&s, &agent("c1", r#"{"env":"prod","set":"9"}"#)));
    }

    #[test]
    fn operator_semantics() {
        let ne = indexed(&[&[("env", "ne|prod,gray")]], &[]);
        assert!(check(&ne, &agent("c1", r#"{"env":"test"}"#)));
        assert!(!check(&ne, &agent("c1", r#"{"env":"gray"}"#)));

        let eq_any = indexed(&[&[("env", "eq|prod,gray")]], &[]);
        assert!(check(&eq_any, &agent("c1", r#"{"env":"gray"}"#)));

        let le = indexed(&[&[("ver", "le|1.10")]], &[]);
        assert!(check(&le, &agent("c1", r#"{"ver":"1.9"}"#)));

        let gt_lex = indexed(&[&[("tier", "gt|b")]], &[]);
        assert!(check(&gt_lex, &agent("c1", r#"{"tier":"c"}"#)));
        assert!(!check(&gt_lex, &agent("c1", r#"{"tier":"a"}"#)));

        // numeric, not lexicographic: 10 > 9
        let gt_num = indexed(&[&[("set", "gt|9")]], &[]);
        assert!(check(&gt_num, &agent("c1", r#"{"set":"10"}"#)));
    }

    #[test]
    fn unparseable_labels_fail_closed() {
        let s = indexed(&[&[("env", "ne|prod")]], &[]);
        assert!(!check(&s, &agent("c1", "{not json")));
    }

    #[test]
    fn filter_preserves_order() {
        let agents = vec![agent("c1", ""), agent("c2", ""), agent("c1", "")];
        let s = Strategy::whitelist(
            APP,
            Whitelist {
                cluster_ids: vec!["c1".into()],
                ..Whitelist::default()
            },
        );
        let kept = StrategyEngine::filter(Some(&s), agents.clone());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|a| a.cluster_id == "c1"));

        assert_eq!(StrategyEngine::filter(None, agents).len(), 3);
    }

    #[test]
    fn labels_type_is_shared() {
        let labels = Labels::from_pairs([("env", "prod")]);
        let id = agent("c1", "").with_labels(labels);
        let s = indexed(&[&[("env", "eq|prod")]], &[]);
        assert!(check(&s, &id));
    }

    proptest! {
        #[test]
        fn empty_strategy_matches_everything(
            cluster in "[a-z0-9]{0,8}",
            ip in "[0-9.]{1,15}",
            labels in ".{0,20}",
        ) {
            let id = AgentIdentity::new(BizId(1), APP, "0", ip, "/").with_cluster(cluster).with_labels(labels);
            prop_assert!(check(&Strategy::unrestricted(APP), &id));
        }

        #[test]
        fn single_cluster_criterion_is_equality(
            wanted in "[a-c]{1,2}",
            actual in "[a-c]{1,2}",
        ) {
            let s = Strategy::whitelist(
                APP,
                Whitelist { cluster_ids: vec![wanted.clone()], ..Whitelist::default() },
            );
            prop_assert_eq!(check(&s, &agent(&actual, "")), wanted == actual);
        }

        #[test]
        fn single_ip_criterion_is_equality(
            wanted in "10\\.0\\.0\\.[0-3]",
            actual in "10\\.0\\.0\\.[0-3]",
        ) {
            let s = Strategy::whitelist(
                APP,
                Whitelist { ips: vec![wanted.clone()], ..Whitelist::default() },
            );
            let id = AgentIdentity::new(BizId(1), APP, "0", actual.clone(), "/");
            prop_assert_eq!(check(&s, &id), wanted == actual);
        }

        #[test]
        fn one_failing_key_fails_the_map(set in 0u32..20, threshold in 0u32..20) {
            let expr = format!("ge|{threshold}");
            let s = indexed(&[], &[&[("env", "eq|prod"), ("set", expr.as_str())]]);
            let labels = format!(r#"{{"env":"prod","set":"{set}"}}"#);
            prop_assert_eq!(check(&s, &agent("c1", &labels)), set >= threshold);
        }
    }
}
