//! Validation errors for wire shapes

/// Errors raised while validating identities, strategies and releases
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A required identity field is missing or zero
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Operator prefix of a label expression is not recognised
    #[error("unknown label operator `{op}` for key `{key}`")]
    UnknownOperator {
        /// Label key the expression belongs to
        key: String,
        /// The operator as written
        op: String,
    },

    /// Label expression is not of the form `<op>|v1,v2,...`
    #[error("malformed label expression `{expr}` for key `{key}`")]
    MalformedExpression {
        /// Label key the expression belongs to
        key: String,
        /// The raw expression
        expr: String,
    },

    /// An indexed predicate map has no keys
    #[error("indexed predicate maps must not be empty")]
    EmptyPredicate,

    /// Whitelist criteria and indexed predicates were both supplied
    #[error("strategy mixes whitelist criteria with indexed predicates")]
    MixedStrategyEncoding,

    /// Label payload could not be parsed as a flat string map
    #[error("unparseable labels: {0}")]
    UnparseableLabels(String),
}
