//! Numeric identifiers
//!
//! All identifiers are thin `u32` newtypes so that a business id can never be
//! passed where an application id is expected.

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Whether the id is the unset sentinel (zero)
            #[inline]
            #[must_use]
            pub const fn is_unset(self) -> bool {
                self.0 == 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Business (tenant) identifier; also the sharding key
    BizId
);
numeric_id!(
    /// Application identifier; sessions are bucketed by it
    AppId
);
numeric_id!(
    /// Release identifier
    ReleaseId
);
numeric_id!(
    /// Configuration item identifier
    CfgId
);
numeric_id!(
    /// Identifier of a set of releases published together
    MultiReleaseId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_and_unset() {
        assert_eq!(AppId(12).to_string(), "12");
        assert!(ReleaseId::default().is_unset());
        assert!(!BizId(1).is_unset());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ReleaseId(42)).unwrap();
        assert_eq!(json, "42");
        let back: ReleaseId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReleaseId(42));
    }
}
