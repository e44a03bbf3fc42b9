//! LDAP filter builder
//!
//! Composable predicates that render the parenthesized prefix form the
//! directory expects, e.g. `(&(objectCategory=*)(uSNChanged>=1001))`.

use std::fmt;

/// Every object, regardless of class.
pub const ALL_OBJECTS: &str = "(objectClass=*)";
/// Every group object.
pub const ALL_GROUP_OBJECTS: &str = "(objectClass=group)";
/// Every user object (person category, user class).
pub const ALL_USER_OBJECTS: &str = "(&(objectCategory=person)(objectClass=user))";

/// A composable LDAP search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Ge(String, i64),
    Present(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq(attr.into(), value.into())
    }

    pub fn ge(attr: impl Into<String>, value: i64) -> Self {
        Self::Ge(attr.into(), value)
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present(attr.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(attr, value) => write!(f, "({attr}={value})"),
            Self::Ge(attr, value) => write!(f, "({attr}>={value})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::And(parts) => {
                write!(f, "(&")?;
                for part in parts {
                    part.fmt(f)?;
                }
                write!(f, ")")
            }
            Self::Or(parts) => {
                write!(f, "(|")?;
                for part in parts {
                    part.fmt(f)?;
                }
                write!(f, ")")
            }
            Self::Not(part) => write!(f, "(!{part})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_and_present() {
        assert_eq!(Filter::eq("cn", "Alice").to_string(), "(cn=Alice)");
        assert_eq!(Filter::present("member").to_string(), "(member=*)");
    }

    #[test]
    fn test_ge() {
        assert_eq!(
            Filter::ge("uSNChanged", 1001).to_string(),
            "(uSNChanged>=1001)"
        );
    }

    #[test]
    fn test_change_stream_filter_shape() {
        let filter = Filter::and([
            Filter::or([
                Filter::eq("objectCategory", "*"),
                Filter::eq("isDeleted", "TRUE"),
            ]),
            Filter::ge("uSNChanged", 999),
        ]);
        assert_eq!(
            filter.to_string(),
            "(&(|(objectCategory=*)(isDeleted=TRUE))(uSNChanged>=999))"
        );
    }

    #[test]
    fn test_not() {
        let filter = Filter::not(Filter::eq("isDeleted", "TRUE"));
        assert_eq!(filter.to_string(), "(!(isDeleted=TRUE))");
    }

    #[test]
    fn test_well_known_constants() {
        assert_eq!(ALL_OBJECTS, "(objectClass=*)");
        assert_eq!(
            ALL_USER_OBJECTS,
            "(&(objectCategory=person)(objectClass=user))"
        );
    }
}
