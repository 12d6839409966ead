//! The allowed principal set.

/// Errors building a principal set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PrincipalError {
    /// No principals were supplied.
    #[error("there cannot be 0 principals")]
    Empty,

    /// A principal name contains whitespace or control characters.
    #[error("invalid principal name: {0:?}")]
    InvalidName(String),
}

/// Membership check for authenticated identities.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; checks run on request threads.
pub trait PrincipalAuthorizer: Send + Sync {
    /// Check whether `identity` may receive a certificate.
    fn is_allowed(&self, identity: &str) -> bool;
}

/// An ordered, non-empty, read-only list of allowed principals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalSet(Vec<String>);

impl PrincipalSet {
    /// Build a set from individual names, preserving order and dropping
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalError::Empty` if no names are given and
    /// `PrincipalError::InvalidName` for names with whitespace or control
    /// characters.
    pub fn new<I, S>(names: I) -> Result<Self, PrincipalError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut principals: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(PrincipalError::InvalidName(name));
            }
            if !principals.contains(&name) {
                principals.push(name);
            }
        }

        if principals.is_empty() {
            return Err(PrincipalError::Empty);
        }
        Ok(Self(principals))
    }

    /// Parse a comma separated list such as `"john,root,admin"`.
    ///
    /// Entries are trimmed and empty entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalError::Empty` if nothing remains.
    pub fn parse(raw: &str) -> Result<Self, PrincipalError> {
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    /// Principals in configured order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false once constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the first requested principal that is not allowed, if any.
    #[must_use]
    pub fn first_unauthorized<'a, S: AsRef<str>>(&self, requested: &'a [S]) -> Option<&'a str> {
        requested
            .iter()
            .map(AsRef::<str>::as_ref)
            .find(|name| !self.is_allowed(name))
    }
}

impl PrincipalAuthorizer for PrincipalSet {
    fn is_allowed(&self, identity: &str) -> bool {
        self.0.iter().any(|p| p == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_separated() {
        let set = PrincipalSet::parse("john,root,admin,smith").unwrap();
        assert_eq!(set.as_slice(), ["john", "root", "admin", "smith"]);
    }

    #[test]
    fn test_parse_trims_and_skips_empty() {
        let set = PrincipalSet::parse(" alice , ,bob,").unwrap();
        assert_eq!(set.as_slice(), ["alice", "bob"]);
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert_eq!(PrincipalSet::parse(""), Err(PrincipalError::Empty));
        assert_eq!(PrincipalSet::parse(" , ,"), Err(PrincipalError::Empty));
        assert_eq!(
            PrincipalSet::new(Vec::<String>::new()),
            Err(PrincipalError::Empty)
        );
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            PrincipalSet::new(["ali ce"]),
            Err(PrincipalError::InvalidName(_))
        ));
        assert!(matches!(
            PrincipalSet::new(["bob\n"]),
            Err(PrincipalError::InvalidName(_))
        ));
    }

    #[test]
    fn test_duplicates_collapsed_in_order() {
        let set = PrincipalSet::new(["bob", "alice", "bob"]).unwrap();
        assert_eq!(set.as_slice(), ["bob", "alice"]);
    }

    #[test]
    fn test_membership() {
        let set = PrincipalSet::parse("alice,bob").unwrap();

        assert!(set.is_allowed("alice"));
        assert!(set.is_allowed("bob"));
        assert!(!set.is_allowed("carol"));
        assert!(!set.is_allowed("Alice"));
        assert!(!set.is_allowed(""));
    }

    #[test]
    fn test_first_unauthorized() {
        let set = PrincipalSet::parse("alice,bob").unwrap();

        assert_eq!(set.first_unauthorized(&["alice", "bob"]), None);
        assert_eq!(set.first_unauthorized(&["alice", "root", "carol"]), Some("root"));
    }
}
