pub use self::name_pattern::{NamePattern, PatternList};

pub mod name_pattern {
    use ::glob::PatternError;
    use ::serde::{Deserialize, Serialize};

    /// Test-name pattern from a policy allow-list.
    /// A plain name matches only itself; glob metacharacters widen the match (`T_MT*`).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct NamePattern(::glob::Pattern);

    impl NamePattern {
        pub fn parse(pattern: &str) -> Result<Self, PatternError> {
            ::glob::Pattern::new(pattern).map(Self)
        }

        pub fn matches(&self, name: &str) -> bool {
            self.0.matches(name)
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl TryFrom<String> for NamePattern {
        type Error = PatternError;

        fn try_from(s: String) -> Result<Self, Self::Error> {
            Self::parse(&s)
        }
    }

    impl From<NamePattern> for String {
        fn from(p: NamePattern) -> Self {
            p.0.as_str().to_owned()
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PatternList(Vec<NamePattern>);

    impl PatternList {
        pub fn contains(&self, name: &str) -> bool {
            self.0.iter().any(|p| p.matches(name))
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl FromIterator<NamePattern> for PatternList {
        fn from_iter<I: IntoIterator<Item = NamePattern>>(iter: I) -> Self {
            Self(iter.into_iter().collect())
        }
    }

}
