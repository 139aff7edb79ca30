use std::{collections::BTreeMap, fmt};

use shared::{domain::UserId, error::Operation};

/// Filter set for list queries. Ordered so equal filters build equal keys.
pub type ListFilters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySegment {
    Text(&'static str),
    Id(i64),
    Filters(ListFilters),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Text(text) => write!(f, "\"{text}\""),
            KeySegment::Id(id) => write!(f, "{id}"),
            KeySegment::Filters(filters) => {
                f.write_str("{")?;
                for (idx, (name, value)) in filters.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "\"{name}\":\"{value}\"")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Structured identifier of a cached query. Prefix comparison is segment-wise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    pub fn new(segments: impl IntoIterator<Item = KeySegment>) -> Self {
        Self(segments.into_iter().collect())
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    fn child(&self, segment: KeySegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Remote call whose result lives under this key.
    pub fn operation(&self) -> Operation {
        match self.0.as_slice() {
            [_, KeySegment::Text(DETAIL), KeySegment::Id(id)] => Operation::Get(UserId(*id)),
            _ => Operation::List,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, segment) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{segment}")?;
        }
        f.write_str("]")
    }
}

const USERS: &str = "users";
const LIST: &str = "list";
const DETAIL: &str = "detail";

/// Key factory for the user collection.
pub struct UserKeys;

impl UserKeys {
    pub fn all() -> QueryKey {
        QueryKey::new([KeySegment::Text(USERS)])
    }

    pub fn lists() -> QueryKey {
        Self::all().child(KeySegment::Text(LIST))
    }

    pub fn list(filters: ListFilters) -> QueryKey {
        Self::lists().child(KeySegment::Filters(filters))
    }

    pub fn details() -> QueryKey {
        Self::all().child(KeySegment::Text(DETAIL))
    }

    pub fn detail(id: UserId) -> QueryKey {
        Self::details().child(KeySegment::Id(id.0))
    }
}
