use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Predicate name that clears every filter.
pub const ALL_PREDICATE: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateValue {
    Text(String),
    Date(DateTime<Utc>),
}

impl PredicateValue {
    pub fn to_param(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Date(value) => value.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl From<&str> for PredicateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PredicateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PredicateValue {
    fn from(value: bool) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for PredicateValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// Active filters. An empty predicate means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    entries: BTreeMap<String, PredicateValue>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PredicateValue> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &PredicateValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Replaces every entry with `(name, value)`, or with nothing for `"all"`.
    fn replace(&mut self, name: &str, value: PredicateValue) {
        self.entries.clear();
        if name != ALL_PREDICATE {
            self.entries.insert(name.to_string(), value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
}

impl PageState {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
            total_count: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }

    pub fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub offset: u64,
    pub filters: Vec<(String, String)>,
}

impl ListQuery {
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.filters.len() + 2);
        params.push(("limit".to_string(), self.limit.to_string()));
        params.push(("offset".to_string(), self.offset.to_string()));
        params.extend(self.filters.iter().cloned());
        params
    }
}

/// Predicate plus page cursor. Every predicate change bumps `generation` so
/// fetches issued under an older predicate can be recognised on completion.
#[derive(Debug, Clone)]
pub struct QueryState {
    predicate: Predicate,
    page: PageState,
    generation: u64,
}

impl QueryState {
    pub fn new(page_size: u32) -> Self {
        Self {
            predicate: Predicate::default(),
            page: PageState::new(page_size),
            generation: 0,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn page(&self) -> PageState {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_predicate(&mut self, name: &str, value: PredicateValue) {
        self.predicate.replace(name, value);
        self.page.page = 0;
        self.generation += 1;
    }

    pub fn set_page(&mut self, page: u32) {
        self.page.page = page;
    }

    pub fn record_total(&mut self, total_count: u64) {
        self.page.total_count = total_count;
    }

    pub fn list_query(&self) -> ListQuery {
        ListQuery {
            limit: self.page.page_size,
            offset: self.page.offset(),
            filters: self
                .predicate
                .entries()
                .map(|(name, value)| (name.to_string(), value.to_param()))
                .collect(),
        }
    }
}
