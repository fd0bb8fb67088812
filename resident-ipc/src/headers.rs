//! Ordered header mapping shared by requests and responses

use serde::{Deserialize, Serialize};

/// Header mapping with case-insensitive keys.
///
/// Entries keep the order and spelling they were first inserted with so
/// they can be re-emitted unchanged. Adding a value under a key that is
/// already present joins the values with `", "`, or `"; "` for `Cookie`.
/// `Set-Cookie` values cannot be joined and keep one entry each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Look up a value, ignoring ASCII case of the key
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Every value stored under a key, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a value, replacing any previous ones. Returns the first replaced
    /// value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => {
                let old = std::mem::replace(&mut self.entries[idx].1, value);
                let mut seen = 0;
                self.entries.retain(|(key, _)| {
                    if !key.eq_ignore_ascii_case(&name) {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
                Some(old)
            }
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Add a value, folding it into an existing entry of the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let separator = match fold_separator(&name) {
            Some(separator) => separator,
            None => {
                self.entries.push((name, value));
                return;
            }
        };
        match self.position(&name) {
            Some(idx) => {
                let existing = &mut self.entries[idx].1;
                existing.push_str(separator);
                existing.push_str(&value);
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Remove every value stored under a key. Returns the first one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_owned);
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        first
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How repeated values of a header combine into one, `None` when they must
/// stay separate
fn fold_separator(name: &str) -> Option<&'static str> {
    if name.eq_ignore_ascii_case("set-cookie") {
        None
    } else if name.eq_ignore_ascii_case("cookie") {
        Some("; ")
    } else {
        Some(", ")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(entries: Vec<(String, String)>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Headers> for Vec<(String, String)> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}
