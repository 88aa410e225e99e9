//! A case-insensitive, multi-valued header container
//!
//! Lookup ignores case; emission preserves whichever casing the last writer
//! used. Both the HTTP transport (client headers) and the FastCGI driver
//! (headers rebuilt from `HTTP_*` parameters) store into this.

use std::collections::hash_map::{self, HashMap};

#[derive(Debug, Clone, Default)]
pub struct Headers {
    /// Keyed by the lowercased name; each entry remembers the casing it
    /// was stored under
    map: HashMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    values: Vec<String>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers {
            map: HashMap::new(),
        }
    }

    /// Gets all values for `key`, case-insensitively
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.map
            .get(&key.to_ascii_lowercase())
            .map(|entry| entry.values.as_slice())
    }

    /// Gets the first value for `key`
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|values| values.first()).map(String::as_str)
    }

    /// Sets `key` to a single value, replacing anything stored before
    pub fn set(&mut self, key: &str, value: &str) {
        self.set_all(key, vec![String::from(value)]);
    }

    /// Sets `key` to a list of values, replacing anything stored before
    pub fn set_all(&mut self, key: &str, values: Vec<String>) {
        self.map.insert(
            key.to_ascii_lowercase(),
            Entry {
                name: String::from(key),
                values,
            },
        );
    }

    /// Appends a value under `key`, keeping any values already present
    pub fn append(&mut self, key: &str, value: &str) {
        match self.map.entry(key.to_ascii_lowercase()) {
            hash_map::Entry::Occupied(mut slot) => {
                slot.get_mut().values.push(String::from(value));
            }
            hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    name: String::from(key),
                    values: vec![String::from(value)],
                });
            }
        }
    }

    /// Removes `key`, case-insensitively
    pub fn remove(&mut self, key: &str) {
        self.map.remove(&key.to_ascii_lowercase());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(&key.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(stored-case name, values)` pairs in no particular
    /// order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.map.values(),
        }
    }
}

pub struct Iter<'a> {
    inner: hash_map::Values<'a, String, Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a [String]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a [String]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
