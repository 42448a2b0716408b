//! `.properties` file loader with typed, defaulted getters

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, warn};

/// Flat key/value settings read from a `.properties` file
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`, falling back to an empty set when it cannot be read
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let props = Self::parse(&contents);
                debug!("Loaded {} properties from {:?}", props.len(), path);
                props
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Properties file {:?} not found, using defaults", path);
                Self::new()
            }
            Err(e) => {
                error!("Failed to load properties file {:?}: {}", path, e);
                Self::new()
            }
        }
    }

    /// Parse `key=value` / `key: value` lines
    pub fn parse(contents: &str) -> Self {
        let mut values = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = match line.find(['=', ':']) {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get_parsed(key, default)
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get_parsed(key, default)
    }

    /// `true`/`false` in any case
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(value) if value.eq_ignore_ascii_case("true") => true,
            Some(value) if value.eq_ignore_ascii_case("false") => false,
            Some(value) => {
                warn!(
                    "Property {} has non-boolean value '{}', using {}",
                    key, value, default
                );
                default
            }
        }
    }

    fn get_parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display,
    {
        match self.get(key) {
            None => default,
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(
                    "Property {} has invalid value '{}', using {}",
                    key, value, default
                );
                default
            }),
        }
    }
}
