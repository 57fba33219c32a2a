//! Universal configuration values.
//!
//! Backends inject arbitrary typed values into a shared configuration bag.
//! Values are a small tagged enum; callers read them through typed
//! [`ConfigKey`] descriptors, so there is no runtime reflection and unknown
//! keys pass through to the backend untouched.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Typed descriptor token for a configuration entry.
pub struct ConfigKey<T: 'static> {
    pub name: &'static str,
    default: fn() -> T,
    extract: fn(&ConfigValue) -> Option<T>,
}

impl<T> fmt::Debug for ConfigKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigKey({})", self.name)
    }
}

fn default_root() -> Option<String> {
    None
}

fn default_bare() -> bool {
    true
}

fn default_disk() -> bool {
    false
}

fn extract_opt_string(v: &ConfigValue) -> Option<Option<String>> {
    v.as_str().map(|s| Some(s.to_owned()))
}

fn extract_bool(v: &ConfigValue) -> Option<bool> {
    v.as_bool()
}

/// Backing directory for on-disk backends.
pub const ROOT: ConfigKey<Option<String>> = ConfigKey {
    name: "root",
    default: default_root,
    extract: extract_opt_string,
};

/// Suppress working-tree materialisation.
pub const BARE: ConfigKey<bool> = ConfigKey {
    name: "bare",
    default: default_bare,
    extract: extract_bool,
};

/// Enable disk-backed watch via the directory-watch hook.
pub const DISK: ConfigKey<bool> = ConfigKey {
    name: "disk",
    default: default_disk,
    extract: extract_bool,
};

/// A dictionary of named, universally-typed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: ConfigValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// The raw value under `name`, for backend-specific keys.
    pub fn raw(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    /// Reads a recognized key through its descriptor; a missing entry or a
    /// value of the wrong shape yields the key's default.
    pub fn get<T>(&self, key: &ConfigKey<T>) -> T {
        self.values
            .get(key.name)
            .and_then(key.extract)
            .unwrap_or_else(key.default)
    }
}
