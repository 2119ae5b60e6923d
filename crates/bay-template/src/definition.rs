//! The rendered stack definition handed to the stack service.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Template body plus input parameters for one stack.
///
/// Parameters live in a `BTreeMap` so iteration (and therefore the
/// serialized request body and the fingerprint) is ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackDefinition {
    /// File name of the template, for logs and dry runs.
    pub template_name: &'static str,
    pub template: &'static str,
    pub parameters: BTreeMap<String, String>,
}

impl StackDefinition {
    /// SHA-256 over the template name, body, and parameters, hex-encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.template_name.as_bytes());
        hasher.update([0]);
        hasher.update(self.template.as_bytes());
        hasher.update([0]);
        for (key, value) in &self.parameters {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Which stack outputs feed the bay's address fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputKeys {
    pub api_address: &'static str,
    pub master_addresses: &'static str,
    pub node_addresses: &'static str,
}

/// Ordered parameter map under construction.
#[derive(Debug, Default)]
pub(crate) struct Params(BTreeMap<String, String>);

impl Params {
    pub(crate) fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn set_opt<T: ToString>(&mut self, key: &str, value: Option<T>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}
