use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::ValidationError;

/// Check the `0x` + 40 hex digit shape and return the lowercase form
pub fn validate_address(address: &str) -> Result<String, ValidationError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingAddress);
    }

    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());

    if valid {
        Ok(trimmed.to_lowercase())
    } else {
        Err(ValidationError::InvalidAddress(trimmed.to_string()))
    }
}

/// Runtime-mutable set of watched addresses, stored lowercase
#[derive(Debug, Default)]
pub struct WatchList {
    addresses: RwLock<HashSet<String>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured addresses; any malformed entry fails the whole list
    pub fn from_addresses<I, S>(addresses: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for address in addresses {
            set.insert(validate_address(address.as_ref())?);
        }
        Ok(Self {
            addresses: RwLock::new(set),
        })
    }

    pub fn add(&self, address: &str) -> Result<String, ValidationError> {
        let normalized = validate_address(address)?;
        let mut addresses = self.addresses.write().unwrap_or_else(|e| e.into_inner());
        if !addresses.insert(normalized.clone()) {
            return Err(ValidationError::DuplicateAddress(normalized));
        }
        Ok(normalized)
    }

    pub fn remove(&self, address: &str) -> Result<String, ValidationError> {
        let normalized = validate_address(address)?;
        let mut addresses = self.addresses.write().unwrap_or_else(|e| e.into_inner());
        if !addresses.remove(&normalized) {
            return Err(ValidationError::UnknownAddress(normalized));
        }
        Ok(normalized)
    }

    /// Membership test; `address` must already be lowercase
    pub fn contains(&self, address: &str) -> bool {
        self.addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address)
    }

    /// Sorted snapshot
    pub fn list(&self) -> Vec<String> {
        let mut list: Vec<String> = self
            .addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        list.sort();
        list
    }

    pub fn len(&self) -> usize {
        self.addresses.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
