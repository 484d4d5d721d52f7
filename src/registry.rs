//! Registry of the providers available to this process.
//!
//! Built once at startup and shared read-only behind an `Arc`.

use std::collections::HashMap;

use forge_common::{ForgeError, ForgeResult, ProviderDescriptor};

use crate::provider::Provider;

#[derive(Debug, Clone)]
pub struct RegisteredProvider {
    pub descriptor: ProviderDescriptor,
    pub provider: Provider,
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    /// Registration order.
    entries: Vec<RegisteredProvider>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ProviderDescriptor, provider: Provider) -> ForgeResult<()> {
        if self.index.contains_key(&descriptor.id) {
            return Err(ForgeError::DuplicateProvider(descriptor.id));
        }
        self.index.insert(descriptor.id.clone(), self.entries.len());
        self.entries.push(RegisteredProvider {
            descriptor,
            provider,
        });
        Ok(())
    }

    pub fn get(&self, id: &str) -> ForgeResult<&RegisteredProvider> {
        self.index
            .get(id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ForgeError::UnknownProvider(id.to_string()))
    }

    pub fn descriptor(&self, id: &str) -> ForgeResult<&ProviderDescriptor> {
        self.get(id).map(|entry| &entry.descriptor)
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> ProviderDescriptor {
        ProviderDescriptor::new(id, id.to_uppercase())
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(descriptor("external"), Provider::External)
            .unwrap();

        let entry = registry.get("external").unwrap();
        assert_eq!(entry.descriptor.name, "EXTERNAL");
        assert_eq!(entry.provider.kind(), "external");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(descriptor("a"), Provider::External).unwrap();
        let err = registry
            .register(descriptor("a"), Provider::External)
            .unwrap_err();
        assert!(matches!(err, ForgeError::DuplicateProvider(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("missing"),
            Err(ForgeError::UnknownProvider(id)) if id == "missing"
        ));
        assert!(registry.descriptor("missing").is_err());
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut registry = ProviderRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.register(descriptor(id), Provider::External).unwrap();
        }
        let ids: Vec<_> = registry.list().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }
}
