//! C6: the dissector registry. Dissectors are registered against a
//! [`ProtocolKey`] (a well-known port or an Ethernet type) and constructed
//! lazily via factory closures, so the default registry can be built once,
//! behind a [`std::sync::OnceLock`], with no ordering hazard between modules.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::dissector::Dissector;
use crate::error::{Result, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKey {
    Port(u16),
    EtherType(u16),
}

type Factory = Box<dyn Fn() -> Box<dyn Dissector> + Send + Sync>;

/// Maps protocol keys to dissector factories. Lookup constructs a fresh
/// dissector instance per call; callers that need a resumable dissector
/// across multiple `parse` calls should keep the `Box<dyn Dissector>` they
/// got back rather than looking it up again.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<ProtocolKey, Factory>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register<F>(&mut self, key: ProtocolKey, factory: F)
    where
        F: Fn() -> Box<dyn Dissector> + Send + Sync + 'static,
    {
        debug!("registering dissector factory for {:?}", key);
        self.factories.insert(key, Box::new(factory));
    }

    pub fn try_register<F>(&mut self, key: ProtocolKey, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Dissector> + Send + Sync + 'static,
    {
        if self.factories.contains_key(&key) {
            warn!("refusing duplicate registration for {:?}", key);
            return Err(RegistryError::DuplicateKey(key));
        }
        debug!("registering dissector factory for {:?}", key);
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    pub fn create(&self, key: ProtocolKey) -> Result<Box<dyn Dissector>> {
        match self.factories.get(&key) {
            Some(f) => Ok(f()),
            None => {
                trace!("no dissector registered for {:?}", key);
                Err(RegistryError::UnknownKey(key))
            }
        }
    }

    pub fn contains(&self, key: ProtocolKey) -> bool {
        self.factories.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

fn build_default_registry() -> Registry {
    let mut registry = Registry::new();
    crate::dissectors::arp::register(&mut registry);
    crate::dissectors::dns::register(&mut registry);
    crate::dissectors::ssh::register(&mut registry);
    crate::dissectors::telnet::register(&mut registry);
    crate::dissectors::websocket::register(&mut registry);
    crate::dissectors::mqtt::register(&mut registry);
    crate::dissectors::pop3::register(&mut registry);
    crate::dissectors::diameter::register(&mut registry);
    crate::dissectors::gtpv2::register(&mut registry);
    crate::dissectors::radius::register(&mut registry);
    crate::dissectors::m3ua::register(&mut registry);
    crate::dissectors::skeletons::register(&mut registry);
    registry
}

static DEFAULT_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The registry of every built-in dissector, built once on first access.
pub fn default_registry() -> &'static Registry {
    DEFAULT_REGISTRY.get_or_init(build_default_registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_builtin_protocol() {
        let registry = default_registry();
        assert!(registry.contains(ProtocolKey::EtherType(0x0806)));
        assert!(registry.contains(ProtocolKey::Port(53)));
        assert!(registry.contains(ProtocolKey::Port(22)));
        assert!(registry.contains(ProtocolKey::Port(23)));
        assert!(registry.contains(ProtocolKey::Port(80)));
        assert!(registry.contains(ProtocolKey::Port(1883)));
        assert!(registry.contains(ProtocolKey::Port(110)));
        assert!(registry.contains(ProtocolKey::Port(3868)));
        assert!(registry.contains(ProtocolKey::Port(2123)));
        assert!(registry.contains(ProtocolKey::Port(1812)));
        assert!(registry.contains(ProtocolKey::Port(2905)));
        assert!(registry.contains(ProtocolKey::Port(36412)));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let registry = Registry::new();
        assert!(registry.create(ProtocolKey::Port(1)).is_err());
    }

    #[test]
    fn try_register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry.register(ProtocolKey::Port(9), || Box::new(crate::dissectors::telnet::TelnetDissector::new()));
        let result = registry.try_register(ProtocolKey::Port(9), || {
            Box::new(crate::dissectors::telnet::TelnetDissector::new())
        });
        assert!(matches!(result, Err(RegistryError::DuplicateKey(_))));
    }
}
