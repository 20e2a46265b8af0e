//! Collaborator interfaces for host and credential records.
//!
//! Record CRUD lives outside this crate; the bridge only consumes the two
//! lookup-by-id operations defined here. The `Memory*` implementations back
//! small embeddings and tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{CredentialDescriptor, CredentialId, HostDescriptor, HostId};

/// Lookup of stored host records.
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Fetch the host record for `id`, if present. Pure lookup, no mutation.
    async fn get(&self, id: HostId) -> Option<HostDescriptor>;
}

/// Lookup of stored credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential record for `id`, if present. Pure lookup, no
    /// mutation.
    async fn get(&self, id: CredentialId) -> Option<CredentialDescriptor>;
}

/// An in-memory host registry.
#[derive(Debug, Default)]
pub struct MemoryHostRegistry {
    hosts: HashMap<HostId, HostDescriptor>,
}

impl MemoryHostRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host record, keyed by its id.
    #[must_use]
    pub fn with(mut self, host: HostDescriptor) -> Self {
        self.hosts.insert(host.id, host);
        self
    }
}

#[async_trait]
impl HostRegistry for MemoryHostRegistry {
    async fn get(&self, id: HostId) -> Option<HostDescriptor> {
        self.hosts.get(&id).cloned()
    }
}

/// An in-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: HashMap<CredentialId, CredentialDescriptor>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential record, keyed by its id.
    #[must_use]
    pub fn with(mut self, credential: CredentialDescriptor) -> Self {
        self.credentials.insert(credential.id, credential);
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, id: CredentialId) -> Option<CredentialDescriptor> {
        self.credentials.get(&id).cloned()
    }
}
