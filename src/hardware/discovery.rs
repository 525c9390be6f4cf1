//! Resource catalog with an explicit lifecycle.
//!
//! The catalog lists the instrument addresses the host knows about (from the
//! `resources` configuration section). It is created at host startup with
//! [`ResourceCatalog::init`] and torn down with [`ResourceCatalog::shutdown`];
//! nothing in the crate reaches for a global instance. It does not probe buses.

use crate::error::{AppResult, IvError};
use crate::hardware::transport::ResourceAddress;
use serde::Serialize;

/// One known instrument address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceEntry {
    /// Address as written in the configuration
    pub raw: String,
    /// Canonical VISA-style form
    pub canonical: String,
    /// Whether the address names a simulated instrument
    pub simulated: bool,
}

/// Known instrument addresses, valid between `init` and `shutdown`
#[derive(Debug)]
pub struct ResourceCatalog {
    entries: Vec<ResourceEntry>,
    rejected: Vec<(String, String)>,
    open: bool,
}

impl ResourceCatalog {
    /// Build the catalog from configured addresses.
    ///
    /// Unparseable addresses are logged and kept aside in [`rejected`](Self::rejected)
    /// rather than failing startup.
    pub fn init<S: AsRef<str>>(addresses: &[S]) -> Self {
        let mut entries = Vec::with_capacity(addresses.len());
        let mut rejected = Vec::new();

        for raw in addresses {
            let raw = raw.as_ref();
            match ResourceAddress::parse(raw) {
                Ok(address) => entries.push(ResourceEntry {
                    raw: raw.to_string(),
                    canonical: address.to_string(),
                    simulated: matches!(address, ResourceAddress::Mock(_)),
                }),
                Err(e) => {
                    tracing::warn!(address = raw, error = %e, "ignoring resource");
                    rejected.push((raw.to_string(), e.to_string()));
                }
            }
        }

        tracing::info!(
            resources = entries.len(),
            rejected = rejected.len(),
            "resource catalog initialized"
        );
        Self {
            entries,
            rejected,
            open: true,
        }
    }

    /// Known addresses
    pub fn resources(&self) -> AppResult<&[ResourceEntry]> {
        self.ensure_open()?;
        Ok(&self.entries)
    }

    /// Addresses that failed to parse, with the reason
    pub fn rejected(&self) -> &[(String, String)] {
        &self.rejected
    }

    /// Look up an entry by its configured or canonical form
    pub fn find(&self, address: &str) -> AppResult<Option<&ResourceEntry>> {
        self.ensure_open()?;
        Ok(self
            .entries
            .iter()
            .find(|e| e.raw == address || e.canonical == address))
    }

    /// Whether `shutdown` has not yet run
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Tear the catalog down. Later lookups fail.
    pub fn shutdown(&mut self) {
        if self.open {
            tracing::info!(resources = self.entries.len(), "resource catalog shut down");
        }
        self.entries.clear();
        self.open = false;
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(IvError::Internal("resource catalog is shut down".to_string()))
        }
    }
}
