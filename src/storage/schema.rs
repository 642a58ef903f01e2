//! Declared collections and their schema versions.
//!
//! Upgrades are additive: a newer version may only add collections. Opening a
//! store never drops a collection that exists on disk.

pub const TRANSACTIONS: &str = "transactions";
pub const LEDGERS: &str = "ledgers";
pub const BALANCES: &str = "balances";
pub const PENDING_MUTATIONS: &str = "pendingMutations";
pub const SNAPSHOTS: &str = "snapshots";

/// Per-domain pending stores used by version 1 and 2 stores.
pub const LEGACY_PENDING_TRANSACTIONS: &str = "pendingTransactions";
pub const LEGACY_PENDING_LEDGERS: &str = "pendingLedgers";

/// Collections introduced by each schema version, oldest first.
const VERSIONS: &[(u32, &[&str])] = &[
    (1, &[TRANSACTIONS, LEGACY_PENDING_TRANSACTIONS]),
    (2, &[LEDGERS, LEGACY_PENDING_LEDGERS]),
    (3, &[BALANCES, PENDING_MUTATIONS, SNAPSHOTS]),
];

pub const CURRENT_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub version: u32,
    pub collections: Vec<String>,
}

impl Schema {
    /// Every collection declared up to and including `version`.
    pub fn at_version(version: u32) -> Self {
        let collections = VERSIONS
            .iter()
            .filter(|(v, _)| *v <= version)
            .flat_map(|(_, names)| names.iter().map(|n| n.to_string()))
            .collect();
        Self {
            version,
            collections,
        }
    }

    pub fn current() -> Self {
        Self::at_version(CURRENT_VERSION)
    }

    /// Extend with extra collections under a newer version number.
    pub fn with_collections(mut self, version: u32, extra: &[&str]) -> Self {
        self.version = self.version.max(version);
        for name in extra {
            if !self.declares(name) {
                self.collections.push(name.to_string());
            }
        }
        self
    }

    pub fn declares(&self, collection: &str) -> bool {
        self.collections.iter().any(|c| c == collection)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::current()
    }
}
