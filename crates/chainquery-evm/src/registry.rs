//! Caller-owned catalog of contract handles.
//!
//! Built once by [`RegistryBuilder`]: addresses not given explicitly are
//! resolved from the storage contract, then every contract's `version()` is
//! read. Nothing here is global or lazily locked.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_dyn_abi::DynSolType;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{keccak256, Address};
use tracing::{debug, info};

use chainquery_core::{BlockTag, CallDescriptor, QueryEngine, QueryError, Slot};

use crate::abi::{decode_params, FromSolValue};
use crate::abis;
use crate::contract::{parse_abi, Contract};
use crate::storage::StorageReader;

/// The storage-registered name of a network contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractName(Cow<'static, str>);

impl ContractName {
    pub const STORAGE: Self = Self::from_static("rocketStorage");
    pub const DAO_NODE_TRUSTED: Self = Self::from_static("rocketDAONodeTrusted");
    pub const DAO_NODE_TRUSTED_ACTIONS: Self = Self::from_static("rocketDAONodeTrustedActions");
    pub const DAO_NODE_TRUSTED_PROPOSALS: Self = Self::from_static("rocketDAONodeTrustedProposals");
    pub const DAO_NODE_TRUSTED_SETTINGS_MEMBERS: Self =
        Self::from_static("rocketDAONodeTrustedSettingsMembers");
    pub const DAO_PROTOCOL_SETTINGS_NETWORK: Self =
        Self::from_static("rocketDAOProtocolSettingsNetwork");
    pub const NETWORK_PRICES: Self = Self::from_static("rocketNetworkPrices");
    pub const NETWORK_BALANCES: Self = Self::from_static("rocketNetworkBalances");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ABI shipped with this crate for `self`, if any.
    pub fn bundled_abi(&self) -> Option<&'static str> {
        Some(match self.as_str() {
            "rocketStorage" => abis::STORAGE,
            "rocketDAONodeTrusted" => abis::DAO_NODE_TRUSTED,
            "rocketDAONodeTrustedActions" => abis::DAO_NODE_TRUSTED_ACTIONS,
            "rocketDAONodeTrustedProposals" => abis::DAO_NODE_TRUSTED_PROPOSALS,
            "rocketDAONodeTrustedSettingsMembers" => abis::DAO_NODE_TRUSTED_SETTINGS_MEMBERS,
            "rocketDAOProtocolSettingsNetwork" => abis::DAO_PROTOCOL_SETTINGS_NETWORK,
            "rocketNetworkPrices" => abis::NETWORK_PRICES,
            "rocketNetworkBalances" => abis::NETWORK_BALANCES,
            _ => return None,
        })
    }

    /// Every name with a bundled ABI, storage excluded.
    pub fn bundled() -> [Self; 7] {
        [
            Self::DAO_NODE_TRUSTED,
            Self::DAO_NODE_TRUSTED_ACTIONS,
            Self::DAO_NODE_TRUSTED_PROPOSALS,
            Self::DAO_NODE_TRUSTED_SETTINGS_MEMBERS,
            Self::DAO_PROTOCOL_SETTINGS_NETWORK,
            Self::NETWORK_PRICES,
            Self::NETWORK_BALANCES,
        ]
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ContractName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Loaded contract handles, keyed by name.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    storage: StorageReader,
    contracts: HashMap<ContractName, Contract>,
}

impl ContractRegistry {
    pub fn storage(&self) -> &StorageReader {
        &self.storage
    }

    pub fn get(&self, name: &ContractName) -> Result<&Contract, QueryError> {
        self.contracts.get(name).ok_or_else(|| QueryError::UnknownContract {
            name: name.to_string(),
        })
    }

    /// Look up several contracts at once; fails on the first missing one.
    pub fn get_all<const N: usize>(&self, names: [&ContractName; N]) -> Result<[&Contract; N], QueryError> {
        let mut found = Vec::with_capacity(N);
        for name in names {
            found.push(self.get(name)?);
        }
        found
            .try_into()
            .map_err(|_| QueryError::InvalidConfig("contract lookup count mismatch".into()))
    }

    pub fn contains(&self, name: &ContractName) -> bool {
        self.contracts.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ContractName> {
        self.contracts.keys()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

struct Entry {
    name: ContractName,
    abi: JsonAbi,
    address: Option<Address>,
}

/// Collects contract definitions and loads them in two batched passes.
pub struct RegistryBuilder {
    storage_address: Address,
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    pub fn new(storage_address: Address) -> Self {
        Self {
            storage_address,
            entries: Vec::new(),
        }
    }

    /// A contract whose address is resolved from storage.
    pub fn contract(self, name: ContractName, abi_json: &str) -> Result<Self, QueryError> {
        self.push(name, abi_json, None)
    }

    /// A contract at a known address.
    pub fn contract_at(self, name: ContractName, address: Address, abi_json: &str) -> Result<Self, QueryError> {
        self.push(name, abi_json, Some(address))
    }

    /// A contract resolved from storage, using its bundled ABI.
    pub fn bundled(self, name: ContractName) -> Result<Self, QueryError> {
        let abi = name.bundled_abi().ok_or_else(|| QueryError::UnknownContract {
            name: name.to_string(),
        })?;
        self.contract(name, abi)
    }

    /// Every contract with a bundled ABI, resolved from storage.
    pub fn with_bundled(self) -> Result<Self, QueryError> {
        ContractName::bundled()
            .into_iter()
            .try_fold(self, |builder, name| builder.bundled(name))
    }

    fn push(mut self, name: ContractName, abi_json: &str, address: Option<Address>) -> Result<Self, QueryError> {
        let abi = parse_abi(abi_json)?;
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry { name, abi, address });
        Ok(self)
    }

    pub async fn build(self, engine: &QueryEngine, block: BlockTag) -> Result<ContractRegistry, QueryError> {
        let storage = StorageReader::at(self.storage_address)?;
        let mut entries = self.entries;

        let addresses = resolve_addresses(engine, &storage, &entries, block).await?;
        for (entry, address) in entries.iter_mut().zip(addresses) {
            entry.address = Some(address);
        }

        let targets: Vec<Address> = entries.iter().filter_map(|e| e.address).collect();
        let versions = read_versions(engine, targets, block).await?;

        let contracts: HashMap<ContractName, Contract> = entries
            .into_iter()
            .zip(versions)
            .filter_map(|(entry, version)| {
                let address = entry.address?;
                let contract = Contract::new(entry.name.to_string(), address, entry.abi).with_version(version);
                Some((entry.name, contract))
            })
            .collect();

        info!(contracts = contracts.len(), storage = %self.storage_address, "contract registry loaded");
        Ok(ContractRegistry { storage, contracts })
    }
}

/// Fill in every missing address from storage; returns one address per entry.
async fn resolve_addresses(
    engine: &QueryEngine,
    storage: &StorageReader,
    entries: &[Entry],
    block: BlockTag,
) -> Result<Vec<Address>, QueryError> {
    let pending: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].address.is_none()).collect();
    let names: Arc<Vec<String>> = Arc::new(pending.iter().map(|&i| entries[i].name.to_string()).collect());
    let slots = Arc::new(Slot::<Address>::many(pending.len()));

    if !pending.is_empty() {
        debug!(count = pending.len(), "resolving contract addresses from storage");
        let reader = storage.clone();
        let (register_names, register_slots) = (Arc::clone(&names), Arc::clone(&slots));
        engine
            .flex_batch_query(
                pending.len(),
                engine.config().address_batch_size,
                move |batch, i| reader.add_contract_address(batch, &register_slots[i], &register_names[i]),
                |success, i| {
                    let address = slots[i].get().unwrap_or(Address::ZERO);
                    if !success || address == Address::ZERO {
                        return Err(QueryError::UnknownContract {
                            name: names[i].clone(),
                        });
                    }
                    Ok(())
                },
                block,
            )
            .await?;
    }

    let mut resolved = pending.iter().zip(slots.iter());
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.address {
            Some(address) => out.push(address),
            None => {
                let (_, slot) = resolved
                    .next()
                    .ok_or_else(|| QueryError::InvalidConfig("address resolution out of step".into()))?;
                out.push(slot.get().unwrap_or(Address::ZERO));
            }
        }
    }
    Ok(out)
}

/// `version()` for each target; a failed read means version 1.
async fn read_versions(engine: &QueryEngine, targets: Vec<Address>, block: BlockTag) -> Result<Vec<u8>, QueryError> {
    let count = targets.len();
    let slots = Arc::new(Slot::<u8>::many(count));
    let calldata = keccak256("version()")[..4].to_vec();
    let targets = Arc::new(targets);

    let register_slots = Arc::clone(&slots);
    engine
        .flex_batch_query(
            count,
            engine.config().contract_version_batch_size,
            move |batch, i| {
                batch.add(CallDescriptor::new(
                    targets[i],
                    calldata.clone(),
                    &register_slots[i],
                    |data| {
                        let values = decode_params(&[DynSolType::Uint(8)], data)?;
                        values
                            .into_iter()
                            .next()
                            .map(u8::from_sol_value)
                            .unwrap_or_else(|| Err(QueryError::encoding("empty version")))
                    },
                ))
            },
            |success, i| {
                if !success {
                    debug!(index = i, "version() unavailable, assuming 1");
                }
                Ok(())
            },
            block,
        )
        .await?;

    Ok(slots.iter().map(|s| s.get_or(1)).collect())
}
