//! chainquery-evm: EVM bindings for the ChainQuery engine, built on alloy-rs.
//!
//! - [`Contract`]: ABI-aware handle that registers typed reads into a batch
//! - [`Multicall`]: the `tryAggregate` batch endpoint over `eth_call`
//! - [`RpcLogSource`]: `eth_getLogs` log source
//! - [`ContractRegistry`] / [`RegistryBuilder`]: storage-resolved contract catalog
//! - [`Setting`]: typed DAO settings with proposal/bootstrap encoding

pub mod abi;
pub mod abis;
pub mod contract;
pub mod logs;
pub mod multicall;
pub mod registry;
pub mod settings;
pub mod storage;

pub use abi::{FromSolValue, IntoSolValue};
pub use contract::{Contract, DecodedEvent, TransactionInfo};
pub use logs::{RawLog, RpcLogSource};
pub use multicall::{Multicall, MULTICALL2_ADDRESS};
pub use registry::{ContractName, ContractRegistry, RegistryBuilder};
pub use settings::{paths, Setting, SettingType};
pub use storage::{contract_address_key, deploy_block_key, StorageReader};

pub use alloy_dyn_abi::DynSolValue;
pub use alloy_primitives::{Address, Bytes, B256, U256};
