//! Reads against the central key/value storage contract.

use alloy_primitives::{keccak256, Address, B256, U256};

use chainquery_core::{Batch, BlockTag, QueryEngine, QueryError, Slot};

use crate::abi::IntoSolValue;
use crate::abis;
use crate::contract::Contract;

/// `keccak256("contract.address" ++ name)`.
pub fn contract_address_key(name: &str) -> B256 {
    keccak256([b"contract.address".as_slice(), name.as_bytes()].concat())
}

/// The key under which the protocol's deployment block is stored.
pub fn deploy_block_key() -> B256 {
    keccak256("deploy.block")
}

#[derive(Debug, Clone)]
pub struct StorageReader {
    contract: Contract,
}

impl StorageReader {
    pub fn new(contract: Contract) -> Self {
        Self { contract }
    }

    /// A reader for the storage contract at `address`, using the bundled ABI.
    pub fn at(address: Address) -> Result<Self, QueryError> {
        Ok(Self::new(Contract::from_abi_json(
            "rocketStorage",
            address,
            abis::STORAGE,
        )?))
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn add_get_address(&self, batch: &mut Batch, slot: &Slot<Address>, key: B256) -> Result<(), QueryError> {
        self.contract.add_call(batch, slot, "getAddress", &[key.into_sol_value()])
    }

    pub fn add_get_uint(&self, batch: &mut Batch, slot: &Slot<U256>, key: B256) -> Result<(), QueryError> {
        self.contract.add_call(batch, slot, "getUint", &[key.into_sol_value()])
    }

    pub fn add_get_bool(&self, batch: &mut Batch, slot: &Slot<bool>, key: B256) -> Result<(), QueryError> {
        self.contract.add_call(batch, slot, "getBool", &[key.into_sol_value()])
    }

    /// Register a lookup of the address stored for contract `name`.
    pub fn add_contract_address(&self, batch: &mut Batch, slot: &Slot<Address>, name: &str) -> Result<(), QueryError> {
        self.add_get_address(batch, slot, contract_address_key(name))
    }

    /// The block the protocol was deployed at.
    pub async fn deploy_block(&self, engine: &QueryEngine, block: BlockTag) -> Result<u64, QueryError> {
        let slot = Slot::<U256>::new();
        engine
            .query(|batch| self.add_get_uint(batch, &slot, deploy_block_key()), block)
            .await?;
        let value = slot.take().unwrap_or_default();
        u64::try_from(value).map_err(|_| QueryError::encoding(format!("deploy block {value} exceeds u64")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_dyn_abi::DynSolValue;
    use chainquery_core::{EngineConfig, MemoryEndpoint};
    use std::sync::Arc;

    #[test]
    fn keys_are_concatenated_hashes() {
        assert_eq!(
            contract_address_key("rocketStorage"),
            keccak256(b"contract.addressrocketStorage")
        );
        assert_eq!(deploy_block_key(), keccak256(b"deploy.block"));
    }

    #[tokio::test]
    async fn deploy_block_reads_uint() {
        let reader = StorageReader::at(Address::repeat_byte(0x51)).unwrap();
        let endpoint = Arc::new(MemoryEndpoint::new());
        endpoint.respond(
            reader.address(),
            reader
                .contract()
                .encode_call("getUint", &[deploy_block_key().into_sol_value()])
                .unwrap(),
            DynSolValue::Uint(U256::from(13_325_304u64), 256).abi_encode_params(),
        );
        let engine = QueryEngine::new(endpoint, EngineConfig::default()).unwrap();

        assert_eq!(reader.deploy_block(&engine, BlockTag::Latest).await.unwrap(), 13_325_304);
    }
}
