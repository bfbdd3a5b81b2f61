//! Typed DAO settings: read, propose and bootstrap.
//!
//! A setting lives at `path` inside a settings contract and is read with
//! `getSetting<Kind>(path)`. Changing it produces unsigned transactions only:
//!
//! - propose: `propose(message, proposalSetting<Kind>(contract, path, value))`
//!   on the proposals contract
//! - bootstrap: `bootstrapSetting<Kind>(contract, path, value)` on the DAO
//!   contract

use std::marker::PhantomData;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::U256;

use chainquery_core::{Batch, QueryError, Slot};

use crate::abi::{FromSolValue, IntoSolValue};
use crate::contract::{Contract, TransactionInfo};
use crate::registry::{ContractName, ContractRegistry};

/// Well-known setting paths.
pub mod paths {
    pub const SUBMIT_PRICES_ENABLED: &str = "network.submit.prices.enabled";
    pub const SUBMIT_PRICES_FREQUENCY: &str = "network.submit.prices.frequency";
    pub const SUBMIT_BALANCES_ENABLED: &str = "network.submit.balances.enabled";
    pub const SUBMIT_BALANCES_FREQUENCY: &str = "network.submit.balances.frequency";
    pub const MEMBERS_QUORUM: &str = "members.quorum";
    pub const MEMBERS_RPL_BOND: &str = "members.rplbond";
    pub const MEMBERS_CHALLENGE_COOLDOWN: &str = "members.challenge.cooldown";
}

/// A value type a setting can hold.
pub trait SettingType: FromSolValue + Clone + Send + Sync + 'static {
    /// Method suffix: `getSetting{KIND}`, `proposalSetting{KIND}`, ...
    const KIND: &'static str;

    fn to_sol_value(&self) -> DynSolValue;
}

impl SettingType for bool {
    const KIND: &'static str = "Bool";

    fn to_sol_value(&self) -> DynSolValue {
        self.into_sol_value()
    }
}

impl SettingType for U256 {
    const KIND: &'static str = "Uint";

    fn to_sol_value(&self) -> DynSolValue {
        self.into_sol_value()
    }
}

/// A uint256 setting read as `u64`.
impl SettingType for u64 {
    const KIND: &'static str = "Uint";

    fn to_sol_value(&self) -> DynSolValue {
        self.into_sol_value()
    }
}

pub struct Setting<V> {
    settings: Contract,
    dao: Contract,
    proposals: Contract,
    path: String,
    _value: PhantomData<fn() -> V>,
}

impl<V: SettingType> Setting<V> {
    pub fn new(settings: Contract, dao: Contract, proposals: Contract, path: impl Into<String>) -> Self {
        Self {
            settings,
            dao,
            proposals,
            path: path.into(),
            _value: PhantomData,
        }
    }

    /// A setting of `settings_contract`, managed by the trusted-node DAO.
    pub fn from_registry(
        registry: &ContractRegistry,
        settings_contract: &ContractName,
        path: impl Into<String>,
    ) -> Result<Self, QueryError> {
        Ok(Self::new(
            registry.get(settings_contract)?.clone(),
            registry.get(&ContractName::DAO_NODE_TRUSTED)?.clone(),
            registry.get(&ContractName::DAO_NODE_TRUSTED_PROPOSALS)?.clone(),
            path,
        ))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the contract that owns this setting.
    pub fn contract_name(&self) -> &str {
        self.settings.name()
    }

    /// Register a read of the current value into `slot`.
    pub fn add_read(&self, batch: &mut Batch, slot: &Slot<V>) -> Result<(), QueryError> {
        self.settings.add_call(
            batch,
            slot,
            &format!("getSetting{}", V::KIND),
            &[self.path.as_str().into_sol_value()],
        )
    }

    /// A proposal to change the setting. An empty `message` becomes
    /// `set <path>`.
    pub fn propose(&self, message: &str, value: &V) -> Result<TransactionInfo, QueryError> {
        let message = if message.is_empty() {
            format!("set {}", self.path)
        } else {
            message.to_string()
        };
        let payload = self
            .proposals
            .encode_call(&format!("proposalSetting{}", V::KIND), &self.change_args(value))?;
        self.proposals
            .transaction("propose", &[message.into_sol_value(), payload.into_sol_value()])
    }

    /// Set the value directly while the DAO is still in bootstrap mode.
    pub fn bootstrap(&self, value: &V) -> Result<TransactionInfo, QueryError> {
        self.dao
            .transaction(&format!("bootstrapSetting{}", V::KIND), &self.change_args(value))
    }

    fn change_args(&self, value: &V) -> [DynSolValue; 3] {
        [
            self.settings.name().into_sol_value(),
            self.path.as_str().into_sol_value(),
            value.to_sol_value(),
        ]
    }
}

impl<V> std::fmt::Debug for Setting<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("contract", &self.settings.name())
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::decode_params;
    use crate::abis;
    use alloy_dyn_abi::DynSolType;
    use alloy_primitives::{keccak256, Address};
    use chainquery_core::{BlockTag, EngineConfig, MemoryEndpoint, QueryEngine};
    use std::sync::Arc;

    fn contracts() -> (Contract, Contract, Contract) {
        (
            Contract::from_abi_json(
                "rocketDAONodeTrustedSettingsMembers",
                Address::repeat_byte(0x10),
                abis::DAO_NODE_TRUSTED_SETTINGS_MEMBERS,
            )
            .unwrap(),
            Contract::from_abi_json("rocketDAONodeTrusted", Address::repeat_byte(0x20), abis::DAO_NODE_TRUSTED)
                .unwrap(),
            Contract::from_abi_json(
                "rocketDAONodeTrustedProposals",
                Address::repeat_byte(0x30),
                abis::DAO_NODE_TRUSTED_PROPOSALS,
            )
            .unwrap(),
        )
    }

    fn quorum() -> Setting<U256> {
        let (settings, dao, proposals) = contracts();
        Setting::new(settings, dao, proposals, paths::MEMBERS_QUORUM)
    }

    #[test]
    fn propose_payload_decodes_back() {
        let value = U256::from(510_000_000_000_000_000u64);
        let tx = quorum().propose("", &value).unwrap();
        assert_eq!(tx.to, Address::repeat_byte(0x30));
        assert_eq!(&tx.data[..4], &keccak256("propose(string,bytes)")[..4]);

        let outer = decode_params(&[DynSolType::String, DynSolType::Bytes], &tx.data[4..]).unwrap();
        assert_eq!(String::from_sol_value(outer[0].clone()).unwrap(), "set members.quorum");
        let payload = alloy_primitives::Bytes::from_sol_value(outer[1].clone()).unwrap();
        assert_eq!(
            &payload[..4],
            &keccak256("proposalSettingUint(string,string,uint256)")[..4]
        );

        let inner = decode_params(
            &[DynSolType::String, DynSolType::String, DynSolType::Uint(256)],
            &payload[4..],
        )
        .unwrap();
        assert_eq!(
            String::from_sol_value(inner[0].clone()).unwrap(),
            "rocketDAONodeTrustedSettingsMembers"
        );
        assert_eq!(String::from_sol_value(inner[1].clone()).unwrap(), "members.quorum");
        assert_eq!(U256::from_sol_value(inner[2].clone()).unwrap(), value);
    }

    #[test]
    fn custom_message_is_kept() {
        let tx = quorum().propose("raise quorum", &U256::from(1u64)).unwrap();
        let outer = decode_params(&[DynSolType::String, DynSolType::Bytes], &tx.data[4..]).unwrap();
        assert_eq!(String::from_sol_value(outer[0].clone()).unwrap(), "raise quorum");
    }

    #[test]
    fn bootstrap_bool_targets_dao() {
        let (settings, dao, proposals) = contracts();
        let setting: Setting<bool> = Setting::new(settings, dao, proposals, "members.enabled");
        let tx = setting.bootstrap(&true).unwrap();
        assert_eq!(tx.to, Address::repeat_byte(0x20));
        assert_eq!(&tx.data[..4], &keccak256("bootstrapSettingBool(string,string,bool)")[..4]);

        let args = decode_params(
            &[DynSolType::String, DynSolType::String, DynSolType::Bool],
            &tx.data[4..],
        )
        .unwrap();
        assert_eq!(String::from_sol_value(args[1].clone()).unwrap(), "members.enabled");
        assert!(bool::from_sol_value(args[2].clone()).unwrap());
    }

    #[tokio::test]
    async fn read_u64_setting() {
        let (settings, dao, proposals) = contracts();
        let setting: Setting<u64> = Setting::new(settings.clone(), dao, proposals, paths::MEMBERS_CHALLENGE_COOLDOWN);

        let endpoint = Arc::new(MemoryEndpoint::new());
        endpoint.respond(
            settings.address(),
            settings
                .encode_call("getSettingUint", &[paths::MEMBERS_CHALLENGE_COOLDOWN.into_sol_value()])
                .unwrap(),
            DynSolValue::Tuple(vec![DynSolValue::Uint(U256::from(604_800u64), 256)]).abi_encode_params(),
        );
        let engine = QueryEngine::new(endpoint, EngineConfig::default()).unwrap();

        let slot = Slot::new();
        engine
            .query(|batch| setting.add_read(batch, &slot), BlockTag::Latest)
            .await
            .unwrap();
        assert_eq!(slot.get(), Some(604_800));
    }
}
