//! Contract handles: method encoding, batch registration and event decoding.

use std::fmt;
use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, Function, JsonAbi, Param};
use alloy_primitives::{Address, Bytes, B256, U256};
use indexmap::IndexMap;

use chainquery_core::{Batch, CallDescriptor, Log, QueryError, Slot};

use crate::abi::{coerce, decode_params, FromSolValue};

/// The data needed to build a transaction; never signed or sent here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A contract at a known address with a parsed ABI.
#[derive(Clone)]
pub struct Contract {
    name: String,
    address: Address,
    abi: Arc<JsonAbi>,
    version: u8,
}

impl Contract {
    pub fn new(name: impl Into<String>, address: Address, abi: JsonAbi) -> Self {
        Self {
            name: name.into(),
            address,
            abi: Arc::new(abi),
            version: 1,
        }
    }

    /// Create a handle from a standard Ethereum ABI JSON string.
    pub fn from_abi_json(
        name: impl Into<String>,
        address: Address,
        abi_json: &str,
    ) -> Result<Self, QueryError> {
        Ok(Self::new(name, address, parse_abi(abi_json)?))
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// `selector ++ abi(args)` for `method`.
    ///
    /// Overloads are told apart by argument count.
    pub fn encode_call(&self, method: &str, args: &[DynSolValue]) -> Result<Bytes, QueryError> {
        encode_function(self.function(method, args.len())?, args)
    }

    /// Decode the return data of `method` called with `argc` arguments.
    pub fn decode_output(
        &self,
        method: &str,
        argc: usize,
        data: &[u8],
    ) -> Result<Vec<DynSolValue>, QueryError> {
        decode_params(&resolve(&self.function(method, argc)?.outputs)?, data)
    }

    /// Register a read of `method(args)` whose first output lands in `slot`.
    pub fn add_call<T>(
        &self,
        batch: &mut Batch,
        slot: &Slot<T>,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<(), QueryError>
    where
        T: FromSolValue + Send + 'static,
    {
        let (calldata, outputs) = self.prepare(method, args)?;
        let label = format!("{}.{method}", self.name);
        batch.add(CallDescriptor::new(self.address, calldata, slot, move |data| {
            let first = decode_params(&outputs, data)?
                .into_iter()
                .next()
                .ok_or_else(|| QueryError::encoding(format!("{label} returns nothing")))?;
            T::from_sol_value(first)
        }))
    }

    /// Register a read of `method(args)` whose whole output tuple lands in `slot`.
    pub fn add_call_outputs<T>(
        &self,
        batch: &mut Batch,
        slot: &Slot<T>,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<(), QueryError>
    where
        T: FromSolValue + Send + 'static,
    {
        let (calldata, outputs) = self.prepare(method, args)?;
        batch.add(CallDescriptor::new(self.address, calldata, slot, move |data| {
            T::from_sol_value(DynSolValue::Tuple(decode_params(&outputs, data)?))
        }))
    }

    /// Unsigned transaction data for `method(args)` on this contract.
    pub fn transaction(&self, method: &str, args: &[DynSolValue]) -> Result<TransactionInfo, QueryError> {
        Ok(TransactionInfo {
            to: self.address,
            data: self.encode_call(method, args)?,
            value: U256::ZERO,
        })
    }

    /// `topic0` of the named event.
    pub fn event_topic(&self, name: &str) -> Result<B256, QueryError> {
        Ok(self.event(name)?.selector())
    }

    pub fn event(&self, name: &str) -> Result<&Event, QueryError> {
        self.abi
            .event(name)
            .and_then(|events| events.first())
            .ok_or_else(|| QueryError::encoding(format!("{} has no event {name}", self.name)))
    }

    /// Decode `log` against whichever event of this ABI its `topic0` names.
    pub fn decode_event(&self, log: &Log) -> Result<DecodedEvent, QueryError> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| QueryError::encoding("log has no topics"))?;
        let event = self
            .abi
            .events()
            .find(|e| !e.anonymous && e.selector() == *topic0)
            .ok_or_else(|| {
                QueryError::encoding(format!("{} has no event with topic {topic0}", self.name))
            })?;
        decode_log(event, log)
    }

    fn function(&self, method: &str, argc: usize) -> Result<&Function, QueryError> {
        let overloads = self
            .abi
            .function(method)
            .ok_or_else(|| QueryError::encoding(format!("{} has no method {method}", self.name)))?;
        overloads
            .iter()
            .find(|f| f.inputs.len() == argc)
            .ok_or_else(|| {
                QueryError::encoding(format!(
                    "{} has no overload of {method} taking {argc} arguments",
                    self.name
                ))
            })
    }

    fn prepare(&self, method: &str, args: &[DynSolValue]) -> Result<(Bytes, Vec<DynSolType>), QueryError> {
        let function = self.function(method, args.len())?;
        Ok((encode_function(function, args)?, resolve(&function.outputs)?))
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// An event log decoded into named fields, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub address: Address,
    pub block_number: u64,
    pub fields: IndexMap<String, DynSolValue>,
}

impl DecodedEvent {
    pub fn get<T: FromSolValue>(&self, field: &str) -> Result<T, QueryError> {
        let value = self.fields.get(field).ok_or_else(|| {
            QueryError::encoding(format!("event {} has no field {field}", self.name))
        })?;
        T::from_sol_value(value.clone())
    }
}

pub fn parse_abi(abi_json: &str) -> Result<JsonAbi, QueryError> {
    serde_json::from_str(abi_json).map_err(|e| QueryError::encoding(format!("invalid ABI JSON: {e}")))
}

fn resolve(params: &[Param]) -> Result<Vec<DynSolType>, QueryError> {
    params
        .iter()
        .map(|p| {
            p.resolve()
                .map_err(|e| QueryError::encoding(format!("unsupported ABI type {}: {e}", p.ty)))
        })
        .collect()
}

fn encode_function(function: &Function, args: &[DynSolValue]) -> Result<Bytes, QueryError> {
    let types = resolve(&function.inputs)?;
    let values = types
        .iter()
        .zip(args.iter().cloned())
        .enumerate()
        .map(|(i, (ty, arg))| {
            coerce(ty, arg).map_err(|e| {
                QueryError::encoding(format!("argument {i} of {}: {e}", function.name))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut data = function.selector().to_vec();
    data.extend(DynSolValue::Tuple(values).abi_encode_params());
    Ok(data.into())
}

fn decode_log(event: &Event, log: &Log) -> Result<DecodedEvent, QueryError> {
    let body_types = event
        .inputs
        .iter()
        .filter(|p| !p.indexed)
        .map(|p| {
            p.resolve()
                .map_err(|e| QueryError::encoding(format!("unsupported ABI type {}: {e}", p.ty)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut body = decode_params(&body_types, &log.data)?.into_iter();
    let mut topics = log.topics.iter().skip(1);

    let mut fields = IndexMap::with_capacity(event.inputs.len());
    for (i, input) in event.inputs.iter().enumerate() {
        let missing = || QueryError::encoding(format!("{} log is missing field {i}", event.name));
        let value = if input.indexed {
            let topic = topics.next().ok_or_else(missing)?;
            let ty = input
                .resolve()
                .map_err(|e| QueryError::encoding(format!("unsupported ABI type {}: {e}", input.ty)))?;
            decode_topic(&ty, topic)?
        } else {
            body.next().ok_or_else(missing)?
        };
        let name = if input.name.is_empty() {
            format!("arg{i}")
        } else {
            input.name.clone()
        };
        fields.insert(name, value);
    }

    Ok(DecodedEvent {
        name: event.name.clone(),
        address: log.address,
        block_number: log.block_number,
        fields,
    })
}

/// Value types are stored in the topic as-is; everything else as its hash.
fn decode_topic(ty: &DynSolType, topic: &B256) -> Result<DynSolValue, QueryError> {
    match ty {
        DynSolType::Bool
        | DynSolType::Int(_)
        | DynSolType::Uint(_)
        | DynSolType::Address
        | DynSolType::FixedBytes(_) => ty
            .abi_decode(topic.as_slice())
            .map_err(|e| QueryError::encoding(format!("topic decode: {e}"))),
        _ => Ok(DynSolValue::FixedBytes(*topic, 32)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IntoSolValue;
    use crate::abis;
    use alloy_primitives::keccak256;

    fn trusted() -> Contract {
        Contract::from_abi_json("rocketDAONodeTrusted", Address::repeat_byte(0xaa), abis::DAO_NODE_TRUSTED).unwrap()
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let data = trusted()
            .encode_call("getMemberAt", &[3u64.into_sol_value()])
            .unwrap();
        assert_eq!(&data[..4], &keccak256("getMemberAt(uint256)")[..4]);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(data[35], 3);
    }

    #[test]
    fn unknown_method_and_bad_args_are_encoding_errors() {
        let contract = trusted();
        assert!(matches!(
            contract.encode_call("nope", &[]),
            Err(QueryError::Encoding { .. })
        ));
        assert!(matches!(
            contract.encode_call("getMemberAt", &[true.into_sol_value()]),
            Err(QueryError::Encoding { .. })
        ));
        assert!(matches!(
            contract.encode_call("getMemberAt", &[]),
            Err(QueryError::Encoding { .. })
        ));
    }

    #[test]
    fn transaction_targets_contract() {
        let tx = trusted()
            .transaction(
                "bootstrapSettingBool",
                &["rocketDAONodeTrustedSettingsMembers".into_sol_value(), "members.quorum".into_sol_value(), true.into_sol_value()],
            )
            .unwrap();
        assert_eq!(tx.to, Address::repeat_byte(0xaa));
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(&tx.data[..4], &keccak256("bootstrapSettingBool(string,string,bool)")[..4]);
    }

    #[test]
    fn decode_event_reads_topics_and_data() {
        let actions = Contract::from_abi_json(
            "rocketDAONodeTrustedActions",
            Address::repeat_byte(0xbb),
            abis::DAO_NODE_TRUSTED_ACTIONS,
        )
        .unwrap();
        let topic0 = actions.event_topic("ActionChallengeDecided").unwrap();
        assert_eq!(
            topic0,
            keccak256("ActionChallengeDecided(address,address,bool,uint256)")
        );

        let challenged = Address::repeat_byte(1);
        let decider = Address::repeat_byte(2);
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Bool(true),
            DynSolValue::Uint(U256::from(1234u64), 256),
        ])
        .abi_encode_params();
        let log = Log::new(
            actions.address(),
            vec![topic0, challenged.into_word(), decider.into_word()],
            data,
            99,
        );

        let event = actions.decode_event(&log).unwrap();
        assert_eq!(event.name, "ActionChallengeDecided");
        assert_eq!(event.block_number, 99);
        assert_eq!(event.get::<Address>("nodeChallengedAddress").unwrap(), challenged);
        assert_eq!(event.get::<Address>("nodeChallengeDeciderAddress").unwrap(), decider);
        assert!(event.get::<bool>("success").unwrap());
        assert_eq!(event.get::<u64>("time").unwrap(), 1234);
        assert!(event.get::<u64>("missing").is_err());
    }

    #[test]
    fn decode_output_reads_first_value() {
        let contract = trusted();
        let data = DynSolValue::Tuple(vec![DynSolValue::Uint(U256::from(9u64), 256)]).abi_encode_params();
        let values = contract.decode_output("getMemberCount", 0, &data).unwrap();
        assert_eq!(u64::from_sol_value(values[0].clone()).unwrap(), 9);
    }
}
