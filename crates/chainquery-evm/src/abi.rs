//! Conversions between Rust values and alloy's `DynSolValue`.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, Bytes, B256, U256};

use chainquery_core::QueryError;

/// A Rust type a decoded ABI value can be converted into.
pub trait FromSolValue: Sized {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError>;
}

/// A Rust type usable as an ABI call argument.
pub trait IntoSolValue {
    fn into_sol_value(self) -> DynSolValue;
}

fn mismatch(expected: &str, got: &DynSolValue) -> QueryError {
    QueryError::encoding(format!("expected {expected}, got {got:?}"))
}

impl FromSolValue for DynSolValue {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        Ok(value)
    }
}

impl FromSolValue for bool {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromSolValue for U256 {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Uint(u, _) => Ok(u),
            other => Err(mismatch("uint", &other)),
        }
    }
}

macro_rules! narrow_uint {
    ($($ty:ty),*) => {$(
        impl FromSolValue for $ty {
            fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
                let wide = U256::from_sol_value(value)?;
                <$ty>::try_from(wide).map_err(|_| {
                    QueryError::encoding(format!(
                        "{wide} does not fit in {}",
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

narrow_uint!(u8, u32, u64, u128);

impl FromSolValue for Address {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Address(a) => Ok(a),
            other => Err(mismatch("address", &other)),
        }
    }
}

impl FromSolValue for String {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromSolValue for Bytes {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Bytes(b) => Ok(b.into()),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl FromSolValue for B256 {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::FixedBytes(word, 32) => Ok(word),
            other => Err(mismatch("bytes32", &other)),
        }
    }
}

impl<T: FromSolValue> FromSolValue for Vec<T> {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
                values.into_iter().map(T::from_sol_value).collect()
            }
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<A: FromSolValue, B: FromSolValue> FromSolValue for (A, B) {
    fn from_sol_value(value: DynSolValue) -> Result<Self, QueryError> {
        match value {
            DynSolValue::Tuple(values) if values.len() == 2 => {
                let mut values = values.into_iter();
                match (values.next(), values.next()) {
                    (Some(a), Some(b)) => Ok((A::from_sol_value(a)?, B::from_sol_value(b)?)),
                    _ => Err(QueryError::encoding("expected a pair")),
                }
            }
            other => Err(mismatch("(T, U)", &other)),
        }
    }
}

impl IntoSolValue for DynSolValue {
    fn into_sol_value(self) -> DynSolValue {
        self
    }
}

impl IntoSolValue for bool {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::Bool(self)
    }
}

impl IntoSolValue for U256 {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::Uint(self, 256)
    }
}

impl IntoSolValue for u64 {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::Uint(U256::from(self), 256)
    }
}

impl IntoSolValue for Address {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::Address(self)
    }
}

impl IntoSolValue for B256 {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::FixedBytes(self, 32)
    }
}

impl IntoSolValue for String {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::String(self)
    }
}

impl IntoSolValue for &str {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::String(self.to_string())
    }
}

impl IntoSolValue for Bytes {
    fn into_sol_value(self) -> DynSolValue {
        DynSolValue::Bytes(self.to_vec())
    }
}

/// Re-tag `value` with the exact widths `ty` declares.
///
/// Arguments are built with default widths (`uint256`, `bytes32`); a method
/// taking `uint8` or `bytes4` still accepts them as long as the shape fits.
pub fn coerce(ty: &DynSolType, value: DynSolValue) -> Result<DynSolValue, QueryError> {
    let coerced = match (ty, value) {
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => {
            if *bits < 256 && v.bit_len() > *bits {
                return Err(QueryError::encoding(format!("{v} does not fit in uint{bits}")));
            }
            DynSolValue::Uint(v, *bits)
        }
        (DynSolType::Int(bits), DynSolValue::Int(v, _)) => DynSolValue::Int(v, *bits),
        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, _)) => {
            DynSolValue::FixedBytes(word, *size)
        }
        (DynSolType::Array(inner), DynSolValue::Array(values)) => DynSolValue::Array(
            values
                .into_iter()
                .map(|v| coerce(inner, v))
                .collect::<Result<_, _>>()?,
        ),
        (DynSolType::FixedArray(inner, len), DynSolValue::FixedArray(values))
            if values.len() == *len =>
        {
            DynSolValue::FixedArray(
                values
                    .into_iter()
                    .map(|v| coerce(inner, v))
                    .collect::<Result<_, _>>()?,
            )
        }
        (DynSolType::Tuple(types), DynSolValue::Tuple(values)) if types.len() == values.len() => {
            DynSolValue::Tuple(
                types
                    .iter()
                    .zip(values)
                    .map(|(t, v)| coerce(t, v))
                    .collect::<Result<_, _>>()?,
            )
        }
        (ty, value) => {
            if !ty.matches(&value) {
                return Err(QueryError::encoding(format!(
                    "value {value:?} does not match {ty:?}"
                )));
            }
            value
        }
    };
    Ok(coerced)
}

/// ABI-decode `data` as a parameter list of `types`.
pub fn decode_params(types: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>, QueryError> {
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let decoded = DynSolType::Tuple(types.to_vec())
        .abi_decode_params(data)
        .map_err(|e| QueryError::encoding(format!("return data decode: {e}")))?;
    Ok(match decoded {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    })
}
