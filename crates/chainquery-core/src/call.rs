//! Call descriptors and the destination slots they write into.
//!
//! A [`CallDescriptor`] pairs an encoded read request with a decoder that is
//! bound to exactly one [`Slot`]. Decoding and storing are separate steps: a
//! batch decodes every successful result first and only then commits them,
//! so a rejected batch leaves every slot as it was.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, Bytes};

use crate::error::QueryError;
use crate::transport::EncodedCall;

/// A shared handle to one destination cell.
///
/// Clones refer to the same cell. Each slot is written by the decoder of the
/// single descriptor bound to it, so the lock is never contended across
/// shards.
pub struct Slot<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(None)),
        }
    }

    /// Allocate `n` independent slots, one per logical item.
    pub fn many(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::new()).collect()
    }

    /// Store a value, replacing any previous one.
    pub fn set(&self, value: T) {
        *self.lock() = Some(value);
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A poisoned slot still holds a whole value; the writer never
        // panics halfway through an assignment.
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    /// The stored value, or `default` if the slot was never written.
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.lock()).finish()
    }
}

/// A decoded value waiting to be written into its slot.
pub(crate) type Commit = Box<dyn FnOnce() + Send>;

type Decoder = Box<dyn Fn(&[u8]) -> Result<Commit, QueryError> + Send + Sync>;

/// An encoded read request plus the decoder that routes its result.
pub struct CallDescriptor {
    target: Address,
    calldata: Bytes,
    decoder: Decoder,
}

impl CallDescriptor {
    /// Build a descriptor whose decoded result lands in `slot`.
    ///
    /// `decode` must be pure: re-running the same batch calls it again and
    /// overwrites the slot with the same value.
    pub fn new<T, F>(target: Address, calldata: impl Into<Bytes>, slot: &Slot<T>, decode: F) -> Self
    where
        T: Send + 'static,
        F: Fn(&[u8]) -> Result<T, QueryError> + Send + Sync + 'static,
    {
        let slot = slot.clone();
        Self {
            target,
            calldata: calldata.into(),
            decoder: Box::new(move |data| {
                let value = decode(data)?;
                let slot = slot.clone();
                Ok(Box::new(move || slot.set(value)) as Commit)
            }),
        }
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn calldata(&self) -> &Bytes {
        &self.calldata
    }

    pub fn encoded(&self) -> EncodedCall {
        EncodedCall {
            target: self.target,
            calldata: self.calldata.clone(),
        }
    }

    /// Decode successful return data. The slot is untouched until the
    /// returned commit runs.
    pub(crate) fn decode(&self, return_data: &[u8]) -> Result<Commit, QueryError> {
        (self.decoder)(return_data)
    }
}

impl fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("target", &self.target)
            .field("calldata", &self.calldata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl CallDescriptor {
        /// Test helper: decode and immediately commit into the bound slot.
        fn deliver(&self, return_data: &[u8]) -> Result<(), QueryError> {
            self.decode(return_data).map(|commit| commit())
        }
    }

    fn be_u64(data: &[u8]) -> Result<u64, QueryError> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| QueryError::encoding("expected 8 bytes"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    #[test]
    fn slot_clones_share_cell() {
        let a = Slot::new();
        let b = a.clone();
        a.set(5u64);
        assert_eq!(b.get(), Some(5));
        assert_eq!(b.take(), Some(5));
        assert!(!a.is_set());
    }

    #[test]
    fn deliver_writes_slot() {
        let slot = Slot::new();
        let call = CallDescriptor::new(Address::ZERO, vec![0x01], &slot, be_u64);
        call.deliver(&42u64.to_be_bytes()).unwrap();
        assert_eq!(slot.get(), Some(42));
    }

    #[test]
    fn decode_failure_leaves_slot_empty() {
        let slot: Slot<u64> = Slot::new();
        let call = CallDescriptor::new(Address::ZERO, vec![], &slot, be_u64);
        assert!(matches!(
            call.deliver(&[1, 2, 3]),
            Err(QueryError::Encoding { .. })
        ));
        assert!(!slot.is_set());
        assert_eq!(slot.get_or(7), 7);
    }
}
