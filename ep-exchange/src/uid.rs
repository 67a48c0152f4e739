use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bytecheck::CheckBytes;
use rkyv::{Archive, Deserialize, Serialize};

static PROCESS_SEED: OnceLock<u64> = OnceLock::new();
static COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize, Archive, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[archive(compare(PartialEq))]
#[archive_attr(derive(CheckBytes, Debug))]
/// The unique identifier of a single exchange.
///
/// The UID tags every frame an exchange sends so the receiving
/// [crate::Distributer] can route it to the matching exchange, even when many
/// exchanges are running between the same pair of nodes.
///
/// The high half is a random seed picked once per process and the low half a
/// process wide counter, so UIDs never repeat within a process and are
/// vanishingly unlikely to repeat across processes.
pub struct ExchangeUid(u128);

impl ExchangeUid {
    /// Generates a new UID.
    pub fn generate() -> Self {
        let seed = *PROCESS_SEED.get_or_init(rand::random);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(((seed as u128) << 64) | count as u128)
    }

    pub const fn from_u128(uid: u128) -> Self {
        Self(uid)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

impl Display for ExchangeUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Debug for ExchangeUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExchangeUid({})", self)
    }
}
