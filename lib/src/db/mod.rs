mod sled;

use uuid::Uuid;

use crate::Result;

pub use self::sled::SledDb as Database;

pub trait Identifiable {
    fn get_id(&self) -> Uuid;
}

/// Items stored in a single, statically named collection.
pub trait Collectable {
    fn get_collection_name() -> &'static str;
}

/// Items stored in one collection per owning entity, e.g. contacts of a
/// single list or ledger rows of a single send job.
pub trait CollectableAt {
    fn get_collection_name_at(keyset: Uuid) -> String;
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let t: T = pot::from_slice(bytes)?;
    Ok(t)
}

pub fn encode<T: serde::Serialize>(item: &T) -> Result<Vec<u8>> {
    let bytes = pot::to_vec(item)?;
    Ok(bytes)
}

/// Creates a new time-ordered id. Trees keyed by these ids iterate in
/// creation order.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}
