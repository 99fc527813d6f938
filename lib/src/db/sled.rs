use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

use super::{decode, encode, Collectable, Identifiable};

/// Embedded storage backed by `sled`. Each collection lives in its own tree.
///
/// Single-key reads and writes rely on sled's own atomicity. Nothing here
/// spans more than one key.
#[derive(Clone, Debug)]
pub struct SledDb {
    inner: sled::Db,
}

impl SledDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let inner = sled::Config::default().path(path).open()?;
        Ok(Self { inner })
    }

    /// Opens a database that is removed from disk once dropped.
    pub fn temporary() -> Result<Self> {
        let inner = sled::Config::default().temporary(true).open()?;
        Ok(Self { inner })
    }

    pub fn get_collection<T: DeserializeOwned + Collectable>(&self) -> Result<Vec<T>> {
        self.get_collection_at(T::get_collection_name())
    }

    /// Gets all entries of the collection specified by name, in key order.
    pub fn get_collection_at<T: DeserializeOwned>(&self, name: impl AsRef<[u8]>) -> Result<Vec<T>> {
        let tree = self.inner.open_tree(name)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, value_bytes) = entry?;
            out.push(decode(&value_bytes)?);
        }
        Ok(out)
    }

    /// Returns the number of entries in the collection specified by name.
    pub fn len_at(&self, name: impl AsRef<[u8]>) -> Result<usize> {
        Ok(self.inner.open_tree(name)?.len())
    }

    /// Gets an item from the collection defined for the item type. Missing
    /// items are `None`, not an error.
    pub fn get<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<Option<T>> {
        self.get_at(T::get_collection_name(), id)
    }

    pub fn get_at<T: DeserializeOwned>(
        &self,
        collection: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>> {
        let tree = self.inner.open_tree(collection)?;
        match tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + Identifiable + Collectable>(&self, value: &T) -> Result<()> {
        self.set_at(T::get_collection_name(), value)
    }

    pub fn set_at<T: Serialize + Identifiable>(
        &self,
        collection: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        self.set_raw_at(collection, value.get_id(), value)
    }

    pub fn set_raw_at<T: Serialize>(
        &self,
        collection: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        tree.insert(key.as_ref(), encode(value)?)?;
        Ok(())
    }

    /// Inserts the value only if nothing is stored under `key` yet.
    ///
    /// Returns `false` without writing when the key is already taken. The
    /// check and the write are a single atomic compare-and-swap.
    pub fn insert_new_at<T: Serialize>(
        &self,
        collection: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<bool> {
        let tree = self.inner.open_tree(collection)?;
        let swapped = tree.compare_and_swap(key, None::<&[u8]>, Some(encode(value)?))?;
        Ok(swapped.is_ok())
    }

    pub fn clear_at(&self, collection: impl AsRef<[u8]>) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        tree.clear()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Row {
        id: Uuid,
        name: String,
    }

    impl Identifiable for Row {
        fn get_id(&self) -> Uuid {
            self.id
        }
    }

    impl Collectable for Row {
        fn get_collection_name() -> &'static str {
            "row"
        }
    }

    #[test]
    fn missing_item_is_none() {
        let db = SledDb::temporary().unwrap();
        assert!(db.get::<Row>(Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn collection_iterates_in_creation_order() {
        let db = SledDb::temporary().unwrap();
        let names = ["c", "a", "b"];
        for name in names {
            db.set(&Row {
                id: crate::db::new_id(),
                name: name.to_string(),
            })
            .unwrap();
        }
        let rows = db.get_collection::<Row>().unwrap();
        let stored: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(stored, names);
    }

    #[test]
    fn insert_new_refuses_taken_key() {
        let db = SledDb::temporary().unwrap();
        assert!(db.insert_new_at("log", "a@b.c", &1u32).unwrap());
        assert!(!db.insert_new_at("log", "a@b.c", &2u32).unwrap());
        assert_eq!(db.get_at::<u32>("log", "a@b.c").unwrap(), Some(1));
    }
}
