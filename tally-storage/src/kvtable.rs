use rocksdb::{WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::Error;

pub struct DBInt(pub u64);

impl From<DBInt> for Box<[u8]> {
    fn from(value: DBInt) -> Self {
        Box::new(value.0.to_be_bytes())
    }
}

impl From<Box<[u8]>> for DBInt {
    fn from(value: Box<[u8]>) -> Self {
        let inner: [u8; 8] = value[0..8].try_into().unwrap();
        Self(u64::from_be_bytes(inner))
    }
}

pub struct DBBytes(pub Vec<u8>);

impl From<DBBytes> for Box<[u8]> {
    fn from(value: DBBytes) -> Self {
        value.0.into()
    }
}

impl From<Box<[u8]>> for DBBytes {
    fn from(value: Box<[u8]>) -> Self {
        Self(value.into())
    }
}

#[derive(Debug)]
pub struct DBSerde<V>(pub V);

impl<V> std::ops::Deref for DBSerde<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<V> From<DBSerde<V>> for Box<[u8]>
where
    V: Serialize,
{
    fn from(v: DBSerde<V>) -> Self {
        bincode::serialize(&v.0)
            .map(|x| x.into_boxed_slice())
            .unwrap()
    }
}

impl<V> From<Box<[u8]>> for DBSerde<V>
where
    V: DeserializeOwned,
{
    fn from(value: Box<[u8]>) -> Self {
        let inner = bincode::deserialize(&value).unwrap();
        DBSerde(inner)
    }
}

type RocksIterator<'a> = rocksdb::DBIteratorWithThreadMode<'a, rocksdb::DB>;

/// Iterator over the raw entries sharing a key prefix, stopping at the
/// first key outside the prefix.
pub struct PrefixIterator<'a> {
    inner: RocksIterator<'a>,
    prefix: Vec<u8>,
}

impl<'a> PrefixIterator<'a> {
    pub fn new(inner: RocksIterator<'a>, prefix: Vec<u8>) -> Self {
        Self { inner, prefix }
    }
}

impl Iterator for PrefixIterator<'_> {
    type Item = Result<(Box<[u8]>, Box<[u8]>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok((key, value))) => {
                if key.starts_with(&self.prefix) {
                    Some(Ok((key, value)))
                } else {
                    None
                }
            }
            Some(Err(err)) => {
                tracing::error!(?err, "rocksdb iterator failed");
                Some(Err(Error::storage(err)))
            }
            None => None,
        }
    }
}

pub trait KVTable<K, V>
where
    Box<[u8]>: From<K>,
    Box<[u8]>: From<V>,
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    const CF_NAME: &'static str;

    fn cf(db: &DB) -> rocksdb::ColumnFamilyRef {
        db.cf_handle(Self::CF_NAME).unwrap()
    }

    fn get_by_key(db: &DB, k: K) -> Result<Option<V>, Error> {
        let cf = Self::cf(db);
        let raw_key = Box::<[u8]>::from(k);

        let raw_value = db
            .get_cf(&cf, raw_key)
            .map_err(Error::storage)?
            .map(|x| Box::from(x.as_slice()));

        Ok(raw_value.map(V::from))
    }

    fn put_by_key(db: &DB, k: K, v: V) -> Result<(), Error> {
        let cf = Self::cf(db);
        let k_raw = Box::<[u8]>::from(k);
        let v_raw = Box::<[u8]>::from(v);

        db.put_cf(&cf, k_raw, v_raw).map_err(Error::storage)
    }

    fn delete_by_key(db: &DB, k: K) -> Result<(), Error> {
        let cf = Self::cf(db);
        let k_raw = Box::<[u8]>::from(k);

        db.delete_cf(&cf, k_raw).map_err(Error::storage)
    }

    fn stage_upsert(db: &DB, k: K, v: V, batch: &mut WriteBatch) {
        let cf = Self::cf(db);
        let k_raw = Box::<[u8]>::from(k);
        let v_raw = Box::<[u8]>::from(v);

        batch.put_cf(&cf, k_raw, v_raw);
    }

    fn stage_delete(db: &DB, k: K, batch: &mut WriteBatch) {
        let cf = Self::cf(db);
        let k_raw = Box::<[u8]>::from(k);

        batch.delete_cf(&cf, k_raw);
    }

    fn iter_prefix<'a>(db: &'a DB, prefix: &[u8]) -> PrefixIterator<'a> {
        let cf = Self::cf(db);
        let mode = rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward);
        let inner = db.iterator_cf(&cf, mode);

        PrefixIterator::new(inner, prefix.to_vec())
    }

    /// Queue the removal of every key sharing `prefix`. Returns how many
    /// keys were staged.
    fn stage_delete_prefix(db: &DB, prefix: &[u8], batch: &mut WriteBatch) -> Result<u64, Error> {
        let cf = Self::cf(db);
        let mut count = 0;

        for entry in Self::iter_prefix(db, prefix) {
            let (key, _) = entry?;
            batch.delete_cf(&cf, key);
            count += 1;
        }

        Ok(count)
    }

    /// Queue a copy of every key under `from` to the same suffix under
    /// `to`.
    fn stage_copy_prefix(
        db: &DB,
        from: &[u8],
        to: &[u8],
        batch: &mut WriteBatch,
    ) -> Result<u64, Error> {
        let cf = Self::cf(db);
        let mut count = 0;

        for entry in Self::iter_prefix(db, from) {
            let (key, value) = entry?;
            let mut target = to.to_vec();
            target.extend_from_slice(&key[from.len()..]);
            batch.put_cf(&cf, target, value);
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestKV;

    impl KVTable<DBBytes, DBBytes> for TestKV {
        const CF_NAME: &'static str = crate::CF_META;
    }

    #[test]
    fn prefix_scan_stops_at_boundary() {
        let path = tempfile::tempdir().unwrap().into_path();
        let db = crate::open(&path).unwrap();

        TestKV::put_by_key(&db, DBBytes(b"a/1".to_vec()), DBBytes(vec![1])).unwrap();
        TestKV::put_by_key(&db, DBBytes(b"a/2".to_vec()), DBBytes(vec![2])).unwrap();
        TestKV::put_by_key(&db, DBBytes(b"b/1".to_vec()), DBBytes(vec![3])).unwrap();

        let keys: Vec<_> = TestKV::iter_prefix(&db, b"a/")
            .map(|e| e.unwrap().0)
            .collect();
        assert_eq!(keys.len(), 2);

        drop(db);
        crate::destroy(&path).unwrap();
    }

    #[test]
    fn copy_and_delete_prefix() {
        let path = tempfile::tempdir().unwrap().into_path();
        let db = crate::open(&path).unwrap();

        TestKV::put_by_key(&db, DBBytes(b"src/x".to_vec()), DBBytes(vec![1])).unwrap();
        TestKV::put_by_key(&db, DBBytes(b"src/y".to_vec()), DBBytes(vec![2])).unwrap();

        let mut batch = WriteBatch::default();
        let copied = TestKV::stage_copy_prefix(&db, b"src/", b"dst/", &mut batch).unwrap();
        let deleted = TestKV::stage_delete_prefix(&db, b"src/", &mut batch).unwrap();
        db.write(batch).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(deleted, 2);

        let moved = TestKV::get_by_key(&db, DBBytes(b"dst/x".to_vec())).unwrap();
        assert_eq!(moved.unwrap().0, vec![1]);
        assert!(TestKV::get_by_key(&db, DBBytes(b"src/x".to_vec()))
            .unwrap()
            .is_none());

        drop(db);
        crate::destroy(&path).unwrap();
    }
}
