//! String and object sugar over the byte-level API.
//!
//! Objects are encoded with bincode. Codec failures surface as
//! [`Error::Serialization`] or [`Error::Deserialization`], never as
//! storage errors.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::{Error, Result};

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

impl Database {
    pub fn set_str<K: AsRef<[u8]>>(&self, key: K, value: &str) -> Result<()> {
        self.set(key, value.as_bytes())
    }

    /// Get a value stored as UTF-8 text.
    pub fn get_str<K: AsRef<[u8]>>(&self, key: K) -> Result<String> {
        utf8(self.get(key)?)
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_object<K, T>(&self, key: K, value: &T) -> Result<()>
    where
        K: AsRef<[u8]>,
        T: Serialize + ?Sized,
    {
        let bytes = encode(value)?;
        self.set(key, bytes)
    }

    /// Fetch and deserialize the object stored under `key`.
    pub fn get_object<K, T>(&self, key: K) -> Result<T>
    where
        K: AsRef<[u8]>,
        T: DeserializeOwned,
    {
        decode(&self.get(key)?)
    }

    // Panicking variants. Prefer the fallible forms; these exist for
    // callers that treat any storage error as fatal.

    /// Like [`Database::get`], panicking on error.
    pub fn must_get<K: AsRef<[u8]>>(&self, key: K) -> Vec<u8> {
        match self.get(key) {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// Like [`Database::has`], panicking on error.
    pub fn must_has<K: AsRef<[u8]>>(&self, key: K) -> bool {
        match self.has(key) {
            Ok(has) => has,
            Err(e) => panic!("{}", e),
        }
    }

    /// Like [`Database::get_str`], panicking on error.
    pub fn must_get_str<K: AsRef<[u8]>>(&self, key: K) -> String {
        match self.get_str(key) {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }
}

impl Cursor<'_> {
    pub fn key_str(&self) -> Result<String> {
        utf8(self.key()?)
    }

    pub fn value_str(&self) -> Result<String> {
        utf8(self.value()?)
    }

    /// Deserialize the current value.
    pub fn value_object<T: DeserializeOwned>(&self) -> Result<T> {
        decode(&self.value()?)
    }
}
