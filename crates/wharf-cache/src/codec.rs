//! Value codecs and the process-wide codec registry.
//!
//! Codecs work on [`serde_json::Value`] so that a cache can hold any codec
//! behind a trait object; typed access goes through
//! [`CacheExt`](crate::CacheExt).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// Name of the default codec.
pub const MSGPACK: &str = "msgpack";

/// Name of the JSON codec.
pub const JSON: &str = "json";

/// Name of the session codec.
pub const SESSION: &str = "session";

/// Encodes values to bytes and back.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Registry name of the codec.
    fn name(&self) -> &str;

    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::BadValue`] when the value has an unsupported shape.
    fn encode(&self, value: &Value) -> CacheResult<Vec<u8>>;

    /// Decodes bytes produced by [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] when the bytes are not a valid encoding.
    fn decode(&self, data: &[u8]) -> CacheResult<Value>;
}

/// Compact binary encoding; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn name(&self) -> &str {
        MSGPACK
    }

    fn encode(&self, value: &Value) -> CacheResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| CacheError::bad_value(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> CacheResult<Value> {
        rmp_serde::from_slice(data).map_err(|e| CacheError::decode(e.to_string()))
    }
}

/// Plain JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        JSON
    }

    fn encode(&self, value: &Value) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::bad_value(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> CacheResult<Value> {
        serde_json::from_slice(data).map_err(|e| CacheError::decode(e.to_string()))
    }
}

/// Encoding for browser-session bags. Only objects are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCodec;

impl Codec for SessionCodec {
    fn name(&self) -> &str {
        SESSION
    }

    fn encode(&self, value: &Value) -> CacheResult<Vec<u8>> {
        if !value.is_object() {
            return Err(CacheError::bad_value(
                "session codec only accepts key-value objects",
            ));
        }
        serde_json::to_vec(value).map_err(|e| CacheError::bad_value(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> CacheResult<Value> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| CacheError::decode(e.to_string()))?;
        if !value.is_object() {
            return Err(CacheError::decode("session data is not an object"));
        }
        Ok(value)
    }
}

static CODECS: Lazy<RwLock<HashMap<String, Arc<dyn Codec>>>> = Lazy::new(|| {
    let builtins: [Arc<dyn Codec>; 3] = [
        Arc::new(MsgpackCodec),
        Arc::new(JsonCodec),
        Arc::new(SessionCodec),
    ];
    RwLock::new(
        builtins
            .into_iter()
            .map(|codec| (codec.name().to_string(), codec))
            .collect(),
    )
});

/// Registers `codec` under its name, replacing any codec of the same name.
pub fn register_codec(codec: Arc<dyn Codec>) {
    let name = codec.name().to_string();
    tracing::debug!(codec = %name, "registered cache codec");
    CODECS.write().insert(name, codec);
}

/// Looks up a codec by name.
///
/// # Errors
///
/// Returns [`CacheError::UnknownCodec`] when nothing is registered under `name`.
pub fn codec(name: &str) -> CacheResult<Arc<dyn Codec>> {
    CODECS
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| CacheError::UnknownCodec {
            name: name.to_string(),
        })
}

/// Returns the default codec.
#[must_use]
pub fn default_codec() -> Arc<dyn Codec> {
    Arc::new(MsgpackCodec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        for name in [MSGPACK, JSON, SESSION] {
            assert_eq!(codec(name).unwrap().name(), name);
        }
        assert!(matches!(
            codec("gob"),
            Err(CacheError::UnknownCodec { .. })
        ));
    }

    #[test]
    fn test_session_rejects_non_objects() {
        let err = SessionCodec.encode(&json!(["a", "b"])).unwrap_err();
        assert!(matches!(err, CacheError::BadValue { .. }));
        assert!(SessionCodec.decode(b"42").is_err());
    }

    #[test]
    fn test_session_accepts_bag() {
        let bag = json!({"user_id": 3, "csrf": "token"});
        let bytes = SessionCodec.encode(&bag).unwrap();
        assert_eq!(SessionCodec.decode(&bytes).unwrap(), bag);
    }

    #[test]
    fn test_msgpack_nested_document() {
        let doc = json!({
            "id": 1000,
            "digest": "sha256:abcd",
            "extra_attrs": {"os": "linux", "layers": [1, 2, 3]},
            "pull_time": null,
            "ratio": 0.5,
        });
        let bytes = MsgpackCodec.encode(&doc).unwrap();
        assert_eq!(MsgpackCodec.decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9:/._-]{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::hash_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_msgpack_decodes_what_it_encodes(value in value_strategy()) {
            let bytes = MsgpackCodec.encode(&value).unwrap();
            prop_assert_eq!(MsgpackCodec.decode(&bytes).unwrap(), value);
        }

        #[test]
        fn prop_json_decodes_what_it_encodes(value in value_strategy()) {
            let bytes = JsonCodec.encode(&value).unwrap();
            prop_assert_eq!(JsonCodec.decode(&bytes).unwrap(), value);
        }
    }
}
