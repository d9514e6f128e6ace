#![forbid(unsafe_code)]
//! Job argument codec.
//!
//! Arguments travel as an opaque blob; producers encode once at insert and
//! workers decode once at materialization. The wire form is canonical JSON
//! bytes: self-describing, stable across producer and consumer versions, and
//! round-trips any nested combination of maps, arrays, strings, numbers,
//! booleans and null.

use serde_json::Value;

#[derive(Debug)]
pub enum ArgError {
    Encode(serde_json::Error),
    Decode(serde_json::Error),
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(err) => write!(f, "arg encode: {err}"),
            Self::Decode(err) => write!(f, "arg decode: {err}"),
        }
    }
}

impl std::error::Error for ArgError {}

pub fn encode(value: &Value) -> Result<Vec<u8>, ArgError> {
    serde_json::to_vec(value).map_err(ArgError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<Value, ArgError> {
    serde_json::from_slice(bytes).map_err(ArgError::Decode)
}
