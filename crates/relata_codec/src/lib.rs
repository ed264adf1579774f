//! # Relata Codec
//!
//! The dynamic [`Value`] carried by record attributes, and the CBOR
//! encoding used for everything Relata writes to its journal.
//!
//! ## Usage
//!
//! ```
//! use relata_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::from("hello");
//! let bytes = to_cbor(&value).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::Value;
