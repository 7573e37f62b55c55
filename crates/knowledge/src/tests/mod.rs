//! Crate-level tests spanning the store, engine and codec.

mod properties;
