//! Bundled persistence backends.

pub(crate) mod memory;
pub(crate) mod postgres;
