//! Abstract value domain and per-instruction transfer function shared by the speculators.

pub(crate) mod configuration;
pub(crate) mod transfer;
pub(crate) mod value;
