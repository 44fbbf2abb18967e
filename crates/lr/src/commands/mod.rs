//! CLI command implementations.

pub(crate) mod reload;
pub(crate) mod serve;

pub(crate) use reload::ReloadArgs;
pub(crate) use serve::ServeArgs;
