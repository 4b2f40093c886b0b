//! CLI command modules.

pub mod command;
pub mod http;
pub mod list;
pub mod receive;
pub mod status;

use anyhow::{Context, Result};

/// Value following `flag`, advancing `i` past it.
pub(crate) fn flag_value<'a>(args: &[&'a str], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i).copied().with_context(|| format!("{flag} requires a value"))
}
