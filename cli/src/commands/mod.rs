mod dedup;
mod grams;
mod helpers;
mod import;
mod search;

pub(crate) use dedup::cmd_dedup;
pub(crate) use grams::cmd_grams;
pub(crate) use import::{InputFormat, cmd_import};
pub(crate) use search::{cmd_search, cmd_show};
