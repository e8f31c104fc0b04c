// Allow some clippy lints shared with the rest of the workspace
#![allow(clippy::module_inception)]
#![allow(clippy::upper_case_acronyms)]

pub mod amount;
pub mod block;
pub mod config;
pub mod crypto;
pub mod serializer;
pub mod transaction;
