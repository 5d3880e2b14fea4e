#![forbid(unsafe_code)]

pub mod cdxj;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod error;
pub mod http;
pub mod index;
pub mod indexer;
pub mod logging;
pub mod prepare;
pub mod store;
pub mod surt;
pub mod tee;
pub mod title;
pub mod warc;
