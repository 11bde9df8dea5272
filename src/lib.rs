pub mod aggregate;
pub mod config;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod policy;
pub mod report;
pub mod resolver;
