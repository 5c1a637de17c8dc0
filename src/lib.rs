pub mod app;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod matrix;
pub mod mirror;
pub mod npy;
pub mod output;
pub mod sanitize;
pub mod store;
pub mod tags;
