pub mod ai;
pub mod app;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod locks;
pub mod prompting;
pub mod reservation;
pub mod retriever;
pub mod store;
pub mod types;
