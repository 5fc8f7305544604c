pub mod agent;
pub mod blob;
pub mod config;
pub mod document;
pub mod editor;
pub mod errors;
pub mod events;
pub mod kyc;
pub mod orders;
pub mod query;
pub mod research;
pub mod server;
pub mod session;
pub mod sourcing;
pub mod store;
pub mod upload;
pub mod validation;
pub mod visualization;
