pub mod api;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod mapper;
pub mod metrics;
pub mod model;
pub mod recorder;
pub mod signer;
