pub mod config;
pub mod error;
pub mod generative;
pub mod import;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod posting;
pub mod request_client;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod uploader;
