pub mod backoff;
pub mod engine;
pub mod network;
pub mod queue;
pub mod remote;
pub mod status;
pub mod store;
