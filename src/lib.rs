pub mod alignment;
pub mod fingerprint;
pub mod finish;
pub mod metrics;
pub mod persist;
pub mod pipeline;
pub mod ranking;
pub mod rounds;
pub mod search;
pub mod signal;
pub mod stats;
pub mod template_store;
pub mod validate;
