pub mod cli;
pub mod cluster;
pub mod config;
pub mod correlator;
pub mod image_policy;
pub mod image_reference;
pub mod metrics;
pub mod poller;
pub mod reconciler;
pub mod state;
pub mod webserver;
