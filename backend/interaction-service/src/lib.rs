pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod grpc;
pub mod metrics;
pub mod queue;
pub mod repository;
pub mod services;
pub mod workers;
