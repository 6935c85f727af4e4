//! # OPMS Sync Library
//!
//! Core functionality for the OPMS → NetSuite inventory sync service:
//! durable sync jobs, the orchestrator that drives them, the delta
//! scheduler, and the HTTP API surface.

pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mapper;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod remote;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod singleflight;
pub mod telemetry;
pub use migration;
