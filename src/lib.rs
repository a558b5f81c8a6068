//! Hospital administration back-end: organization and staff, asset
//! register, repair orders, procurement projects with milestone flows, and
//! the REST surface over them.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod milestone;
pub mod models;
pub mod permissions;
pub mod server;
pub mod telemetry;
pub mod validation;
