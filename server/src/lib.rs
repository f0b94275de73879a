//! Insights Server
//!
//! Data governance services for the Insights platform: GDPR data export
//! requests, their generation and the maintenance jobs that expire them.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod governance;
