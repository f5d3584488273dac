//! Core services of the Kitledger backend

pub mod api;
pub mod auth;
pub mod config;
