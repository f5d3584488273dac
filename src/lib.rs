//! Kitledger - Ledger and Accounting API
//!
//! Backend for the Kitledger API. Requests to the versioned API are
//! authenticated with signed session or API tokens.

pub mod core;
