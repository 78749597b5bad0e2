//! Utility functions and helpers.

pub mod datetime;
pub mod http;
pub mod mapper;
pub mod url;
pub mod xml;
