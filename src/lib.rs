// src/lib.rs

//! Harvests OAI-PMH change records into a resource repository and
//! publishes it as a ResourceSync sitemap catalog.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
