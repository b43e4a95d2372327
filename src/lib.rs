pub mod allocation;
pub mod config;
pub mod data;
pub mod features;
pub mod fill;
pub mod gbdt;
pub mod model;
pub mod models;
pub mod performance;
pub mod pipeline;
pub mod rolling;
