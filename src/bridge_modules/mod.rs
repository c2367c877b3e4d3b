pub mod bridge;
pub mod communication;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mapping;
pub mod mqtt;
pub mod signals;
pub mod supervisor;
pub mod transform;
