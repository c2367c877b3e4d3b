pub mod bridge_modules;
pub mod logging;
pub mod version;
