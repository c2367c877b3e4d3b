const fn unwrap_or_cargo_version(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Release version; CI may stamp it through `BRIDGE_VERSION` at build time.
pub const VERSION: &str = unwrap_or_cargo_version(option_env!("BRIDGE_VERSION"));
