//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()`; parsing and validation
//! must reject bad input with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = brainstem_config::AppConfig::parse(s) {
            // Anything accepted must survive a round trip through TOML.
            let text = toml::to_string(&config).expect("accepted config must serialize");
            brainstem_config::AppConfig::parse(&text).expect("serialized config must reparse");
        }
    }
});
