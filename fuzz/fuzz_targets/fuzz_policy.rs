//! Feeds each libFuzzer input through one harness iteration.
//!
//! Run with: cargo +nightly fuzz run fuzz_policy
//!
//! Set `POLICY_HARNESS_CONFIG` to a TOML file to change the input backing or
//! driver settings.

#![no_main]

use libfuzzer_sys::fuzz_target;
use policy_harness_core::config::HarnessConfig;
use policy_harness_core::harness::Harness;
use policy_harness_core::logging::init_tracing;
use policy_harness_core::loopback::LoopbackPolicy;
use std::cell::RefCell;
use std::path::Path;

/// A config that fails to load aborts the run rather than fuzzing with defaults.
fn config() -> HarnessConfig {
    let config = match std::env::var_os("POLICY_HARNESS_CONFIG") {
        Some(path) => match HarnessConfig::load_from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => panic!("POLICY_HARNESS_CONFIG: {e:#}"),
        },
        None => HarnessConfig::default(),
    };
    init_tracing(&config.logging.filter);
    config
}

thread_local! {
    static HARNESS: RefCell<Harness<LoopbackPolicy>> =
        RefCell::new(Harness::new(LoopbackPolicy::new(), &config()));
}

fuzz_target!(|data: &[u8]| {
    HARNESS.with(|harness| {
        let report = harness.borrow_mut().run_one(data);
        assert!(harness.borrow().context().is_clean(), "{report:?}");
    });
});
