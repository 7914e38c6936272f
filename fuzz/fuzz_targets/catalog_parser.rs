#![no_main]

use libfuzzer_sys::fuzz_target;
use validar::config::JobCatalog;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Catalog parsing and validation must never panic
        if let Ok(catalog) = toml::from_str::<JobCatalog>(input) {
            let _ = catalog.validate();
            let _ = catalog.jobs();
        }
    }
});
