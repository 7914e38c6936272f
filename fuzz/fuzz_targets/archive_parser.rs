#![no_main]

use libfuzzer_sys::fuzz_target;
use validar::archive::{PerfLog, ResultArchive};

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing untrusted archive JSON must never panic
        let _ = ResultArchive::from_json_str(input);
        let _ = PerfLog::from_json_str(input);
    }
});
