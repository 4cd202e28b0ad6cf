// Not all functions are used by all test binaries.
#![allow(dead_code)]

use std::sync::Once;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
