#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pe_forge;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pe_forge::pe::PeFile::Pe32(image)) = pe_forge::pe::parse_pe(data) {
        let _ = image.get_exported_functions();
        let _ = image.get_resources();
    }
});
