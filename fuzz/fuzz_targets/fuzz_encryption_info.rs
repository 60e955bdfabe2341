#![no_main]

use libfuzzer_sys::fuzz_target;

/// Real descriptors are a few KB; keep the harness bounded.
const MAX_INPUT_BYTES: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }

    // Raw input, plus the same bytes behind a valid Agile prefix so the XML parser is reached.
    let _ = formula_xlsx_encryptor::decode_encryption_info(data);

    let mut prefixed = formula_xlsx_encryptor::encryption_info::ENCRYPTION_INFO_PREFIX.to_vec();
    prefixed.extend_from_slice(data);
    if let Ok(params) = formula_xlsx_encryptor::decode_encryption_info(&prefixed) {
        // Anything that decodes must re-encode.
        let _ = formula_xlsx_encryptor::encode_encryption_info(&params)
            .expect("re-encode decoded parameters");
    }
});
