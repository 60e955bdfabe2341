#![no_main]

use std::sync::OnceLock;

use formula_xlsx_encryptor::{
    decrypt_streams, encrypt_to_streams, DecryptOptions, EncryptOptions, EncryptedStreams,
    HashAlgorithm, OsRandom,
};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 1024 * 1024;

fn fixture() -> &'static EncryptedStreams {
    static CACHE: OnceLock<EncryptedStreams> = OnceLock::new();
    CACHE.get_or_init(|| {
        let opts = EncryptOptions {
            hash_algorithm: HashAlgorithm::Sha1,
            key_bits: 128,
            spin_count: 1,
            ..EncryptOptions::default()
        };
        encrypt_to_streams(b"PK\x03\x04fuzz", "pw", &opts, &mut OsRandom).expect("fixture")
    })
}

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let streams = fixture();
    let opts = DecryptOptions {
        verify_password: true,
        verify_integrity: true,
        ..DecryptOptions::default()
    };
    // Garbage `EncryptedPackage` behind a valid descriptor.
    let _ = decrypt_streams(&streams.encryption_info, data, "pw", &opts);
});
