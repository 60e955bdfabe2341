#![allow(unexpected_cfgs)]

use proptest::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use crate::{
    decode_encryption_info, decrypt_streams, encrypt_to_streams, DecryptOptions, EncryptOptions,
    EncryptedStreams, HashAlgorithm, OsRandom,
};

#[cfg(fuzzing)]
const CASES: u32 = 256;
#[cfg(not(fuzzing))]
const CASES: u32 = 32;

#[cfg(fuzzing)]
const MAX_LEN: usize = 256 * 1024;
#[cfg(not(fuzzing))]
const MAX_LEN: usize = 16 * 1024;

fn fast_opts() -> EncryptOptions {
    EncryptOptions {
        hash_algorithm: HashAlgorithm::Sha1,
        key_bits: 128,
        spin_count: 1,
        ..EncryptOptions::default()
    }
}

fn valid_streams() -> &'static EncryptedStreams {
    static CACHE: OnceLock<EncryptedStreams> = OnceLock::new();
    CACHE.get_or_init(|| {
        encrypt_to_streams(b"PK\x03\x04hello", "pw", &fast_opts(), &mut OsRandom)
            .expect("encrypt fixture")
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: CASES,
        max_shrink_iters: 0,
        .. ProptestConfig::default()
    })]

    #[test]
    fn decode_encryption_info_is_panic_free_and_rejects_garbage(tail in prop::collection::vec(any::<u8>(), 0..=MAX_LEN)) {
        // Agile 4.4 prefix followed by invalid UTF-8.
        let mut bytes = Vec::with_capacity(8 + 2 + tail.len());
        bytes.extend_from_slice(&crate::encryption_info::ENCRYPTION_INFO_PREFIX);
        bytes.push(b'<');
        bytes.push(0xFF);
        bytes.extend_from_slice(&tail);

        let outcome = catch_unwind(AssertUnwindSafe(|| decode_encryption_info(&bytes)));
        prop_assert!(outcome.is_ok(), "decode_encryption_info panicked");
        prop_assert!(outcome.unwrap().is_err(), "garbage input should not parse");
    }

    #[test]
    fn decrypt_streams_is_panic_free_on_garbage_package(
        package in prop::collection::vec(any::<u8>(), 0..=MAX_LEN),
    ) {
        let streams = valid_streams();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            decrypt_streams(&streams.encryption_info, &package, "pw", &DecryptOptions::default())
        }));
        prop_assert!(outcome.is_ok(), "decrypt_streams panicked");
    }

    #[test]
    fn round_trip_preserves_document(
        document in prop::collection::vec(any::<u8>(), 0..=MAX_LEN),
        password in "\\PC{0,16}",
    ) {
        let streams = encrypt_to_streams(&document, &password, &fast_opts(), &mut OsRandom)
            .expect("encrypt");
        let out = decrypt_streams(
            &streams.encryption_info,
            &streams.encrypted_package,
            &password,
            &DecryptOptions::default(),
        )
        .expect("decrypt");
        prop_assert_eq!(out, document);
    }
}
