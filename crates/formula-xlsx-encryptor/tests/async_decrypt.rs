use formula_xlsx_encryptor::{
    decrypt_async, decrypt_async_with_options, encrypt_with, DecryptOptions, EncryptOptions,
    EncryptionError, OsRandom,
};

fn encrypted(doc: &[u8], password: &str) -> Vec<u8> {
    let opts = EncryptOptions {
        spin_count: 1_000,
        ..EncryptOptions::default()
    };
    encrypt_with(doc, password, &opts, &mut OsRandom).expect("encrypt")
}

#[tokio::test]
async fn decrypt_async_round_trips() {
    let doc = b"PK\x03\x04async".to_vec();
    let bytes = encrypted(&doc, "pw");
    assert_eq!(decrypt_async(&bytes, "pw").await.expect("decrypt"), doc);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decryptions_are_independent() {
    let mut handles = Vec::new();
    for i in 0..8u8 {
        handles.push(tokio::spawn(async move {
            let doc: Vec<u8> = std::iter::repeat(i).take(4096 + i as usize).collect();
            let password = format!("password-{i}");
            let bytes = encrypted(&doc, &password);
            let out = decrypt_async(&bytes, &password).await.expect("decrypt");
            assert_eq!(out, doc);
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }
}

#[tokio::test]
async fn decrypt_async_surfaces_errors() {
    let err = decrypt_async(b"not a container", "pw")
        .await
        .expect_err("garbage");
    assert!(matches!(err, EncryptionError::Container { .. }), "{err:?}");

    let bytes = encrypted(b"doc", "right");
    let opts = DecryptOptions {
        verify_password: true,
        ..DecryptOptions::default()
    };
    assert!(matches!(
        decrypt_async_with_options(&bytes, "wrong", opts).await,
        Err(EncryptionError::WrongPassword)
    ));
}
