//! End-to-end tests through the object-store backend on OpenDAL's in-memory
//! service: upload pipeline → sender → storage → receiver → download pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opendal::Operator;
use secrecy::SecretString;
use tcshare_core::config::{KdfConfig, StorageConfig, TransferConfig};
use tcshare_core::TcshareError;
use tcshare_transfer::backend::{ObjectStoreReceiver, ObjectStoreSender};
use tcshare_transfer::{
    CancellationToken, DownloadPipeline, KeyInput, Sender, UploadOptions, UploadPipeline,
};

const CHUNK: usize = 1024;

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn transfer() -> TransferConfig {
    TransferConfig {
        chunk_size: CHUNK,
        kdf: KdfConfig {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        },
        ..Default::default()
    }
}

fn sender(op: &Operator) -> ObjectStoreSender {
    let storage = StorageConfig {
        append_size: 4096,
        ..Default::default()
    };
    ObjectStoreSender::new(op.clone(), &storage)
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8).collect()
}

async fn upload(op: &Operator, data: &[u8], password: Option<&str>) -> (String, String) {
    let options = UploadOptions {
        transfer: transfer(),
        password: password.map(SecretString::from),
        ..Default::default()
    };
    let pipeline = UploadPipeline::new(
        std::io::Cursor::new(data.to_vec()),
        data.len() as u64,
        "file.bin",
        options,
    )
    .unwrap();
    let result = sender(op)
        .send(pipeline, CancellationToken::new())
        .await
        .expect("upload should succeed");
    assert!(!result.is_canceled());
    (result.id, result.key_fragment)
}

async fn download(
    op: &Operator,
    id: &str,
    fragment: &str,
    password: Option<&str>,
) -> Result<Vec<u8>, TcshareError> {
    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), id), transfer()).unwrap();
    pipeline.fetch_plain_data().await?;
    let password = password.map(SecretString::from);
    if !pipeline
        .validate(KeyInput::Fragment(fragment), password.as_ref())
        .await?
    {
        return Err(TcshareError::Authentication("validate".into()));
    }
    let mut out = Vec::new();
    while let Some(chunk) = pipeline.download_chunk().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[tokio::test]
async fn roundtrip_without_password_at_chunk_boundaries() {
    let op = memory_operator();
    let pcs = CHUNK - 16;
    for size in [0, 1, pcs - 1, pcs, pcs + 1, CHUNK - 1, CHUNK, CHUNK + 1, 5 * CHUNK + 3] {
        let data = make_data(size);
        let (id, fragment) = upload(&op, &data, None).await;
        let out = download(&op, &id, &fragment, None).await.unwrap();
        assert_eq!(out, data, "roundtrip failed for {size} bytes");
    }
}

#[tokio::test]
async fn roundtrip_with_password_at_chunk_boundaries() {
    let op = memory_operator();
    let pcs = CHUNK - 16;
    for size in [0, 1, pcs - 1, pcs, pcs + 1, CHUNK + 1] {
        let data = make_data(size);
        let (id, fragment) = upload(&op, &data, Some("secret")).await;
        let out = download(&op, &id, &fragment, Some("secret")).await.unwrap();
        assert_eq!(out, data, "password roundtrip failed for {size} bytes");
    }
}

#[tokio::test]
async fn wrong_password_is_recoverable() {
    let op = memory_operator();
    let data = make_data(3000);
    let (id, fragment) = upload(&op, &data, Some("correct horse")).await;

    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), &id), transfer()).unwrap();
    pipeline.fetch_plain_data().await.unwrap();
    assert!(pipeline.password_required().unwrap());

    // No password at all is an argument error, not a tag mismatch
    assert!(matches!(
        pipeline.validate(KeyInput::Fragment(&fragment), None).await,
        Err(TcshareError::InvalidArgument(_))
    ));

    let wrong = SecretString::from("battery staple");
    assert!(!pipeline
        .validate(KeyInput::Fragment(&fragment), Some(&wrong))
        .await
        .unwrap());
    assert!(pipeline.metadata().is_none());

    let right = SecretString::from("correct horse");
    assert!(pipeline
        .validate(KeyInput::Fragment(&fragment), Some(&right))
        .await
        .unwrap());
    assert_eq!(pipeline.metadata().unwrap().name, "file.bin");
    assert_eq!(pipeline.metadata().unwrap().size, 3000);

    let mut out = Vec::new();
    while let Some(chunk) = pipeline.download_chunk().await.unwrap() {
        out.extend_from_slice(&chunk);
    }
    assert_eq!(out, data);
}

#[tokio::test]
async fn wrong_key_is_recoverable() {
    let op = memory_operator();
    let (id, _) = upload(&op, b"payload", None).await;

    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), &id), transfer()).unwrap();
    pipeline.fetch_plain_data().await.unwrap();
    assert!(!pipeline.password_required().unwrap());
    assert!(!pipeline
        .validate(KeyInput::Raw(&[9u8; 32]), None)
        .await
        .unwrap());
}

#[tokio::test]
async fn tampering_fails_authentication() {
    let op = memory_operator();
    let data = make_data(2500);
    let (id, fragment) = upload(&op, &data, None).await;
    let original = op.read(&id).await.unwrap().to_vec();
    let layout = transfer().layout();
    let meta_len = u16::from_be_bytes([
        original[layout.length_range().start],
        original[layout.length_range().start + 1],
    ]) as usize;
    let body_start = layout.body_start(meta_len);

    // IV, metadata block, body start, body middle, tag
    let positions = [
        0,
        layout.metadata_start() + 1,
        body_start - 1,
        body_start,
        body_start + 1500,
        original.len() - 1,
    ];
    for pos in positions {
        let mut tampered = original.clone();
        tampered[pos] ^= 0x01;
        op.write(&id, tampered).await.unwrap();
        let err = download(&op, &id, &fragment, None)
            .await
            .expect_err("tampered object must not decrypt");
        assert!(err.is_authentication(), "byte {pos}: expected auth error, got {err}");
    }
}

#[tokio::test]
async fn download_to_path_is_fail_closed() {
    let op = memory_operator();
    let data = make_data(4000);
    let (id, fragment) = upload(&op, &data, None).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), &id), transfer()).unwrap();
    pipeline.fetch_plain_data().await.unwrap();
    assert!(pipeline.validate(fragment.as_str().into(), None).await.unwrap());
    assert_eq!(pipeline.download_to_path(&dest).await.unwrap(), 4000);
    assert_eq!(std::fs::read(&dest).unwrap(), data);

    // Corrupt the tag: nothing may appear at the destination
    let mut stored = op.read(&id).await.unwrap().to_vec();
    let last = stored.len() - 1;
    stored[last] ^= 0xFF;
    op.write(&id, stored).await.unwrap();

    let bad_dest = dir.path().join("bad.bin");
    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), &id), transfer()).unwrap();
    pipeline.fetch_plain_data().await.unwrap();
    assert!(pipeline.validate(fragment.as_str().into(), None).await.unwrap());
    let err = pipeline.download_to_path(&bad_dest).await.unwrap_err();
    assert!(err.is_authentication());
    assert!(!bad_dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn download_progress_counts_plaintext() {
    let op = memory_operator();
    let data = make_data(3333);
    let (id, fragment) = upload(&op, &data, None).await;

    let seen = Arc::new(AtomicU64::new(0));
    let counter = seen.clone();
    let mut pipeline =
        DownloadPipeline::new(ObjectStoreReceiver::new(op.clone(), &id), transfer())
            .unwrap()
            .with_progress(Box::new(move |n| {
                counter.fetch_add(n, Ordering::SeqCst);
            }));
    pipeline.fetch_plain_data().await.unwrap();
    assert!(pipeline.validate(fragment.as_str().into(), None).await.unwrap());
    while pipeline.download_chunk().await.unwrap().is_some() {}
    assert_eq!(seen.load(Ordering::SeqCst), 3333);
}

#[tokio::test]
async fn cancel_mid_upload_leaves_nothing_behind() {
    let op = memory_operator();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let options = UploadOptions {
        transfer: transfer(),
        // Cancel once the first body chunk has been produced
        progress: Some(Box::new(move |_| trigger.cancel())),
        ..Default::default()
    };
    let data = make_data(10 * CHUNK);
    let pipeline =
        UploadPipeline::new(std::io::Cursor::new(data), (10 * CHUNK) as u64, "big", options)
            .unwrap();

    let result = sender(&op).send(pipeline, cancel).await.unwrap();
    assert!(result.is_canceled());
    assert_eq!(result.id, "");
    assert_eq!(result.key_fragment, "");

    let remaining = op.list("/").await.unwrap();
    assert!(
        remaining.iter().all(|e| e.path() == "/" || e.path().is_empty()),
        "partial object must be removed: {:?}",
        remaining.iter().map(|e| e.path().to_string()).collect::<Vec<_>>()
    );
}
