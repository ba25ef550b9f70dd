//! Stress tests for concurrent chunked transfers
//!
//! Run with: cargo test --test stress_tests -- --nocapture

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use storely_transfer::config::TransferConfig;
use storely_transfer::registry::{SqlitePersistence, TransferRegistry};
use storely_transfer::storage::MemoryStorage;
use storely_transfer::transfer::{
    DownloadCoordinator, UploadCoordinator, UploadSource, UploadStrategy,
};
use tokio::sync::Semaphore;

fn stress_config() -> TransferConfig {
    TransferConfig {
        retry_initial_delay_ms: 1,
        registry_capacity: 10,
        ..Default::default()
    }
}

/// Upload then download one file, injecting fetch failures on every third
/// chunk. Returns whether the bytes came back intact and how long it took.
async fn run_single_transfer(
    storage: MemoryStorage,
    uploads: UploadCoordinator,
    downloads: DownloadCoordinator,
    file_size: usize,
    transfer_id: usize,
) -> (bool, u64, u32) {
    let data: Vec<u8> = (0..file_size)
        .map(|i| ((i + transfer_id * 1000) % 256) as u8)
        .collect();
    let strategy = if transfer_id % 2 == 0 {
        UploadStrategy::Relay
    } else {
        UploadStrategy::Direct
    };

    let start = Instant::now();
    let source = UploadSource::from_bytes(&format!("stress_{transfer_id}.bin"), data.clone())
        .with_chunk_size(16 * 1024);
    let receipt = match uploads.upload(source, strategy, None).await {
        Ok(receipt) => receipt,
        Err(_) => return (false, 0, 0),
    };

    let total_chunks = (file_size as u64).div_ceil(16 * 1024) as u32;
    for index in (0..total_chunks).step_by(3) {
        storage.fail_fetch(&MemoryStorage::chunk_location(&receipt.transfer_id, index), 2);
    }

    let success = match downloads.download(&receipt.transfer_id, None).await {
        Ok(artifact) => artifact.data == Bytes::from(data),
        Err(_) => false,
    };

    (success, start.elapsed().as_millis() as u64, total_chunks)
}

/// Stress test: concurrent transfers scaling
#[tokio::test]
async fn stress_concurrent_transfers() {
    println!("\n==========================================");
    println!("STRESS TEST: Concurrent Transfer Scaling");
    println!("==========================================\n");

    let file_size = 256 * 1024;
    let concurrency_levels = vec![1, 2, 4, 8, 16];
    let config = stress_config();

    println!("File size: 256 KB each, every third chunk fails twice\n");
    println!(
        "{:<15} | {:<10} | {:<15} | {:<12}",
        "Concurrency", "Completed", "Total Time", "Avg/Transfer"
    );
    println!("{}", "-".repeat(58));

    for &concurrency in &concurrency_levels {
        let storage = MemoryStorage::new();
        let shared = Arc::new(storage.clone());
        let uploads = UploadCoordinator::new(&config)
            .unwrap()
            .with_relay(shared.clone())
            .with_direct(shared.clone());
        let downloads = DownloadCoordinator::new(shared, &config);

        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::new();

        for i in 0..concurrency {
            let sem = semaphore.clone();
            let (storage, uploads, downloads) = (storage.clone(), uploads.clone(), downloads.clone());
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.unwrap();
                run_single_transfer(storage, uploads, downloads, file_size, i).await
            }));
        }

        let mut successes = 0;
        let mut total_transfer_time = 0u64;
        for handle in handles {
            let (success, duration, _) = handle.await.unwrap();
            if success {
                successes += 1;
            }
            total_transfer_time += duration;
        }

        println!(
            "{:<15} | {:<10} | {:<15} | {:<12}",
            concurrency,
            format!("{successes}/{concurrency}"),
            format!("{}ms", start.elapsed().as_millis()),
            format!("{}ms", total_transfer_time / concurrency as u64),
        );

        assert_eq!(successes, concurrency, "every transfer should survive transient failures");
        assert!(uploads.active_sessions().is_empty());
        assert!(downloads.active_sessions().is_empty());
    }
}

/// Stress test: many chunks with slow fetches stay within batch limits
#[tokio::test]
async fn stress_large_download_batching() {
    println!("\n==========================================");
    println!("STRESS TEST: Large Download Batching");
    println!("==========================================\n");

    let storage = MemoryStorage::new();
    let chunk_count = 250u32;
    let chunks: Vec<Bytes> = (0..chunk_count)
        .map(|i| Bytes::from(vec![(i % 256) as u8; 1024]))
        .collect();
    storage.insert_file("large", "large.bin", "application/octet-stream", chunks);
    for index in (0..chunk_count).step_by(7) {
        storage.delay_fetch(
            &MemoryStorage::chunk_location("large", index),
            Duration::from_millis(2),
        );
    }

    let downloads = DownloadCoordinator::new(Arc::new(storage.clone()), &stress_config());
    let start = Instant::now();
    let artifact = downloads.download("large", None).await.unwrap();

    println!(
        "{} chunks in {}ms, peak concurrency {}",
        chunk_count,
        start.elapsed().as_millis(),
        storage.max_concurrent_fetches()
    );

    assert_eq!(artifact.size(), chunk_count as u64 * 1024);
    assert!(storage.max_concurrent_fetches() <= 10);
    for (index, chunk) in artifact.data.chunks(1024).enumerate() {
        assert!(chunk.iter().all(|b| *b == (index % 256) as u8));
    }
}

/// Stress test: concurrent uploads recording into one bounded history
#[tokio::test]
async fn stress_concurrent_history_writes() {
    println!("\n==========================================");
    println!("STRESS TEST: Concurrent History Writes");
    println!("==========================================\n");

    let config = stress_config();
    let storage = Arc::new(MemoryStorage::new());
    let registry = TransferRegistry::open(
        Arc::new(SqlitePersistence::new_in_memory().await.unwrap()),
        config.registry_capacity,
    )
    .await
    .unwrap();
    let uploads = UploadCoordinator::new(&config)
        .unwrap()
        .with_relay(storage)
        .with_registry(registry.clone());

    let mut handles = Vec::new();
    for i in 0..32usize {
        let uploads = uploads.clone();
        handles.push(tokio::spawn(async move {
            let source = UploadSource::from_bytes(&format!("note_{i}.txt"), vec![i as u8; 64]);
            uploads.upload(source, UploadStrategy::Relay, None).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            completed += 1;
        }
    }

    println!("{completed} uploads, {} records kept", registry.len());
    assert_eq!(completed, 32);
    assert_eq!(registry.len(), config.registry_capacity);

    let mut ids: Vec<String> = registry.list().into_iter().map(|r| r.transfer_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), config.registry_capacity);
}
