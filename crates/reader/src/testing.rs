//! Shared fixtures for loader tests.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tankobon_cache::{Database, DiskCache};
use tankobon_config::SettingsHandle;
use tankobon_storage::backend::MockBackend;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// An in-memory chapter cache large enough to never evict on its own.
pub async fn memory_cache() -> Arc<DiskCache> {
    let db = Database::connect_in_memory().await.unwrap();
    Arc::new(DiskCache::new(&db, Arc::new(MockBackend::default()), 64 * 1024 * 1024))
}

pub fn settings(preload: usize) -> SettingsHandle {
    let settings = SettingsHandle::default();
    settings.set_preload_page_amount(preload).unwrap();
    settings
}

/// Zip bytes with every entry stored uncompressed, so payloads can be found
/// and damaged in place.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Flip a byte inside `payload` wherever it is stored in `bytes`.
pub fn corrupt(bytes: &mut [u8], payload: &[u8]) {
    let offset = bytes.windows(payload.len()).position(|window| window == payload).unwrap();
    bytes[offset + payload.len() / 2] ^= 0xFF;
}

/// Break the local header signature of the `n`th entry, leaving the central
/// directory intact.
pub fn damage_local_header(bytes: &mut [u8], n: usize) {
    let offset = bytes
        .windows(4)
        .enumerate()
        .filter(|(_, window)| *window == b"PK\x03\x04")
        .nth(n)
        .map(|(offset, _)| offset)
        .unwrap();
    bytes[offset + 2] ^= 0xFF;
}

/// Yield to other tasks until `condition` holds, failing after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
