//! End-to-end tests for RingClient over the in-process driver
//!
//! Every test works against a real file in a temporary directory, with
//! rings and segments backed by POSIX shared memory.

use std::sync::Arc;

use proptest::prelude::*;
use usrbio::{ClientConfig, LocalDriver, RingClient, UsrbioError};

/// Small chunk capacity so multi-chunk paths are exercised cheaply
const CHUNK: usize = 4096;

fn open_client(
    dir: &tempfile::TempDir,
    name: &str,
    chunk_capacity: usize,
) -> (RingClient<LocalDriver>, Arc<LocalDriver>) {
    let driver = Arc::new(LocalDriver::new());
    let client = RingClient::open_with_config(
        dir.path().join(name),
        Arc::clone(&driver),
        &ClientConfig::with_chunk_capacity(chunk_capacity),
    )
    .unwrap();
    (client, driver)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_multi_chunk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "data", CHUNK);
    client.set_size(20000).unwrap();

    let data = pattern(10000);
    assert_eq!(client.write(100, &data).unwrap(), 10000);
    assert_eq!(client.read(100, 10000).unwrap(), data);

    // Bytes actually landed in the file
    let on_disk = std::fs::read(dir.path().join("data")).unwrap();
    assert_eq!(&on_disk[100..10100], &data[..]);

    client.close().unwrap();
}

#[test]
fn test_one_mebibyte_in_small_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "mib", CHUNK);
    client.set_size(1 << 20).unwrap();

    let written = client.write(0, &vec![0x61; 1 << 20]).unwrap();
    assert_eq!(written, 1_048_576);

    let back = client.read(0, 1 << 20).unwrap();
    assert_eq!(back.len(), 1 << 20);
    assert!(back.iter().all(|&b| b == 0x61));
}

#[test]
fn test_request_ending_exactly_at_size() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "edge", CHUNK);
    client.set_size(8192).unwrap();

    assert_eq!(client.write(8192 - 10, &[9u8; 10]).unwrap(), 10);
    assert_eq!(client.read(8192 - 10, 10).unwrap(), vec![9u8; 10]);

    assert!(matches!(
        client.read(8192 - 10, 11),
        Err(UsrbioError::OutOfBounds { .. })
    ));
    assert!(matches!(
        client.write(8192, &[1]),
        Err(UsrbioError::OutOfBounds { .. })
    ));
}

#[test]
fn test_zero_length_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "empty", CHUNK);
    client.set_size(4096).unwrap();

    assert!(client.read(4096, 0).unwrap().is_empty());
    assert_eq!(client.write(4096, &[]).unwrap(), 0);
}

#[test]
fn test_io_before_set_size_is_out_of_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "unsized", CHUNK);

    assert_eq!(client.file_size(), 0);
    assert!(matches!(
        client.read(0, 1),
        Err(UsrbioError::OutOfBounds { file_size: 0, .. })
    ));
}

#[test]
fn test_set_size_truncates_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, _driver) = open_client(&dir, "sized", CHUNK);
    let path = dir.path().join("sized");

    client.set_size(1 << 16).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 1 << 16);

    client.set_size(100).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
    assert_eq!(client.file_size(), 100);
    assert!(client.read(50, 51).is_err());
}

#[test]
fn test_existing_contents_are_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing");
    let data = pattern(3 * CHUNK + 17);
    std::fs::write(&path, &data).unwrap();

    let (mut client, _driver) = open_client(&dir, "existing", CHUNK);
    client.set_size(data.len() as u64).unwrap();
    assert_eq!(client.read(0, data.len()).unwrap(), data);
}

#[test]
fn test_flush_then_close_releases_registrations() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, driver) = open_client(&dir, "flush", CHUNK);
    assert_eq!(driver.registered_fd_count(), 1);
    assert_eq!(driver.registered_iovec_count(), 2);

    client.set_size(CHUNK as u64).unwrap();
    client.write(0, &pattern(CHUNK)).unwrap();
    client.flush().unwrap();

    client.close().unwrap();
    assert_eq!(driver.registered_fd_count(), 0);
    assert_eq!(driver.registered_iovec_count(), 0);
    assert!(matches!(client.close(), Err(UsrbioError::Closed)));
}

#[test]
fn test_drop_releases_registrations() {
    let dir = tempfile::tempdir().unwrap();
    let (client, driver) = open_client(&dir, "dropped", CHUNK);
    drop(client);
    assert_eq!(driver.registered_fd_count(), 0);
    assert_eq!(driver.registered_iovec_count(), 0);
}

#[test]
fn test_parallel_clients_on_one_file() {
    const WORKERS: usize = 4;
    const REGION: usize = 3 * CHUNK + 123;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared");
    std::fs::File::create(&path)
        .unwrap()
        .set_len((WORKERS * REGION) as u64)
        .unwrap();
    let driver = Arc::new(LocalDriver::new());

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let path = path.clone();
            let driver = Arc::clone(&driver);
            std::thread::spawn(move || {
                let mut client = RingClient::open_with_config(
                    &path,
                    driver,
                    &ClientConfig::with_chunk_capacity(CHUNK),
                )
                .unwrap();
                client.set_size((WORKERS * REGION) as u64).unwrap();

                let offset = (worker * REGION) as u64;
                let data = vec![worker as u8 + 1; REGION];
                client.write(offset, &data).unwrap();
                assert_eq!(client.read(offset, REGION).unwrap(), data);
                client.close().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    for worker in 0..WORKERS {
        let region = &contents[worker * REGION..(worker + 1) * REGION];
        assert!(region.iter().all(|&b| b == worker as u8 + 1));
    }
    assert_eq!(driver.registered_fd_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Writes with one chunk capacity read back identically with another
    #[test]
    fn prop_chunk_capacity_is_transparent(
        write_chunk in 1usize..=2048,
        read_chunk in 1usize..=2048,
        offset in 0u64..512,
        data in prop::collection::vec(any::<u8>(), 0..6000),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let size = offset + data.len() as u64;

        let (mut writer, _) = open_client(&dir, "prop", write_chunk);
        writer.set_size(size).unwrap();
        prop_assert_eq!(writer.write(offset, &data).unwrap(), data.len() as u64);
        writer.close().unwrap();

        let (mut reader, _) = open_client(&dir, "prop", read_chunk);
        reader.set_size(size).unwrap();
        prop_assert_eq!(reader.read(offset, data.len()).unwrap(), data);
    }
}
