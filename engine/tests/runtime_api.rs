//! Blocking primitives and temp-file lifecycle.

use engine::{Config, Mode, Runtime, SchedulerConfig};

fn test_config(dir: &std::path::Path) -> Config {
    Config::default()
        .with_mount_dir(dir)
        .with_memory_budget(8 << 20)
        .with_io_threads(1)
        .with_compute_threads(1)
        .with_scheduler(SchedulerConfig {
            min_sleep_ms: 2,
            max_sleep_ms: 5,
            ..SchedulerConfig::default()
        })
}

#[test]
fn temp_alloc_names_and_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();

    // 100 bytes rounds up to one page; the name encodes tag and size.
    let slice = rt.temp_alloc::<u8>(100, "scratch").unwrap();
    let path = slice.handle().path().unwrap().to_path_buf();
    assert_eq!(path.file_name().unwrap(), "tmp_scratch_4096");
    assert_eq!(slice.handle().len(), 4096);
    assert!(path.exists());

    rt.temp_free(slice).unwrap();
    assert!(!path.exists());
}

#[test]
fn temp_alloc_zero_bytes_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();
    assert!(rt.temp_alloc::<u8>(0, "nope").is_err());
}

#[test]
fn sync_primitives_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();

    let a = rt.temp_alloc::<u32>(64 * 1024, "a").unwrap();
    let b = rt.temp_alloc::<u32>(64 * 1024, "b").unwrap();

    let words: Vec<u32> = (0..1024u32).collect();
    rt.write_sync(&a.add(512), &words).unwrap();

    let mut back = vec![0u32; 1024];
    rt.read_sync(&mut back, &a.add(512)).unwrap();
    assert_eq!(back, words);

    // Device-internal copy, then fill over part of the source.
    rt.copy_sync(&b, &a.add(512), 4096).unwrap();
    let mut copied = vec![0u32; 1024];
    rt.read_sync(&mut copied, &b).unwrap();
    assert_eq!(copied, words);

    rt.fill(&a, 0xFF, 128).unwrap();
    let mut filled = vec![0u8; 128];
    rt.read_sync(&mut filled, &a.cast::<u8>()).unwrap();
    assert!(filled.iter().all(|&x| x == 0xFF));
}

#[test]
fn map_and_truncate_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();

    let path = dir.path().join("mapped.dat");
    std::fs::write(&path, vec![7u8; 8192]).unwrap();

    let slice = rt.map_file::<u8>(&path, Mode::ReadWrite).unwrap();
    assert_eq!(slice.handle().len(), 8192);

    let mut head = vec![0u8; 16];
    rt.read_sync(&mut head, &slice).unwrap();
    assert!(head.iter().all(|&x| x == 7));

    rt.truncate(&slice, 4096).unwrap();
    assert_eq!(slice.handle().len(), 4096);
    rt.unmap_file(slice);
}
