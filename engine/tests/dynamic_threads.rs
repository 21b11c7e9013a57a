//! Retuning the compute pool while tasks are queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine::{Config, Runtime, SchedulerConfig, Task};

fn test_config(dir: &std::path::Path) -> Config {
    Config::default()
        .with_mount_dir(dir)
        .with_memory_budget(16 << 20)
        .with_io_threads(2)
        .with_compute_threads(1)
        .with_scheduler(SchedulerConfig {
            min_sleep_ms: 2,
            max_sleep_ms: 5,
            ..SchedulerConfig::default()
        })
}

#[test]
fn growing_the_pool_adds_parallelism() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();
    assert_eq!(rt.num_compute_threads(), 1);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
        let task = Task::builder()
            .kernel(move |_| {
                let now = running.fetch_add(1, Ordering::AcqRel) + 1;
                peak.fetch_max(now, Ordering::AcqRel);
                std::thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::AcqRel);
            })
            .build();
        rt.add_task(Arc::clone(&task));
        tasks.push(task);
    }

    rt.set_num_compute_threads(4);
    assert_eq!(rt.num_compute_threads(), 4);

    rt.wait_for(&tasks);
    assert!(tasks.iter().all(|t| t.is_complete()));
    assert!(
        peak.load(Ordering::Acquire) >= 2,
        "compute-heavy batch never ran in parallel after growing the pool"
    );
}

#[test]
fn shrinking_the_pool_keeps_making_progress() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(test_config(dir.path())).unwrap();
    rt.set_num_compute_threads(4);
    rt.set_num_compute_threads(1);
    assert_eq!(rt.num_compute_threads(), 1);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let task = Task::builder()
            .kernel(|_| std::thread::sleep(Duration::from_millis(10)))
            .build();
        rt.add_task(Arc::clone(&task));
        tasks.push(task);
    }
    rt.wait_for(&tasks);
    assert!(tasks.iter().all(|t| t.is_complete()));
}
