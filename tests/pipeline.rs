//! End to end: returns written into an input buffer, drained by the manager
//! thread into one or more PIMs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use radarpim::{PimManager, Rib, RibError, TestPatternConfig, TestPatternSource, WriteFlags};
use radarpim_core::header::HEADER_SIZE;
use radarpim_core::{
    AzimuthCombine, Notification, Pim, PimArena, PimConfig, PimError, PimHandle, ReturnHeader,
    RunProcess, Runtime,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn header_for_bucket(bucket: u32, dim: u32, samples: u16) -> ReturnHeader {
    ReturnHeader {
        azimuth: ((bucket as u64 * 65536).div_ceil(dim as u64)) as u16,
        nominal_length: samples,
        this_length: samples,
        ..Default::default()
    }
}

fn setup(rib_size: usize, range_dim: u32, azimuth_dim: u32) -> (PimManager, PimHandle, Arc<Pim>) {
    let rib = Arc::new(Rib::new(rib_size).unwrap());
    let manager = PimManager::new(rib, PimArena::new()).unwrap();
    let pim = Pim::new(
        Arc::new(Runtime::new()),
        PimConfig::new(range_dim, azimuth_dim),
    )
    .unwrap();
    let handle = manager.add_new_pim(pim).unwrap();
    let pim = manager.arena().get(handle).unwrap();
    (manager, handle, pim)
}

fn send(manager: &PimManager, header: &ReturnHeader, data: &[u8]) {
    manager.rib().write(header, data, WriteFlags::empty()).unwrap();
    assert!(manager.wait_until_drained(TIMEOUT));
}

#[test]
fn consecutive_returns_fill_their_buckets() {
    let (manager, _, pim) = setup(64 * 1024, 512, 2048);
    for bucket in 0..3 {
        send(&manager, &header_for_bucket(bucket, 2048, 512), &[0xFF; 512]);
    }

    let ret = pim.get_return(1).unwrap();
    assert_eq!(ret.header.this_length, 512);
    assert!(ret.data.iter().all(|&b| b == 0xFF));
    assert!(matches!(pim.get_return(2000), Err(PimError::NoData { azimuth: 2000 })));
    assert_eq!(manager.num_returns_processed(), 3);
}

#[test]
fn small_step_back_does_not_regress() {
    let (manager, _, pim) = setup(64 * 1024, 512, 2048);
    send(&manager, &header_for_bucket(5, 2048, 512), &[0x40; 512]);
    send(&manager, &header_for_bucket(3, 2048, 512), &[0x20; 512]);

    assert_eq!(pim.get_return(3).unwrap().data, vec![0x20; 512]);
    assert_eq!(pim.get_return(5).unwrap().data, vec![0x40; 512]);
    assert!(pim.get_return(4).is_err());
    assert_eq!(pim.last_updated_azimuth(), Some(5));
}

#[test]
fn azimuth_offset_moves_returns() {
    let (manager, _, pim) = setup(64 * 1024, 512, 2048);
    pim.set_azimuth_offset(100).unwrap();
    send(&manager, &header_for_bucket(10, 2048, 512), &[0x11; 512]);

    assert_eq!(pim.get_return(110).unwrap().data[0], 0x11);
    assert!(pim.get_return(10).is_err());
}

#[test]
fn prf_from_time_interval() {
    let (manager, _, pim) = setup(256 * 1024, 16, 64);
    let mut bucket = 0;
    let mut feed = |n: usize| {
        for _ in 0..n {
            let mut header = header_for_bucket(bucket % 64, 64, 16);
            header.time_interval = 1000;
            manager.rib().write(&header, &[1; 16], WriteFlags::empty()).unwrap();
            bucket += 1;
        }
        assert!(manager.wait_until_drained(TIMEOUT));
    };

    feed(150);
    assert!((pim.prf() - 1000.0).abs() < 1e-9);
    assert!((pim.average_prf() - 1000.0).abs() < 1e-9);

    pim.reset_average_prf();
    assert_eq!(pim.average_prf(), 0.0);
    feed(99);
    assert_eq!(pim.average_prf(), 0.0);
    feed(1);
    assert!((pim.average_prf() - 1000.0).abs() < 1e-9);
}

#[test]
fn rotation_period_from_test_pattern() {
    let (manager, _, pim) = setup(256 * 1024, 32, 64);
    let config = TestPatternConfig {
        azimuths_per_scan: 64,
        samples: 32,
        prf: 1000.0,
        ..Default::default()
    };
    let mut source = TestPatternSource::new(config, manager.rib().clone()).unwrap();
    for _ in 0..3 {
        assert_eq!(source.write_scan().unwrap(), 64);
        assert!(manager.wait_until_drained(TIMEOUT));
    }
    assert!((pim.average_period() - 0.064).abs() < 1e-9);
    assert_eq!(pim.num_populated(), 64);
}

#[test]
fn return_larger_than_buffer_is_refused() {
    let rib = Rib::new(HEADER_SIZE + 100).unwrap();
    let before = rib.bytes_waiting_in_buffer();
    let result = rib.write(&header_for_bucket(0, 2048, 512), &[0; 512], WriteFlags::empty());
    assert!(matches!(result, Err(RibError::InsufficientSpace { .. })));
    assert_eq!(rib.bytes_waiting_in_buffer(), before);
    assert_eq!(rib.num_writes(), 0);
}

#[test]
fn repeated_return_follows_combine_mode() {
    let (manager, _, pim) = setup(64 * 1024, 8, 64);
    let first = [10, 50, 10, 50, 10, 50, 10, 50];
    let second = [30, 20, 30, 20, 30, 20, 30, 20];
    let header = header_for_bucket(7, 64, 8);

    let cases = [
        (AzimuthCombine::NoCombine, first),
        (AzimuthCombine::Overwrite, second),
        (AzimuthCombine::Peak, [30, 50, 30, 50, 30, 50, 30, 50]),
    ];
    for (mode, expected) in cases {
        pim.clear(Default::default());
        pim.set_azimuth_combine(mode);
        send(&manager, &header, &first);
        let after_first = pim.get_return(7).unwrap();
        send(&manager, &header, &second);
        let after_second = pim.get_return(7).unwrap();
        assert_eq!(after_second.data, expected.to_vec(), "{}", mode);
        if mode == AzimuthCombine::NoCombine {
            assert_eq!(after_second, after_first);
        }
    }
}

#[test]
fn jumps_are_filled_or_cleared() {
    let (manager, _, pim) = setup(64 * 1024, 16, 2048);
    assert_eq!(pim.azimuth_clear_limit(), 512);
    send(&manager, &header_for_bucket(0, 2048, 16), &[9; 16]);
    send(&manager, &header_for_bucket(100, 2048, 16), &[9; 16]);
    for bucket in 1..100 {
        assert!(pim.get_return(bucket).is_ok(), "bucket {} not filled", bucket);
    }
    assert_eq!(pim.num_populated(), 101);

    send(&manager, &header_for_bucket(700, 2048, 16), &[9; 16]);
    assert_eq!(pim.num_populated(), 1);
    assert!(pim.get_return(700).is_ok());
}

#[test]
fn long_returns_fit_the_store() {
    let (manager, _, pim) = setup(64 * 1024, 256, 64);
    send(&manager, &header_for_bucket(0, 64, 1024), &[3; 1024]);
    let mut short = header_for_bucket(1, 64, 1024);
    short.this_length = 300;
    send(&manager, &short, &[4; 300]);

    for bucket in 0..2 {
        let ret = pim.get_return(bucket).unwrap();
        assert!(ret.header.this_length <= ret.header.nominal_length);
        assert!(ret.header.this_length as usize <= pim.range_dim());
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Notification)>>,
}

impl RunProcess for Recorder {
    fn notify(&self, pim: &Pim, notification: &Notification) {
        self.seen
            .lock()
            .unwrap()
            .push((pim.name().to_string(), *notification));
    }
}

#[test]
fn fan_out_keeps_input_order() {
    let runtime = Arc::new(Runtime::new());
    let arena = PimArena::new();
    let recorder = Arc::new(Recorder::default());
    let mut handles = Vec::new();
    for name in ["first", "second"] {
        let pim = Pim::new(runtime.clone(), PimConfig::new(8, 64).with_name(name)).unwrap();
        pim.add_process(recorder.clone());
        handles.push(arena.insert(pim));
    }

    let rib = Arc::new(Rib::new(64 * 1024).unwrap());
    for bucket in 0..64u32 {
        let mut header = header_for_bucket(bucket, 64, 8);
        header.count = bucket as u16;
        rib.write(&header, &[bucket as u8; 8], WriteFlags::NO_SIGNAL).unwrap();
    }
    let manager = PimManager::with_pims(rib, arena.clone(), &handles).unwrap();
    assert!(manager.wait_until_drained(TIMEOUT));
    assert_eq!(manager.num_returns_processed(), 64);

    for &handle in &handles {
        let pim = arena.get(handle).unwrap();
        for bucket in 0..64u32 {
            assert_eq!(pim.get_return(bucket).unwrap().header.count, bucket as u16);
        }
    }

    let seen = recorder.seen.lock().unwrap();
    for name in ["first", "second"] {
        let firsts: Vec<u64> = seen
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, n)| n.first_new_return)
            .collect();
        assert!(!firsts.is_empty());
        assert!(firsts.windows(2).all(|w| w[0] < w[1]), "{}: {:?}", name, firsts);
    }
}

#[test]
fn saved_store_loads_identically() {
    let (manager, _, pim) = setup(64 * 1024, 32, 128);
    pim.set_azimuth_repeat(4).unwrap();
    for bucket in (0..128).step_by(3) {
        send(&manager, &header_for_bucket(bucket, 128, 32), &[bucket as u8; 32]);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.pim");
    pim.save_to_file(&path).unwrap();

    let copy = Pim::new(Arc::new(Runtime::new()), PimConfig::new(32, 128)).unwrap();
    copy.load_from_file(&path).unwrap();
    copy.compare_with(&pim).unwrap();
    assert_eq!(copy.azimuth_repeat(), 4);
    assert_eq!(copy.get_return(42).unwrap().data, vec![42u8; 32]);
}
