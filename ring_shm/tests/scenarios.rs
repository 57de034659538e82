//! End-to-end ring scenarios across the record, stream and multiframe layers

use rand::Rng;
use ring_common::config::RegistryConfig;
use ring_common::ring::RingMode;
use ring_shm::{
    MultiframeRing, Owner, RecordRing, RingError, RingRegistry, RingResult, RingSpec, Role,
    StreamRing,
};
use std::num::NonZeroU32;
use tempfile::TempDir;

fn registry() -> (TempDir, RingRegistry) {
    ring_shm::init_tracing();
    let dir = TempDir::new().expect("temp dir");
    let registry = RingRegistry::new(RegistryConfig::in_dir(dir.path()));
    (dir, registry)
}

#[test]
fn test_record_messages_in_order() -> RingResult<()> {
    let (_dir, registry) = registry();
    let mut writer = RecordRing::new(registry.create("scenario_a", &RingSpec::new(4096, RingMode::Record))?)?;
    let mut reader = RecordRing::new(registry.attach("scenario_a")?)?;

    for i in 0..10 {
        writer.write_record(format!("message {i}").as_bytes())?;
    }

    for i in 0..10 {
        let expected = format!("message {i}");
        assert_eq!(reader.read_record(), Some(expected.as_bytes()));
        assert!(reader.shift_record());
    }
    assert_eq!(reader.read_record(), None);
    Ok(())
}

#[test]
fn test_stream_fills_to_capacity_minus_one() -> RingResult<()> {
    let (_dir, registry) = registry();
    let mut writer = StreamRing::new(registry.create("scenario_b", &RingSpec::new(4096, RingMode::Stream))?)?;
    let mut reader = StreamRing::new(registry.attach("scenario_b")?)?;

    for _ in 0..4095 {
        assert_eq!(writer.write(b"X"), 1);
    }
    assert_eq!(writer.write(b"X"), 0);

    let mut out = vec![0u8; 8192];
    assert_eq!(reader.read(&mut out), 4095);
    assert!(out[..4095].iter().all(|&b| b == b'X'));
    assert_eq!(reader.read(&mut out), 0);
    Ok(())
}

#[test]
fn test_multiframe_group_visibility() -> RingResult<()> {
    let (_dir, registry) = registry();
    let mut writer =
        MultiframeRing::new(registry.create("scenario_c", &RingSpec::new(4096, RingMode::Multiframe))?)?;
    let mut reader = MultiframeRing::new(registry.attach("scenario_c")?)?;

    writer.begin_group();
    for i in 0..3 {
        writer.write_frame(format!("frame{i}").as_bytes(), i > 0)?;
    }
    assert!(!reader.ready());
    writer.flush()?;
    assert!(reader.ready());

    let frames: Vec<(Vec<u8>, bool)> = reader
        .read()
        .expect("group ready")
        .map(|f| (f.data.to_vec(), f.continuation))
        .collect();
    assert_eq!(
        frames,
        vec![
            (b"frame0".to_vec(), false),
            (b"frame1".to_vec(), true),
            (b"frame2".to_vec(), true),
        ]
    );

    assert!(reader.shift_group());
    assert!(!reader.ready());

    writer.write_frame(b"frame3", false)?;
    writer.flush()?;
    assert!(reader.ready());
    Ok(())
}

#[test]
fn test_second_writer_claim_is_rejected() -> RingResult<()> {
    let (_dir, registry) = registry();
    let mut first = registry.create("scenario_d", &RingSpec::new(1024, RingMode::Record))?;
    let mut second = registry.attach("scenario_d")?;

    let a = NonZeroU32::new(1001).expect("non-zero");
    let b = NonZeroU32::new(1002).expect("non-zero");

    first.claim(Role::Writer, a)?;
    match second.claim(Role::Writer, b) {
        Err(RingError::RoleClaimed { role, owner }) => {
            assert_eq!(role, Role::Writer);
            assert_eq!(owner, 1001);
        }
        other => panic!("expected RoleClaimed, got {other:?}"),
    }
    assert_eq!(second.owner(Role::Writer), Owner::ClaimedBy(a));

    // Roles are independent.
    second.claim(Role::Reader, b)?;
    assert!(matches!(
        second.release(Role::Writer, b),
        Err(RingError::NotOwner { .. })
    ));

    first.release(Role::Writer, a)?;
    second.claim(Role::Writer, b)?;
    Ok(())
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
}

#[test]
fn test_no_torn_records_under_concurrency() -> RingResult<()> {
    const CYCLES: u32 = 100;
    let (_dir, registry) = registry();
    let mut writer = RecordRing::new(registry.create("scenario_e", &RingSpec::new(1024, RingMode::Record))?)?;
    let mut reader = RecordRing::new(registry.attach("scenario_e")?)?;

    let producer = std::thread::spawn(move || {
        let mut rng = rand::thread_rng();
        for seq in 0..CYCLES {
            let len = rng.gen_range(0..300);
            let body: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>()).collect();
            let mut payload = seq.to_le_bytes().to_vec();
            payload.extend_from_slice(&body);
            payload.extend_from_slice(&checksum(&body).to_le_bytes());

            loop {
                match writer.write_record(&payload) {
                    Ok(()) => break,
                    Err(e) if e.is_retryable() => std::thread::yield_now(),
                    Err(e) => panic!("write failed: {e}"),
                }
            }
        }
    });

    let mut record = Vec::new();
    let mut expected = 0u32;
    while expected < CYCLES {
        if !reader.take_record(&mut record) {
            std::thread::yield_now();
            continue;
        }
        assert!(record.len() >= 8);
        let seq = u32::from_le_bytes(record[..4].try_into().expect("4 bytes"));
        let (body, sum) = record[4..].split_at(record.len() - 8);
        assert_eq!(seq, expected);
        assert_eq!(checksum(body), u32::from_le_bytes(sum.try_into().expect("4 bytes")));
        expected += 1;
    }

    producer.join().expect("producer thread");
    assert!(reader.ring().is_empty());
    Ok(())
}
