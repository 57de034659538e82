//! Registry lifecycle driven by a ring declaration file

use ring_common::config::{ConfigLoader, RegistryConfig, RingsConfig};
use ring_common::ring::{RingMode, SaturationPolicy};
use ring_shm::{
    Chunk, Delivery, FramedRing, RingChannel, RingError, RingFlags, RingRegistry, RingResult,
};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

const RINGS_TOML: &str = r#"
[shared]
service_name = "lifecycle"
log_level = "debug"

[[ring]]
name = "motion.cmd"
capacity = 4096
mode = "record"
writer_mutex = true

[[ring]]
name = "motion.feedback"
capacity = 2048
mode = "stream"
policy = "drop_newest"

[[ring]]
name = "motion.plan"
capacity = 8192
mode = "multiframe"
scratchpad = 64
unlink_on_last_detach = true
"#;

fn load_config(dir: &TempDir) -> RingsConfig {
    let mut file = NamedTempFile::new().expect("config file");
    file.write_all(RINGS_TOML.as_bytes()).expect("write config");
    let mut config = RingsConfig::load(file.path()).expect("load config");
    config.registry = RegistryConfig::in_dir(dir.path());
    config.validate().expect("valid config");
    config
}

#[test]
fn test_declared_rings_lifecycle() -> RingResult<()> {
    let dir = TempDir::new()?;
    let config = load_config(&dir);
    let registry = RingRegistry::new(config.registry.clone());

    let owners = registry.create_from_config(&config)?;
    assert_eq!(
        registry.rings()?,
        vec!["motion.cmd", "motion.feedback", "motion.plan"]
    );

    let statuses = registry.inspect_all()?;
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0].flags, vec!["writer_mutex".to_string()]);
    assert_eq!(statuses[1].policy, SaturationPolicy::DropNewest);
    assert_eq!(statuses[2].scratchpad, 64);
    assert!(statuses.iter().all(|s| s.attached == 1));

    // Each ring gets the layer matching its declared mode.
    let mut channels = Vec::new();
    for name in registry.rings()? {
        channels.push(FramedRing::from_ring(registry.attach(&name)?)?);
    }
    let modes: Vec<RingMode> = channels.iter().map(|c| c.mode()).collect();
    assert_eq!(
        modes,
        vec![RingMode::Record, RingMode::Stream, RingMode::Multiframe]
    );

    for channel in &mut channels {
        assert_eq!(channel.deliver(b"status ok")?, Delivery::Written(9));
    }
    match channels[2].read() {
        Some(Chunk::Group(group)) => assert_eq!(group.frame_count(), 1),
        _ => panic!("expected a group"),
    }

    // Attached rings cannot be deleted without force.
    assert!(matches!(
        registry.delete("motion.cmd", false),
        Err(RingError::InUse { attached: 2, .. })
    ));

    drop(channels);
    drop(owners);

    // The plan ring unlinked itself on last detach; the others remain.
    assert_eq!(registry.rings()?, vec!["motion.cmd", "motion.feedback"]);
    registry.delete("motion.cmd", false)?;
    registry.delete("motion.feedback", false)?;
    assert!(registry.rings()?.is_empty());
    Ok(())
}

#[test]
fn test_redeclaring_with_other_parameters_conflicts() -> RingResult<()> {
    let dir = TempDir::new()?;
    let mut config = load_config(&dir);
    let registry = RingRegistry::new(config.registry.clone());
    let _owners = registry.create_from_config(&config)?;

    config.rings[0].writer_mutex = false;
    match registry.create_from_config(&config) {
        Err(RingError::Conflict { name, reason }) => {
            assert_eq!(name, "motion.cmd");
            assert!(reason.contains("flags"));
        }
        Err(e) => panic!("expected Conflict, got {e}"),
        Ok(_) => panic!("expected Conflict"),
    }

    let descriptor = registry.descriptor("motion.cmd")?;
    assert_eq!(descriptor.flags, RingFlags::WRITER_MUTEX);
    Ok(())
}
