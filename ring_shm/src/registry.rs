//! Named ring directory: create, attach, delete, list, inspect.
//!
//! Every ring is one file `<dir>/<prefix><name>.ring`. A creator builds and
//! initialises the segment under a private temporary name and then
//! hard-links it into place, so the final name only ever refers to a fully
//! initialised ring and exactly one concurrent creator wins.
//!
//! The registry is a plain value. There is no process-wide state; whoever
//! composes the process constructs one and passes it where it is needed.

use crate::descriptor::{RingDescriptor, RingSpec, ring_name};
use crate::error::{RingError, RingResult};
use crate::layout::RingOffsets;
use crate::platform::{
    MappingOptions, attach_segment_mmap, create_segment_mmap, get_current_pid, now_ns,
};
use crate::ring::RingBuffer;
use crate::status::RingStatus;
use ring_common::config::{RegistryConfig, RingsConfig};
use ring_common::consts::RING_FILE_EXT;
use ring_common::ring::is_valid_ring_name;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Directory of named rings
///
/// Clones share the temporary-name counter.
#[derive(Debug, Clone)]
pub struct RingRegistry {
    config: RegistryConfig,
    tmp_seq: Arc<AtomicU64>,
}

impl RingRegistry {
    /// Registry over `config.dir`. Nothing touches the file system yet.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            tmp_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registry location
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Segment file path of `name`.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.config
            .dir
            .join(format!("{}{}.{}", self.config.prefix, name, RING_FILE_EXT))
    }

    /// Private name for a segment under construction: pid, creation time
    /// and a per-registry sequence number.
    fn temp_path(&self, name: &str) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.config.dir.join(format!(
            ".{}{}.{}.{}.{}.{}.tmp",
            self.config.prefix,
            name,
            RING_FILE_EXT,
            get_current_pid(),
            now_ns(),
            seq
        ))
    }

    fn open_error(name: &str, e: io::Error) -> RingError {
        if e.kind() == io::ErrorKind::NotFound {
            RingError::NotFound {
                name: name.to_string(),
            }
        } else {
            RingError::Io { source: e }
        }
    }

    /// Create a ring, or attach to it if it already exists with identical
    /// parameters.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `InvalidCapacity`, `Conflict` when the existing ring
    /// differs, `AllocationFailed` when the segment cannot be created.
    pub fn create(&self, name: &str, spec: &RingSpec) -> RingResult<RingBuffer> {
        let ring_name = ring_name(name)?;
        spec.validate()?;

        let path = self.path_of(name);
        if path.exists() {
            return self.attach_matching(name, spec);
        }

        let alloc_failed = |source: io::Error| RingError::AllocationFailed {
            name: name.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.config.dir).map_err(alloc_failed)?;

        let offsets = RingOffsets::new(spec.capacity, spec.scratchpad);
        let options = MappingOptions::from_flags(spec.flags);
        // Temp files are created exclusively; a taken name just moves on.
        let (tmp, mmap) = loop {
            let tmp = self.temp_path(name);
            match create_segment_mmap(&tmp, offsets.segment_len(), &options) {
                Ok(mmap) => break (tmp, mmap),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    let _ = std::fs::remove_file(&tmp);
                    return Err(alloc_failed(e));
                }
            }
        };

        let descriptor = RingDescriptor {
            name: ring_name,
            capacity: spec.capacity,
            mode: spec.mode,
            flags: spec.flags,
            scratchpad: spec.scratchpad,
            policy: spec.policy,
            created_ts: now_ns(),
        };
        let ring = match RingBuffer::initialise(mmap, descriptor, path.clone()) {
            Ok(ring) => ring,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        };

        let linked = std::fs::hard_link(&tmp, &path);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => {
                info!(
                    "Created ring '{}' ({} bytes, {} mode) at {}",
                    name,
                    spec.capacity,
                    spec.mode,
                    path.display()
                );
                Ok(ring)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                ring.abandon();
                debug!("Ring '{}' was created concurrently", name);
                self.attach_matching(name, spec)
            }
            Err(e) => {
                ring.abandon();
                Err(alloc_failed(e))
            }
        }
    }

    fn attach_matching(&self, name: &str, spec: &RingSpec) -> RingResult<RingBuffer> {
        let ring = self.attach(name)?;
        if let Some(reason) = ring.descriptor().mismatch(spec) {
            return Err(RingError::Conflict {
                name: name.to_string(),
                reason,
            });
        }
        debug!("Ring '{}' exists with identical parameters, attached", name);
        Ok(ring)
    }

    /// Attach to an existing ring. Its parameters come from its header.
    pub fn attach(&self, name: &str) -> RingResult<RingBuffer> {
        let ring = self.open(name, true)?;
        ring.apply_backing();
        debug!("Attached to ring '{}' ({} handle(s))", name, ring.attached());
        Ok(ring)
    }

    fn open(&self, name: &str, counted: bool) -> RingResult<RingBuffer> {
        ring_name(name)?;
        let path = self.path_of(name);
        let mmap = attach_segment_mmap(&path).map_err(|e| Self::open_error(name, e))?;
        RingBuffer::open(mmap, name, path, counted)
    }

    /// Detach a handle. Equivalent to dropping it.
    pub fn detach(&self, ring: RingBuffer) {
        ring.detach();
    }

    /// Remove a ring's segment file.
    ///
    /// Fails `InUse` while handles are attached unless `force` is set.
    /// Mappings held by other processes stay valid until they detach.
    pub fn delete(&self, name: &str, force: bool) -> RingResult<()> {
        match self.open(name, false) {
            Ok(ring) => {
                let attached = ring.attached();
                if attached > 0 {
                    if !force {
                        return Err(RingError::InUse {
                            name: name.to_string(),
                            attached,
                        });
                    }
                    warn!(
                        "Force-deleting ring '{}' with {} handle(s) attached",
                        name, attached
                    );
                }
            }
            Err(RingError::Corrupt { reason, .. }) if force => {
                warn!("Force-deleting corrupt ring '{}': {}", name, reason);
            }
            Err(e) => return Err(e),
        }

        std::fs::remove_file(self.path_of(name)).map_err(|e| Self::open_error(name, e))?;
        info!("Deleted ring '{}'", name);
        Ok(())
    }

    /// True if a segment file for `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        is_valid_ring_name(name) && self.path_of(name).exists()
    }

    /// Names of all rings in the registry, sorted.
    pub fn rings(&self) -> RingResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{RING_FILE_EXT}");
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file| {
                let name = file
                    .strip_prefix(self.config.prefix.as_str())?
                    .strip_suffix(suffix.as_str())?;
                is_valid_ring_name(name).then(|| name.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Parameters of `name`, without attaching.
    pub fn descriptor(&self, name: &str) -> RingResult<RingDescriptor> {
        Ok(self.open(name, false)?.descriptor().clone())
    }

    /// Status of `name`, without attaching.
    pub fn inspect(&self, name: &str) -> RingResult<RingStatus> {
        Ok(self.open(name, false)?.status())
    }

    /// Status of every readable ring. Unreadable segments are logged and
    /// skipped.
    pub fn inspect_all(&self) -> RingResult<Vec<RingStatus>> {
        let mut out = Vec::new();
        for name in self.rings()? {
            match self.inspect(&name) {
                Ok(status) => out.push(status),
                Err(e) => warn!("Skipping ring '{}': {}", name, e),
            }
        }
        Ok(out)
    }

    /// Clear owner and lock words of `name` held by exited processes.
    pub fn reap_dead_owners(&self, name: &str) -> RingResult<usize> {
        let reaped = self.open(name, false)?.reap_dead_owners();
        if reaped > 0 {
            info!("Reaped {} stale owner word(s) on ring '{}'", reaped, name);
        }
        Ok(reaped)
    }

    /// Create (or attach to) every ring declared in `config`.
    ///
    /// Stops at the first failure; handles created so far are dropped.
    pub fn create_from_config(&self, config: &RingsConfig) -> RingResult<Vec<RingBuffer>> {
        config
            .rings
            .iter()
            .map(|entry| self.create(&entry.name, &RingSpec::from(entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RingFlags;
    use crate::owner::Role;
    use ring_common::config::{ConfigLoader, RingsConfig};
    use ring_common::ring::RingMode;
    use std::num::NonZeroU32;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry() -> (TempDir, RingRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = RingRegistry::new(RegistryConfig::in_dir(dir.path()));
        (dir, registry)
    }

    #[test]
    fn create_then_attach() {
        let (dir, registry) = registry();
        let spec = RingSpec::new(4096, RingMode::Record).with_scratchpad(32);
        let ring = registry.create("motion.cmd", &spec).unwrap();

        assert_eq!(ring.path(), dir.path().join("ring_motion.cmd.ring"));
        assert!(registry.exists("motion.cmd"));
        assert_eq!(ring.attached(), 1);

        let other = registry.attach("motion.cmd").unwrap();
        assert_eq!(other.capacity(), 4096);
        assert_eq!(other.mode(), RingMode::Record);
        assert_eq!(other.scratchpad().len(), 32);
        assert_eq!(ring.attached(), 2);
        drop(other);
        assert_eq!(ring.attached(), 1);
    }

    #[test]
    fn create_existing_identical_attaches() {
        let (_dir, registry) = registry();
        let spec = RingSpec::new(1024, RingMode::Stream);
        let first = registry.create("io", &spec).unwrap();
        let second = registry.create("io", &spec).unwrap();
        assert_eq!(second.descriptor().created_ts, first.descriptor().created_ts);
        assert_eq!(first.attached(), 2);
    }

    #[test]
    fn create_existing_different_conflicts() {
        let (_dir, registry) = registry();
        let _ring = registry
            .create("io", &RingSpec::new(1024, RingMode::Stream))
            .unwrap();
        let err = registry
            .create("io", &RingSpec::new(2048, RingMode::Stream))
            .unwrap_err();
        assert!(matches!(err, RingError::Conflict { .. }));
        assert!(err.to_string().contains("capacity 1024"));
    }

    #[test]
    fn concurrent_creators_agree() {
        let (_dir, registry) = registry();
        let registry = Arc::new(registry);
        let spec = RingSpec::new(8192, RingMode::Multiframe);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.create("race", &spec).map(|r| r.descriptor().created_ts))
            })
            .collect();
        let stamps: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(stamps.iter().all(|&ts| ts == stamps[0]));
        assert_eq!(registry.rings().unwrap(), vec!["race".to_string()]);
    }

    #[test]
    fn temp_segments_are_private_and_removed() {
        let (dir, registry) = registry();
        let other = RingRegistry::new(registry.config().clone());
        let clone = registry.clone();

        let names = [
            registry.temp_path("t"),
            clone.temp_path("t"),
            registry.temp_path("t"),
        ];
        for (i, a) in names.iter().enumerate() {
            assert!(names[i + 1..].iter().all(|b| a != b));
        }

        let spec = RingSpec::new(1024, RingMode::Record);
        let _a = registry.create("t1", &spec).unwrap();
        let _b = other.create("t2", &spec).unwrap();
        let _c = clone.create("t1", &spec).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(registry.rings().unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn attach_missing_and_invalid() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.attach("absent"),
            Err(RingError::NotFound { .. })
        ));
        assert!(matches!(
            registry.attach("bad/name"),
            Err(RingError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.create("", &RingSpec::new(1024, RingMode::Record)),
            Err(RingError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.create("odd", &RingSpec::new(1000, RingMode::Record)),
            Err(RingError::InvalidCapacity { .. })
        ));
        assert!(!registry.exists("odd"));
    }

    #[test]
    fn delete_respects_attachments() {
        let (_dir, registry) = registry();
        let ring = registry
            .create("busy", &RingSpec::new(1024, RingMode::Record))
            .unwrap();
        assert!(matches!(
            registry.delete("busy", false),
            Err(RingError::InUse { attached: 1, .. })
        ));

        registry.detach(ring);
        registry.delete("busy", false).unwrap();
        assert!(!registry.exists("busy"));
        assert!(matches!(
            registry.delete("busy", false),
            Err(RingError::NotFound { .. })
        ));
    }

    #[test]
    fn forced_delete_keeps_existing_mapping() {
        let (_dir, registry) = registry();
        let mut ring = registry
            .create("forced", &RingSpec::new(1024, RingMode::Stream))
            .unwrap();
        registry.delete("forced", true).unwrap();
        assert!(!registry.exists("forced"));
        assert_eq!(ring.write_raw(b"still mapped"), 12);
    }

    #[test]
    fn unlink_on_last_detach() {
        let (_dir, registry) = registry();
        let spec =
            RingSpec::new(1024, RingMode::Record).with_flags(RingFlags::UNLINK_ON_LAST_DETACH);
        let first = registry.create("ephemeral", &spec).unwrap();
        let second = registry.attach("ephemeral").unwrap();

        drop(first);
        assert!(registry.exists("ephemeral"));
        drop(second);
        assert!(!registry.exists("ephemeral"));
    }

    #[test]
    fn listing_filters_and_sorts() {
        let (dir, registry) = registry();
        for name in ["zeta", "alpha", "mid.ring"] {
            registry
                .create(name, &RingSpec::new(1024, RingMode::Stream))
                .unwrap();
        }
        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("ring_notes.txt"), b"x").unwrap();

        assert_eq!(registry.rings().unwrap(), vec!["alpha", "mid.ring", "zeta"]);

        let missing = RingRegistry::new(RegistryConfig::in_dir(dir.path().join("nope")));
        assert!(missing.rings().unwrap().is_empty());
    }

    #[test]
    fn inspection_does_not_attach() {
        let (_dir, registry) = registry();
        let mut ring = registry
            .create("watched", &RingSpec::new(1024, RingMode::Stream))
            .unwrap();
        ring.write_raw(&[0u8; 256]);

        let status = registry.inspect("watched").unwrap();
        assert_eq!(status.attached, 1);
        assert_eq!(status.available_to_read, 256);
        assert_eq!(status.available_to_write, 768);
        assert_eq!(ring.attached(), 1);

        let all = registry.inspect_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(registry.descriptor("watched").unwrap().capacity, 1024);
    }

    #[test]
    fn corrupt_segment_is_reported_and_force_deleted() {
        let (dir, registry) = registry();
        std::fs::write(dir.path().join("ring_junk.ring"), vec![0u8; 4096]).unwrap();

        assert!(matches!(
            registry.attach("junk"),
            Err(RingError::Corrupt { .. })
        ));
        assert!(registry.inspect_all().unwrap().is_empty());
        assert!(registry.delete("junk", false).is_err());
        registry.delete("junk", true).unwrap();
        assert!(!registry.exists("junk"));
    }

    #[test]
    fn dead_owner_is_reaped() {
        let (_dir, registry) = registry();
        let ring = registry
            .create("orphan", &RingSpec::new(1024, RingMode::Record))
            .unwrap();
        let dead = 4_194_304 + 17;
        ring.header()
            .writer_owner
            .store(dead, std::sync::atomic::Ordering::Release);

        assert_eq!(registry.reap_dead_owners("orphan").unwrap(), 1);
        assert!(ring.owner(Role::Writer).is_unclaimed());

        let mut ring = ring;
        let me = NonZeroU32::new(get_current_pid()).unwrap();
        ring.claim(Role::Writer, me).unwrap();
        assert_eq!(registry.reap_dead_owners("orphan").unwrap(), 0);
    }

    #[test]
    fn rings_from_config() {
        let (_dir, registry) = registry();
        let config = RingsConfig::from_toml(
            r#"
            [shared]
            service_name = "test"

            [[ring]]
            name = "cmd"
            capacity = 4096
            mode = "record"
            writer_mutex = true

            [[ring]]
            name = "fb"
            mode = "stream"
            policy = "drop_newest"
            "#,
        )
        .unwrap();

        let rings = registry.create_from_config(&config).unwrap();
        assert_eq!(rings.len(), 2);
        assert!(rings[0].flags().contains(RingFlags::WRITER_MUTEX));
        assert_eq!(rings[1].capacity(), 1024);
        assert_eq!(registry.rings().unwrap(), vec!["cmd", "fb"]);

        // Re-running against live rings attaches.
        let again = registry.create_from_config(&config).unwrap();
        assert_eq!(again[0].attached(), 2);
    }
}
