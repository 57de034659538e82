//! Subcommand implementations. Each writes its output to `w` so tests can
//! capture it.

use ring_common::config::RingsConfig;
use ring_common::ring::SaturationPolicy;
use ring_shm::{
    Chunk, Delivery, FramedRing, RingChannel, RingFlags, RingRegistry, RingSpec, Role,
    current_owner_id, render_report,
};
use serde_json::json;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Output format selected on the command line.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

/// Options of the `read` subcommand.
pub struct ReadOptions {
    pub follow: bool,
    pub count: Option<usize>,
    pub poll: Duration,
}

/// Parse `reject`, `drop_newest` or `retry:<attempts>:<backoff_us>`.
pub fn parse_policy(s: &str) -> Result<SaturationPolicy, String> {
    match s {
        "reject" => Ok(SaturationPolicy::Reject),
        "drop_newest" | "drop-newest" => Ok(SaturationPolicy::DropNewest),
        other => {
            let parts: Vec<&str> = other.split(':').collect();
            match parts.as_slice() {
                ["retry", attempts, backoff_us] => Ok(SaturationPolicy::Retry {
                    attempts: attempts
                        .parse()
                        .map_err(|e| format!("retry attempts '{attempts}': {e}"))?,
                    backoff_us: backoff_us
                        .parse()
                        .map_err(|e| format!("retry backoff '{backoff_us}': {e}"))?,
                }),
                _ => Err(format!(
                    "unknown policy '{other}' (expected reject, drop_newest or retry:<attempts>:<backoff_us>)"
                )),
            }
        }
    }
}

fn warn_if_ephemeral(name: &str, flags: RingFlags) {
    if flags.contains(RingFlags::UNLINK_ON_LAST_DETACH) {
        warn!(
            "Ring '{}' unlinks on last detach and disappears when no process holds it",
            name
        );
    }
}

pub fn newring(
    registry: &RingRegistry,
    name: &str,
    spec: &RingSpec,
    out: &Output,
    w: &mut impl Write,
) -> CmdResult {
    let ring = registry.create(name, spec)?;
    warn_if_ephemeral(name, ring.flags());

    if out.json {
        writeln!(w, "{}", serde_json::to_string(&ring.status())?)?;
    } else {
        writeln!(
            w,
            "ring '{}': {} bytes, {} mode, {}",
            name,
            ring.capacity(),
            ring.mode(),
            ring.path().display()
        )?;
    }
    Ok(())
}

pub fn delring(
    registry: &RingRegistry,
    name: &str,
    force: bool,
    out: &Output,
    w: &mut impl Write,
) -> CmdResult {
    registry.delete(name, force)?;
    if out.json {
        writeln!(w, "{}", json!({ "deleted": name }))?;
    } else {
        writeln!(w, "deleted ring '{name}'")?;
    }
    Ok(())
}

/// Status of one ring, or of every ring when `name` is `None`.
pub fn show(
    registry: &RingRegistry,
    name: Option<&str>,
    out: &Output,
    w: &mut impl Write,
) -> CmdResult {
    let statuses = match name {
        Some(name) => vec![registry.inspect(name)?],
        None => registry.inspect_all()?,
    };

    if out.json {
        writeln!(w, "{}", serde_json::to_string_pretty(&statuses)?)?;
    } else if statuses.is_empty() {
        writeln!(w, "no rings in {}", registry.config().dir.display())?;
    } else {
        w.write_all(render_report(&statuses).as_bytes())?;
    }
    Ok(())
}

fn print_chunk(chunk: Chunk<'_>, index: usize, out: &Output, w: &mut impl Write) -> io::Result<()> {
    match chunk {
        Chunk::Record { payload, .. } => {
            let data = String::from_utf8_lossy(payload);
            if out.json {
                writeln!(w, "{}", json!({ "index": index, "kind": "record", "data": data }))
            } else {
                writeln!(w, "{data}")
            }
        }
        Chunk::Bytes(view) => {
            let bytes = view.to_vec();
            if out.json {
                let data = String::from_utf8_lossy(&bytes);
                writeln!(w, "{}", json!({ "index": index, "kind": "bytes", "data": data }))
            } else {
                w.write_all(&bytes)
            }
        }
        Chunk::Group(group) => {
            if out.json {
                let frames: Vec<_> = group
                    .map(|f| {
                        json!({
                            "data": String::from_utf8_lossy(f.data),
                            "continuation": f.continuation,
                        })
                    })
                    .collect();
                writeln!(w, "{}", json!({ "index": index, "kind": "group", "frames": frames }))
            } else {
                writeln!(w, "-- group {index}")?;
                for frame in group {
                    let marker = if frame.continuation { "+" } else { " " };
                    writeln!(w, "{marker} {}", String::from_utf8_lossy(frame.data))?;
                }
                Ok(())
            }
        }
    }
}

/// Print every unread chunk without consuming anything.
pub fn dump(registry: &RingRegistry, name: &str, out: &Output, w: &mut impl Write) -> CmdResult {
    let ring = FramedRing::from_ring(registry.attach(name)?)?;
    match &ring {
        FramedRing::Record(records) => {
            for (i, payload) in records.records().enumerate() {
                print_chunk(Chunk::Record { payload, span: 0 }, i, out, w)?;
            }
        }
        FramedRing::Stream(stream) => {
            let view = stream.peek();
            if !view.is_empty() {
                print_chunk(Chunk::Bytes(view), 0, out, w)?;
            }
        }
        FramedRing::Multiframe(groups) => {
            for (i, group) in groups.groups().enumerate() {
                print_chunk(Chunk::Group(group), i, out, w)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

/// Deliver each payload under the ring's saturation policy.
pub fn write(
    registry: &RingRegistry,
    name: &str,
    payloads: &[Vec<u8>],
    out: &Output,
    w: &mut impl Write,
) -> CmdResult {
    let mut ring = FramedRing::from_ring(registry.attach(name)?)?;
    ring.ring_mut().claim(Role::Writer, current_owner_id())?;

    let (mut written, mut dropped) = (0usize, 0usize);
    for payload in payloads {
        let mut rest = payload.as_slice();
        loop {
            match ring.deliver(rest)? {
                Delivery::Written(n) if n < rest.len() => rest = &rest[n..],
                Delivery::Written(_) => {
                    written += 1;
                    break;
                }
                Delivery::Dropped => {
                    dropped += 1;
                    break;
                }
            }
        }
    }
    info!("Wrote {} payload(s) to '{}', dropped {}", written, name, dropped);

    if out.json {
        writeln!(w, "{}", json!({ "ring": name, "written": written, "dropped": dropped }))?;
    } else if dropped > 0 {
        writeln!(w, "wrote {written}, dropped {dropped}")?;
    }
    Ok(())
}

/// Consume and print chunks; with `follow`, poll until `running` clears.
pub fn read(
    registry: &RingRegistry,
    name: &str,
    options: &ReadOptions,
    running: &AtomicBool,
    out: &Output,
    w: &mut impl Write,
) -> CmdResult {
    let mut ring = FramedRing::from_ring(registry.attach(name)?)?;
    ring.ring_mut().claim(Role::Reader, current_owner_id())?;

    let wanted = |taken: usize| options.count.is_none_or(|count| taken < count);
    let mut taken = 0;
    loop {
        while wanted(taken) {
            let Some(chunk) = ring.read() else { break };
            let span = chunk.span();
            print_chunk(chunk, taken, out, w)?;
            ring.shift(span)?;
            taken += 1;
        }
        w.flush()?;

        if !options.follow || !wanted(taken) || !running.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(options.poll);
    }
    Ok(())
}

/// Create every ring declared in `config`, in the registry it names.
pub fn load(config: &RingsConfig, out: &Output, w: &mut impl Write) -> CmdResult {
    config.validate()?;

    let registry = RingRegistry::new(config.registry.clone());
    let rings = registry.create_from_config(config)?;
    info!(
        "Loaded {} ring(s) for '{}' into {}",
        rings.len(),
        config.shared.service_name,
        registry.config().dir.display()
    );

    let statuses: Vec<_> = rings.iter().map(|ring| ring.status()).collect();
    for ring in &rings {
        warn_if_ephemeral(ring.name(), ring.flags());
    }
    if out.json {
        writeln!(w, "{}", serde_json::to_string_pretty(&statuses)?)?;
    } else {
        w.write_all(render_report(&statuses).as_bytes())?;
    }
    Ok(())
}

pub fn reap(registry: &RingRegistry, name: &str, out: &Output, w: &mut impl Write) -> CmdResult {
    let reaped = registry.reap_dead_owners(name)?;
    if out.json {
        writeln!(w, "{}", json!({ "ring": name, "reaped": reaped }))?;
    } else {
        writeln!(w, "cleared {reaped} stale owner word(s) on '{name}'")?;
    }
    Ok(())
}
