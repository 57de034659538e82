//! Advisory reader/writer ownership.
//!
//! Each ring header carries one owner word per role. The word holds a
//! non-zero id (by convention the owning pid) or zero when nobody claimed
//! the role. Ownership is cooperative: the OS does not enforce it, and a
//! party that ignores it can still read or write.

use crate::error::{RingError, RingResult};
use crate::platform::{get_current_pid, is_process_alive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

/// Side of the ring a party occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Consumer, owns `tail`.
    Reader,
    /// Producer, owns `head`.
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader => f.write_str("reader"),
            Self::Writer => f.write_str("writer"),
        }
    }
}

/// Current holder of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    /// Nobody claimed the role.
    #[default]
    Unclaimed,
    /// Claimed by the given id.
    ClaimedBy(NonZeroU32),
}

impl Owner {
    /// Decode a raw owner word.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        NonZeroU32::new(raw).map_or(Self::Unclaimed, Self::ClaimedBy)
    }

    /// Encode into a raw owner word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Unclaimed => 0,
            Self::ClaimedBy(id) => id.get(),
        }
    }

    /// Owner id, if claimed.
    #[inline]
    pub fn id(self) -> Option<NonZeroU32> {
        match self {
            Self::Unclaimed => None,
            Self::ClaimedBy(id) => Some(id),
        }
    }

    /// True if nobody holds the role.
    #[inline]
    pub fn is_unclaimed(self) -> bool {
        matches!(self, Self::Unclaimed)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unclaimed => f.write_str("-"),
            Self::ClaimedBy(id) => write!(f, "{id}"),
        }
    }
}

/// Owner id of the calling process.
///
/// Pids are never zero on Linux, so this cannot collide with `Unclaimed`.
pub fn current_owner_id() -> NonZeroU32 {
    NonZeroU32::new(get_current_pid()).unwrap_or(NonZeroU32::MIN)
}

/// Claim `role` in `word` for `id`.
///
/// Idempotent for the same id; any other holder yields `RoleClaimed`.
pub(crate) fn claim_word(word: &AtomicU32, role: Role, id: NonZeroU32) -> RingResult<()> {
    match word.compare_exchange(0, id.get(), Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok(()),
        Err(current) if current == id.get() => Ok(()),
        Err(current) => Err(RingError::RoleClaimed {
            role,
            owner: current,
        }),
    }
}

/// Release `role` in `word` if held by `id`.
pub(crate) fn release_word(word: &AtomicU32, role: Role, id: NonZeroU32) -> RingResult<()> {
    word.compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| RingError::NotOwner { role, id: id.get() })
}

/// Clear `word` if its holder process is gone. Returns the reaped id.
pub(crate) fn reap_word(word: &AtomicU32) -> Option<u32> {
    let holder = word.load(Ordering::Acquire);
    if holder == 0 || is_process_alive(holder) {
        return None;
    }
    word.compare_exchange(holder, 0, Ordering::AcqRel, Ordering::Acquire)
        .ok()
}

/// Roles a single handle has claimed, released when the handle drops.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeldRoles {
    pub reader: Option<NonZeroU32>,
    pub writer: Option<NonZeroU32>,
}

impl HeldRoles {
    pub fn slot(&mut self, role: Role) -> &mut Option<NonZeroU32> {
        match role {
            Role::Reader => &mut self.reader,
            Role::Writer => &mut self.writer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn owner_raw_roundtrip() {
        assert_eq!(Owner::from_raw(0), Owner::Unclaimed);
        assert_eq!(Owner::from_raw(7), Owner::ClaimedBy(id(7)));
        assert_eq!(Owner::ClaimedBy(id(7)).to_raw(), 7);
        assert_eq!(Owner::Unclaimed.to_raw(), 0);
        assert!(Owner::Unclaimed.is_unclaimed());
        assert_eq!(Owner::ClaimedBy(id(3)).id(), Some(id(3)));
    }

    #[test]
    fn second_claim_is_rejected() {
        let word = AtomicU32::new(0);
        claim_word(&word, Role::Writer, id(100)).unwrap();
        claim_word(&word, Role::Writer, id(100)).unwrap();

        let err = claim_word(&word, Role::Writer, id(200)).unwrap_err();
        assert!(matches!(
            err,
            RingError::RoleClaimed {
                role: Role::Writer,
                owner: 100
            }
        ));
        assert_eq!(word.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn release_requires_ownership() {
        let word = AtomicU32::new(0);
        claim_word(&word, Role::Reader, id(5)).unwrap();
        assert!(matches!(
            release_word(&word, Role::Reader, id(6)),
            Err(RingError::NotOwner { id: 6, .. })
        ));
        release_word(&word, Role::Reader, id(5)).unwrap();
        assert_eq!(word.load(Ordering::Relaxed), 0);
        claim_word(&word, Role::Reader, id(6)).unwrap();
    }

    #[test]
    fn reap_keeps_live_owner() {
        let word = AtomicU32::new(current_owner_id().get());
        assert_eq!(reap_word(&word), None);
        assert_eq!(word.load(Ordering::Relaxed), current_owner_id().get());

        let empty = AtomicU32::new(0);
        assert_eq!(reap_word(&empty), None);
    }

    #[test]
    fn reap_clears_dead_owner() {
        // Above the kernel's pid_max ceiling, so never a live process.
        let dead = 4_194_304 + 17;
        let word = AtomicU32::new(dead);
        assert_eq!(reap_word(&word), Some(dead));
        assert_eq!(word.load(Ordering::Relaxed), 0);
    }
}
