/*!
 * Volume identity records and the rule for accepting new ones
 *
 * A master volume describes itself with a `VolInfo`; at every top-level
 * turn the worker re-observes the `(foreign, native)` pair and has to
 * decide which observation to trust. The only legal identity transitions
 * for a slot are "same uuid" and "absent -> present"; a uuid flip is
 * corruption unless an earlier slot already validated this turn.
 */

use tracing::debug;

use crate::error::{Result, TidemarkError};
use crate::xtime::Xtime;

/// Identity and health of a master volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolInfo {
    /// 128-bit volume identifier as 32 hex digits
    pub uuid: String,

    /// Epoch floor: any xtime strictly below this is stale
    pub volume_mark: Xtime,

    /// Non-zero when the volume is unusable
    pub retval: i32,

    /// Liveness deadline, patched in by the keep-alive sender
    pub timeout: Option<i64>,
}

impl VolInfo {
    pub fn new(uuid: &str, volume_mark: Xtime) -> Self {
        Self {
            uuid: uuid.to_string(),
            volume_mark,
            retval: 0,
            timeout: None,
        }
    }

    /// A uuid-only record used to seed the state from configuration.
    pub fn preset(uuid: &str) -> Self {
        Self::new(uuid, Xtime::EARLIEST)
    }
}

/// The authoritative `(foreign, native)` pair. A present foreign slot means
/// the master is itself an intermediate replica.
pub type VolinfoState = (Option<VolInfo>, Option<VolInfo>);

/// Which slot of the state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Foreign,
    Native,
}

fn short(vi: &Option<VolInfo>) -> &str {
    vi.as_ref().map(|v| &v.uuid[..v.uuid.len().min(8)]).unwrap_or("-")
}

/// Advance the authoritative state given a freshly observed pair.
///
/// Slots are folded left to right with a shared relax flag: the first slot
/// that validates (same uuid, or newly appearing) relaxes the check for the
/// rest, because a primary's native identity may legitimately change once a
/// foreign master owns the session. Returns the new state and which slot,
/// if any, went from absent to present.
pub fn step(prior: &VolinfoState, observed: &VolinfoState) -> Result<(VolinfoState, Option<Slot>)> {
    let mut relax = false;
    let mut state_change = None;

    let mut select = |slot: Slot,
                      vi0: &Option<VolInfo>,
                      vi: &Option<VolInfo>|
     -> Result<Option<VolInfo>> {
        match (vi0, vi) {
            (None, Some(new)) => {
                if !relax {
                    state_change = Some(slot);
                }
                relax = true;
                Ok(Some(new.clone()))
            }
            (Some(old), Some(new)) if old.uuid == new.uuid => {
                relax = true;
                Ok(Some(new.clone()))
            }
            (Some(old), Some(new)) if !relax => Err(TidemarkError::UuidChange {
                from: old.uuid.clone(),
                to: new.uuid.clone(),
            }),
            _ => Ok(vi0.clone()),
        }
    };

    let foreign = select(Slot::Foreign, &prior.0, &observed.0)?;
    let native = select(Slot::Native, &prior.1, &observed.1)?;
    let new = (foreign, native);

    debug!(
        "({}, {}) << ({}, {}) -> ({}, {})",
        short(&prior.0),
        short(&prior.1),
        short(&observed.0),
        short(&observed.1),
        short(&new.0),
        short(&new.1)
    );

    Ok((new, state_change))
}
