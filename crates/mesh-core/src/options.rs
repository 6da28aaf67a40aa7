//! Broadcast options in their in-process and wire forms.
//!
//! In-process code works with room/exclusion sets; on the wire those sets are
//! always explicit lists so the encoded form has no set-type ambiguity.

use crate::ids::Room;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Modifier flags attached to a broadcast or query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFlags {
    /// Apply the operation locally only; never forward it to peers.
    ///
    /// Set on every outbound envelope before sending, so the receiver applies
    /// it locally and does not re-propagate.
    #[serde(default)]
    pub local: bool,
    /// Best-effort delivery; skipped toward peers when the sender has no
    /// locally connected sockets.
    #[serde(default)]
    pub volatile: bool,
    /// Deflate the envelope payload on the wire.
    #[serde(default)]
    pub compress: bool,
    /// Per-call override of the fan-out deadline, in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Room targeting for a broadcast or query, in-process form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Target rooms; empty means all locally connected sockets.
    pub rooms: HashSet<Room>,
    /// Rooms whose members are excluded.
    pub except: HashSet<Room>,
    /// Modifier flags.
    pub flags: BroadcastFlags,
}

impl BroadcastOptions {
    /// Target a set of rooms.
    pub fn to_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A copy of these options marked for local-only treatment.
    ///
    /// The marker is carried on a newly constructed value rather than mutated
    /// in place, so the caller's options are never observed half-updated.
    pub fn into_local(&self) -> Self {
        Self {
            rooms: self.rooms.clone(),
            except: self.except.clone(),
            flags: BroadcastFlags {
                local: true,
                ..self.flags.clone()
            },
        }
    }
}

/// Room targeting as encoded on the wire: sets become ordered lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOptions {
    /// Target rooms as an explicit list.
    #[serde(default)]
    pub rooms: Vec<Room>,
    /// Exclusion rooms as an explicit list.
    #[serde(default)]
    pub except: Vec<Room>,
    /// Modifier flags, carried verbatim.
    #[serde(default)]
    pub flags: BroadcastFlags,
}

impl From<&BroadcastOptions> for WireOptions {
    fn from(opts: &BroadcastOptions) -> Self {
        let mut rooms: Vec<Room> = opts.rooms.iter().cloned().collect();
        let mut except: Vec<Room> = opts.except.iter().cloned().collect();
        rooms.sort();
        except.sort();
        Self {
            rooms,
            except,
            flags: opts.flags.clone(),
        }
    }
}

impl From<WireOptions> for BroadcastOptions {
    fn from(wire: WireOptions) -> Self {
        Self {
            rooms: wire.rooms.into_iter().collect(),
            except: wire.except.into_iter().collect(),
            flags: wire.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_carries_sorted_lists() {
        let mut opts = BroadcastOptions::to_rooms(["b".to_string(), "a".to_string()]);
        opts.except.insert("x".to_string());

        let wire = WireOptions::from(&opts);
        assert_eq!(wire.rooms, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(wire.except, vec!["x".to_string()]);

        let back = BroadcastOptions::from(wire);
        assert_eq!(back.rooms, opts.rooms);
        assert_eq!(back.except, opts.except);
    }

    #[test]
    fn into_local_leaves_original_untouched() {
        let opts = BroadcastOptions::to_rooms(["a".to_string()]);
        let marked = opts.into_local();
        assert!(marked.flags.local);
        assert!(!opts.flags.local);
        assert_eq!(marked.rooms, opts.rooms);
    }
}
