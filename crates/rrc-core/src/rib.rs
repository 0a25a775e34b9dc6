//! Remote Interface Base registry.
//!
//! The RIB is the versioned mirror of a remote's configuration. Each
//! attribute is addressed by `(identifier, index)` — never identifier alone,
//! a versioning attribute spans index 0/1/2 for software/hardware/IRDB —
//! and carries a fixed wire length. A write whose length does not match the
//! declared length is rejected outright: no partial mutation, achieved
//! length 0 on the wire.
//!
//! Attributes are composed from optional capabilities instead of type
//! hierarchies: [`Persistable`] (the value has a database row) and
//! [`WireSynchronized`] (the value is re-exported to the remote's NVM after
//! each successful write). The registry itself is pure state; the network
//! worker performs the export/persist effects described by
//! [`RibWriteOutcome`], which keeps all I/O on the single writer.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::{ControllerType, IeeeAddress, PollingMethods};
use rrc_hal::db::table;
use rrc_wire::attrs::{id, versioning_index, PollingConfiguration};

// ============================================================================
// Descriptors and Capabilities
// ============================================================================

/// Attribute visibility: one value per network, or one per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RibScope {
    NetworkWide,
    PerController,
}

/// Persistence capability: the attribute owns a database row.
#[derive(Debug, Clone, Copy)]
pub struct Persistable {
    /// Table holding the row; the key is derived from owner and address.
    pub table: &'static str,
}

/// Wire-sync capability: the value is pushed back to the remote's persistent
/// storage after every accepted write (suppressed during import).
#[derive(Debug, Clone, Copy)]
pub struct WireSynchronized;

/// Static description of one RIB attribute.
#[derive(Debug, Clone, Copy)]
pub struct AttributeDescriptor {
    pub identifier: u8,
    pub index: u8,
    pub length: u8,
    pub scope: RibScope,
    pub name: &'static str,
    pub persistable: Option<Persistable>,
    pub wire_synchronized: Option<WireSynchronized>,
}

const PERSIST_RIB: Option<Persistable> = Some(Persistable { table: table::RIB });

/// The attribute set this target understands.
///
/// `(identifier, index)` is unique within each scope by construction; the
/// registry test below asserts it.
pub static DESCRIPTORS: &[AttributeDescriptor] = &[
    AttributeDescriptor {
        identifier: id::VERSIONING,
        index: versioning_index::SOFTWARE,
        length: 4,
        scope: RibScope::PerController,
        name: "versioning/software",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::VERSIONING,
        index: versioning_index::HARDWARE,
        length: 4,
        scope: RibScope::PerController,
        name: "versioning/hardware",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::VERSIONING,
        index: versioning_index::IRDB,
        length: 4,
        scope: RibScope::PerController,
        name: "versioning/irdb",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::BATTERY_STATUS,
        index: 0,
        length: 8,
        scope: RibScope::PerController,
        name: "battery_status",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::VOICE_COMMAND_STATUS,
        index: 0,
        length: 1,
        scope: RibScope::PerController,
        name: "voice_command_status",
        persistable: None,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::VOICE_COMMAND_LENGTH,
        index: 0,
        length: 1,
        scope: RibScope::PerController,
        name: "voice_command_length",
        persistable: None,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::POLLING_METHODS,
        index: 0,
        length: 1,
        scope: RibScope::PerController,
        name: "polling_methods",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::UPDATE_POLLING_PERIOD,
        index: 0,
        length: 4,
        scope: RibScope::PerController,
        name: "update_polling_period",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::POLLING_CONFIGURATION,
        index: 0,
        length: 8,
        scope: RibScope::PerController,
        name: "polling_configuration",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::PRIVACY,
        index: 0,
        length: 1,
        scope: RibScope::PerController,
        name: "privacy",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::CONTROLLER_CAPABILITIES,
        index: 0,
        length: 8,
        scope: RibScope::PerController,
        name: "controller_capabilities",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
    AttributeDescriptor {
        identifier: id::IRDB_STATUS,
        index: 0,
        length: 16,
        scope: RibScope::PerController,
        name: "irdb_status",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::GENERAL_PURPOSE,
        index: 0,
        length: 16,
        scope: RibScope::NetworkWide,
        name: "general_purpose/0",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::GENERAL_PURPOSE,
        index: 1,
        length: 16,
        scope: RibScope::NetworkWide,
        name: "general_purpose/1",
        persistable: PERSIST_RIB,
        wire_synchronized: Some(WireSynchronized),
    },
    AttributeDescriptor {
        identifier: id::METRICS,
        index: 0,
        length: 8,
        scope: RibScope::PerController,
        name: "metrics",
        persistable: PERSIST_RIB,
        wire_synchronized: None,
    },
];

/// Look up the descriptor for `(identifier, index)`.
pub fn lookup(identifier: u8, index: u8) -> Option<&'static AttributeDescriptor> {
    DESCRIPTORS
        .iter()
        .find(|d| d.identifier == identifier && d.index == index)
}

/// Scope of an identifier, used by the network worker to route a frame to
/// the shared registry or the per-controller one.
pub fn scope_of(identifier: u8) -> Option<RibScope> {
    DESCRIPTORS.iter().find(|d| d.identifier == identifier).map(|d| d.scope)
}

// ============================================================================
// Entry
// ============================================================================

/// One attribute value held by a registry.
#[derive(Debug, Clone)]
pub struct RibEntry {
    pub desc: &'static AttributeDescriptor,
    value: Vec<u8>,
    /// Set on every accepted write, cleared when the worker persists.
    pub dirty: bool,
}

impl RibEntry {
    fn new(desc: &'static AttributeDescriptor) -> Self {
        RibEntry { desc, value: vec![0u8; desc.length as usize], dirty: false }
    }

    /// Copy the value into `buf`; returns bytes written, or 0 when `buf` is
    /// smaller than the value (a too-short read request is a rejection).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.len() < self.value.len() {
            return 0;
        }
        buf[..self.value.len()].copy_from_slice(&self.value);
        self.value.len()
    }

    /// Replace the value; returns bytes consumed, or 0 on length mismatch
    /// with no mutation.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.len() != self.value.len() {
            return 0;
        }
        if self.value != data {
            self.value.copy_from_slice(data);
        }
        self.dirty = true;
        data.len()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Who a registry belongs to; determines database keys.
#[derive(Debug, Clone)]
pub enum RibOwner {
    Network,
    Controller(IeeeAddress),
}

impl RibOwner {
    fn key_prefix(&self) -> String {
        match self {
            RibOwner::Network => "net".to_string(),
            RibOwner::Controller(ieee) => ieee.db_key(),
        }
    }
}

/// Outcome of a registry write, describing the effects the worker must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RibWriteOutcome {
    /// Unknown attribute or length mismatch. Nothing was mutated; the wire
    /// response carries achieved length 0.
    Rejected,
    Written {
        /// The stored bytes actually differ from before.
        changed: bool,
        /// Re-export to the remote's NVM (wire-sync capability present and
        /// no import in progress).
        export: bool,
        /// Persist this row (persistable capability present and no import in
        /// progress). `(table, key)`.
        persist: Option<(&'static str, String)>,
    },
}

/// Collection of attribute entries for one scope.
pub struct RibRegistry {
    owner: RibOwner,
    scope: RibScope,
    entries: BTreeMap<(u8, u8), RibEntry>,
    import_in_progress: bool,
}

impl RibRegistry {
    /// Build the per-controller registry for a freshly discovered remote.
    pub fn per_controller(controller_type: ControllerType, ieee: IeeeAddress) -> Self {
        let mut reg = Self::with_scope(RibOwner::Controller(ieee), RibScope::PerController);
        reg.seed_defaults(controller_type);
        reg
    }

    /// Build the shared network-wide registry.
    pub fn network_wide() -> Self {
        Self::with_scope(RibOwner::Network, RibScope::NetworkWide)
    }

    fn with_scope(owner: RibOwner, scope: RibScope) -> Self {
        let entries = DESCRIPTORS
            .iter()
            .filter(|d| d.scope == scope)
            .map(|d| ((d.identifier, d.index), RibEntry::new(d)))
            .collect();
        RibRegistry { owner, scope, entries, import_in_progress: false }
    }

    fn seed_defaults(&mut self, controller_type: ControllerType) {
        let methods = controller_type.polling_methods();
        self.set_local(id::POLLING_METHODS, 0, &[methods.bits()]);
        if methods.supports(PollingMethods::HEARTBEAT) {
            let cfg = PollingConfiguration::default();
            self.set_local(id::POLLING_CONFIGURATION, 0, &cfg.encode());
        }
        // Defaults are construction state, not pending work.
        for entry in self.entries.values_mut() {
            entry.dirty = false;
        }
    }

    pub fn scope(&self) -> RibScope {
        self.scope
    }

    /// Database key for one entry of this registry.
    pub fn db_key(&self, identifier: u8, index: u8) -> String {
        format!("{}/{:02x}/{:02x}", self.owner.key_prefix(), identifier, index)
    }

    /// Database key prefix covering every row of this registry.
    pub fn db_key_prefix(&self) -> String {
        format!("{}/", self.owner.key_prefix())
    }

    /// Read an attribute into `buf`. Returns bytes written; 0 means unknown
    /// attribute or a too-short request, which the caller acknowledges as a
    /// failure on the wire.
    pub fn read(&self, identifier: u8, index: u8, buf: &mut [u8]) -> usize {
        match self.entries.get(&(identifier, index)) {
            Some(entry) => entry.read(buf),
            None => 0,
        }
    }

    /// Current value of an attribute, for local policy decisions.
    pub fn value(&self, identifier: u8, index: u8) -> Option<&[u8]> {
        self.entries.get(&(identifier, index)).map(|e| e.value())
    }

    /// Write an attribute. Length must equal the declared length exactly;
    /// anything else is a rejection with no mutation.
    pub fn write(&mut self, identifier: u8, index: u8, data: &[u8]) -> RibWriteOutcome {
        let Some(entry) = self.entries.get_mut(&(identifier, index)) else {
            warn!(
                identifier = format_args!("{:#04x}", identifier),
                index, "rib write to unknown attribute rejected"
            );
            return RibWriteOutcome::Rejected;
        };
        if data.len() != entry.desc.length as usize {
            warn!(
                attribute = entry.desc.name,
                expected = entry.desc.length,
                got = data.len(),
                "rib write length mismatch rejected"
            );
            return RibWriteOutcome::Rejected;
        }
        let desc = entry.desc;
        let changed = entry.value() != data;
        entry.write(data);

        let export = !self.import_in_progress && desc.wire_synchronized.is_some();
        let persist = if self.import_in_progress {
            None
        } else {
            desc.persistable
                .map(|p| (p.table, self.db_key(identifier, index)))
        };
        RibWriteOutcome::Written { changed, export, persist }
    }

    /// Write driven by local policy rather than an inbound frame. Same
    /// precondition and effects as [`RibRegistry::write`].
    pub fn set_local(&mut self, identifier: u8, index: u8, data: &[u8]) -> RibWriteOutcome {
        self.write(identifier, index, data)
    }

    /// Suppress export/persist effects while loading persisted state, so a
    /// stale value is never echoed back to the remote.
    pub fn begin_import(&mut self) {
        self.import_in_progress = true;
    }

    pub fn end_import(&mut self) {
        self.import_in_progress = false;
    }

    /// Load one persisted row during import. Length mismatches are dropped
    /// with a warning (schema drift), never partially applied.
    pub fn load_row(&mut self, identifier: u8, index: u8, data: &[u8]) {
        debug_assert!(self.import_in_progress);
        match self.entries.get_mut(&(identifier, index)) {
            Some(entry) if data.len() == entry.desc.length as usize => {
                entry.write(data);
                entry.dirty = false;
            }
            Some(entry) => {
                warn!(
                    attribute = entry.desc.name,
                    expected = entry.desc.length,
                    got = data.len(),
                    "persisted rib row has wrong length, dropped"
                );
            }
            None => {
                warn!(
                    identifier = format_args!("{:#04x}", identifier),
                    index, "persisted rib row for unknown attribute, dropped"
                );
            }
        }
    }

    /// Every persistable row as `(table, key, value)`, for the snapshot
    /// stored when a controller first validates.
    pub fn snapshot(&self) -> Vec<(&'static str, String, Vec<u8>)> {
        self.entries
            .values()
            .filter_map(|e| {
                e.desc.persistable.map(|p| {
                    (
                        p.table,
                        self.db_key(e.desc.identifier, e.desc.index),
                        e.value().to_vec(),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_registry() -> RibRegistry {
        RibRegistry::per_controller(
            ControllerType::Xr15,
            IeeeAddress::new(0x00124B00_11223344),
        )
    }

    #[test]
    fn descriptor_addresses_unique_within_scope() {
        for (i, a) in DESCRIPTORS.iter().enumerate() {
            for b in &DESCRIPTORS[i + 1..] {
                assert!(
                    !(a.identifier == b.identifier && a.index == b.index && a.scope == b.scope),
                    "duplicate descriptor {:#04x}/{}",
                    a.identifier,
                    a.index
                );
            }
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut reg = controller_registry();
        let data = [0xA5u8; 16];
        let outcome = reg.write(id::IRDB_STATUS, 0, &data);
        assert!(matches!(outcome, RibWriteOutcome::Written { changed: true, .. }));

        let mut buf = [0u8; 32];
        let n = reg.read(id::IRDB_STATUS, 0, &mut buf);
        assert_eq!(n, 16);
        assert_eq!(&buf[..16], &data);
    }

    #[test]
    fn wrong_length_write_is_total_rejection() {
        let mut reg = controller_registry();
        let before = reg.value(id::IRDB_STATUS, 0).unwrap().to_vec();

        // Declared length is 16; an 8-byte write must change nothing.
        let outcome = reg.write(id::IRDB_STATUS, 0, &[1u8; 8]);
        assert_eq!(outcome, RibWriteOutcome::Rejected);
        assert_eq!(reg.value(id::IRDB_STATUS, 0).unwrap(), &before[..]);
    }

    #[test]
    fn dispatch_keys_on_identifier_and_index() {
        let mut reg = controller_registry();
        reg.write(id::VERSIONING, versioning_index::SOFTWARE, &[2, 0, 1, 5]);
        reg.write(id::VERSIONING, versioning_index::IRDB, &[9, 9, 0, 0]);

        assert_eq!(reg.value(id::VERSIONING, versioning_index::SOFTWARE).unwrap(), &[2, 0, 1, 5]);
        assert_eq!(reg.value(id::VERSIONING, versioning_index::HARDWARE).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(reg.value(id::VERSIONING, versioning_index::IRDB).unwrap(), &[9, 9, 0, 0]);
    }

    #[test]
    fn unchanged_write_reports_no_change_but_still_exports() {
        let mut reg = controller_registry();
        let data = [0x01u8; 1];
        reg.write(id::PRIVACY, 0, &data);
        let outcome = reg.write(id::PRIVACY, 0, &data);
        match outcome {
            RibWriteOutcome::Written { changed, export, persist } => {
                assert!(!changed);
                assert!(export);
                assert!(persist.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn import_suppresses_export_and_persist() {
        let mut reg = controller_registry();
        reg.begin_import();
        let outcome = reg.write(id::PRIVACY, 0, &[1]);
        assert_eq!(
            outcome,
            RibWriteOutcome::Written { changed: true, export: false, persist: None }
        );
        reg.end_import();

        let outcome = reg.write(id::PRIVACY, 0, &[0]);
        assert!(matches!(outcome, RibWriteOutcome::Written { export: true, .. }));
    }

    #[test]
    fn network_registry_only_holds_network_scope() {
        let reg = RibRegistry::network_wide();
        assert!(reg.value(id::GENERAL_PURPOSE, 0).is_some());
        assert!(reg.value(id::PRIVACY, 0).is_none());
        assert_eq!(reg.db_key(id::GENERAL_PURPOSE, 1), "net/11/01");
    }

    #[test]
    fn defaults_seeded_for_heartbeat_types() {
        let reg = controller_registry();
        let cfg = PollingConfiguration::decode(reg.value(id::POLLING_CONFIGURATION, 0).unwrap())
            .unwrap();
        assert_eq!(cfg, PollingConfiguration::default());
        assert_eq!(reg.value(id::POLLING_METHODS, 0).unwrap(), &[PollingMethods::HEARTBEAT.bits()]);
    }

    #[test]
    fn too_short_read_buffer_rejected() {
        let reg = controller_registry();
        let mut buf = [0u8; 4];
        assert_eq!(reg.read(id::IRDB_STATUS, 0, &mut buf), 0);
    }
}
