/// Replica records of a QStar cache filesystem.
///
/// A filesystem declares its replica count up front (`Replicas: N`); the
/// records are pre-allocated from that count and filled in as `Replica <i>:`
/// headers and their detail lines are scanned.
use crate::filesystem::{FieldRule, FilesystemError};
use crate::matchers;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static REPLICA_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Replica\s(\d+)\s*:(.*)$").unwrap());

/// One storage replica of a cache filesystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicaRecord {
    pub name: String,
    pub replica: String,
    pub filesystem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_integral_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_drive_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extent_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_pool_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space_on_current_partition: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
}

impl ReplicaRecord {
    /// Empty record for replica `index` of `filesystem`.
    pub fn new(filesystem: &str, index: usize) -> Self {
        Self {
            name: format!("{filesystem}-replica-{index}"),
            replica: format!("Replica {index}"),
            filesystem: filesystem.to_string(),
            key: None,
            location: None,
            share: None,
            local_integral_volume: None,
            online: None,
            in_sync: None,
            read: None,
            migrator: None,
            medium_drive_type: None,
            extent_size: None,
            write_pool_count: None,
            last_write_on: None,
            free_space_on_current_partition: None,
            compression: None,
        }
    }

    /// Apply the attribute clause of a `Replica <i>: key, attr, attr` header.
    ///
    /// The first attribute is the replica key. `online`, `read` and `in sync`
    /// are status markers; a missing marker means false.
    fn apply_header(&mut self, clause: &str) {
        let attrs: Vec<&str> = clause.split(',').map(str::trim).collect();

        if let Some(key) = attrs.first().filter(|k| !k.is_empty()) {
            self.key = Some(key.to_string());
            let parts: Vec<&str> = key.split('-').collect();
            // Other key shapes are left undecomposed.
            match parts.as_slice() {
                [location, share, volume] => {
                    self.location = Some(location.to_string());
                    self.share = Some(share.to_string());
                    self.local_integral_volume = Some(volume.to_string());
                }
                [location, volume] => {
                    self.location = Some(location.to_string());
                    self.local_integral_volume = Some(volume.to_string());
                }
                _ => {}
            }
        }

        self.online = Some(attrs.contains(&"online"));
        self.in_sync = Some(attrs.contains(&"in sync"));
        self.read = Some(attrs.contains(&"read"));
    }
}

/// Build the pre-allocated replica records for a filesystem.
pub fn allocate(filesystem: &str, count: usize) -> Vec<ReplicaRecord> {
    (0..count)
        .map(|index| ReplicaRecord::new(filesystem, index))
        .collect()
}

/// If `line` is a replica header, apply it and return the selected index.
///
/// An index outside the pre-allocated range is an error: the declared
/// replica count disagrees with the headers in the dump.
pub fn apply_header_line(
    replicas: &mut [ReplicaRecord],
    line: &str,
) -> Result<Option<usize>, FilesystemError> {
    let Some(caps) = REPLICA_HEADER.captures(line) else {
        return Ok(None);
    };

    let declared = replicas.len();
    let index = caps[1]
        .parse::<usize>()
        .ok()
        .filter(|i| *i < declared)
        .ok_or_else(|| FilesystemError::ReplicaOutOfRange {
            index: caps[1].to_string(),
            declared,
        })?;

    replicas[index].apply_header(&caps[2]);
    Ok(Some(index))
}

/// Detail lines attached to the most recent replica header.
pub static DETAIL_RULES: &[FieldRule<ReplicaRecord>] = &[
    FieldRule {
        label: "Migrator:",
        field: "migrator",
        required: true,
        apply: |r, line, _| {
            r.migrator = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Medium drive type:",
        field: "medium_drive_type",
        required: true,
        apply: |r, line, _| {
            r.medium_drive_type = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Extent size:",
        field: "extent_size",
        required: true,
        apply: |r, line, _| {
            r.extent_size = Some(matchers::byte_size(line)?.1);
            Ok(())
        },
    },
    FieldRule {
        label: "Write pool count:",
        field: "write_pool_count",
        required: true,
        apply: |r, line, _| {
            r.write_pool_count = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Last write on:",
        field: "last_write_on",
        required: true,
        apply: |r, line, _| {
            r.last_write_on = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Free space on current partition:",
        field: "free_space_on_current_partition",
        required: true,
        apply: |r, line, _| {
            r.free_space_on_current_partition = Some(matchers::byte_size(line)?.1);
            Ok(())
        },
    },
    FieldRule {
        label: "Compression:",
        field: "compression",
        required: true,
        apply: |r, line, _| {
            r.compression = Some(matchers::boolean(line)?);
            Ok(())
        },
    },
];
