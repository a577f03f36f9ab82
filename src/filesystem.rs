/// Filesystem record builder: parse the `mmparam <fs>` dump of one QStar
/// cache filesystem into a filesystem record and its replica records.
///
/// The dump is an unordered bag of `Label: value` lines. Page size and
/// replica count are needed before anything else can be interpreted, so the
/// text is scanned twice: once for those two, once for everything else.
use crate::matchers::{self, NoMatch};
use crate::replica::{self, ReplicaRecord};
use serde::Serialize;

/// Cache filesystem metrics.
///
/// Page counts are mirrored in bytes using the filesystem page size.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilesystemRecord {
    pub name: String,
    pub page_size: i64,
    pub replicas: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_number_of_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_number_of_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_primary_capacity_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_primary_capacity_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_primary_capacity_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_primary_capacity_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_reserved_capacity_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_reserved_capacity_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_priority_period: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetching_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_prefetching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_throttling: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_keep_in_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_in_cache: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_since_mount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_since_mount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_in_cache: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directories: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_delayed_events: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_write_access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archiving: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<i64>,
}

/// Result of parsing one filesystem dump.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemReport {
    pub filesystem: FilesystemRecord,
    pub replicas: Vec<ReplicaRecord>,
}

/// Errors that abort the extraction of a filesystem.
#[derive(Debug)]
pub enum FilesystemError {
    /// A label was present but its value did not parse.
    Malformed {
        field: &'static str,
        source: NoMatch,
    },
    /// Page size or replica count absent (or page size zero).
    MissingRequired { field: &'static str },
    /// A replica header referenced an index beyond the declared count.
    ReplicaOutOfRange { index: String, declared: usize },
}

impl std::fmt::Display for FilesystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemError::Malformed { field, source } => {
                write!(f, "failed to read `{field}` ({source})")
            }
            FilesystemError::MissingRequired { field } => {
                write!(f, "missing required `{field}`")
            }
            FilesystemError::ReplicaOutOfRange { index, declared } => {
                write!(
                    f,
                    "replica {index} out of range ({declared} replicas declared)"
                )
            }
        }
    }
}

impl std::error::Error for FilesystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilesystemError::Malformed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One row of a label dispatch table.
///
/// `apply` receives the trimmed line and the filesystem page size. When it
/// fails, a `required` rule aborts the filesystem; otherwise the field is
/// left unset.
pub struct FieldRule<T> {
    pub label: &'static str,
    pub field: &'static str,
    pub required: bool,
    pub apply: fn(&mut T, &str, i64) -> Result<(), NoMatch>,
}

impl<T> FieldRule<T> {
    /// Returns `Ok(true)` when this rule's label starts the line.
    fn try_apply(
        &self,
        target: &mut T,
        line: &str,
        page_size: i64,
    ) -> Result<bool, FilesystemError> {
        if !line.starts_with(self.label) {
            return Ok(false);
        }
        if let Err(source) = (self.apply)(target, line, page_size) {
            if self.required {
                return Err(FilesystemError::Malformed {
                    field: self.field,
                    source,
                });
            }
            tracing::debug!(field = self.field, error = %source, "optional field omitted");
        }
        Ok(true)
    }
}

/// Apply the first rule whose label starts `line`.
pub(crate) fn apply_first<T>(
    rules: &[FieldRule<T>],
    target: &mut T,
    line: &str,
    page_size: i64,
) -> Result<bool, FilesystemError> {
    for rule in rules {
        if rule.try_apply(target, line, page_size)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Page count plus its size in bytes.
fn paged(line: &str, page_size: i64) -> Result<(i64, i64), NoMatch> {
    let pages = matchers::pages(line)?;
    Ok((pages, pages.saturating_mul(page_size)))
}

static FILESYSTEM_RULES: &[FieldRule<FilesystemRecord>] = &[
    FieldRule {
        label: "Cache root:",
        field: "cache_root",
        required: true,
        apply: |fs, line, _| {
            fs.cache_root = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Mount point:",
        field: "mount_point",
        required: true,
        apply: |fs, line, _| {
            fs.mount_point = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Max number of pages:",
        field: "max_number_of_pages",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.max_number_of_pages = Some(pages);
            fs.max_number_of_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Low primary capacity:",
        field: "low_primary_capacity",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.low_primary_capacity_pages = Some(pages);
            fs.low_primary_capacity_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "High primary capacity:",
        field: "high_primary_capacity",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.high_primary_capacity_pages = Some(pages);
            fs.high_primary_capacity_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Read reserved capacity:",
        field: "read_reserved_capacity",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.read_reserved_capacity_pages = Some(pages);
            fs.read_reserved_capacity_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Prefetch priority period:",
        field: "prefetch_priority_period",
        required: true,
        apply: |fs, line, _| {
            fs.prefetch_priority_period = Some(matchers::boolean(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Prefetching mode:",
        field: "prefetching_mode",
        required: true,
        apply: |fs, line, _| {
            fs.prefetching_mode = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Cold prefetching:",
        field: "cold_prefetching",
        required: true,
        apply: |fs, line, _| {
            fs.cold_prefetching = Some(matchers::boolean(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Cache write throttling:",
        field: "cache_write_throttling",
        required: true,
        apply: |fs, line, _| {
            fs.cache_write_throttling = Some(matchers::boolean(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Automatic keep in cache:",
        field: "automatic_keep_in_cache",
        required: true,
        apply: |fs, line, _| {
            fs.automatic_keep_in_cache = Some(matchers::boolean(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Present pages:",
        field: "present_pages",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.present_pages = Some(pages);
            fs.present_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Primary pages:",
        field: "primary_pages",
        required: true,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.primary_pages = Some(pages);
            fs.primary_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Replicated pages:",
        field: "replicated_pages",
        required: false,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.replicated_pages = Some(pages);
            fs.replicated_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Archived pages:",
        field: "archived_pages",
        required: false,
        apply: |fs, line, page_size| {
            let (pages, bytes) = paged(line, page_size)?;
            fs.archived_pages = Some(pages);
            fs.archived_bytes = Some(bytes);
            Ok(())
        },
    },
    FieldRule {
        label: "Keep in cache:",
        field: "keep_in_cache",
        required: true,
        apply: |fs, line, _| {
            fs.keep_in_cache = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Archived since mount:",
        field: "archived_since_mount",
        required: false,
        apply: |fs, line, _| {
            fs.archived_since_mount = Some(matchers::byte_size(line)?.1);
            Ok(())
        },
    },
    FieldRule {
        label: "Replicated since mount:",
        field: "replicated_since_mount",
        required: false,
        apply: |fs, line, _| {
            fs.replicated_since_mount = Some(matchers::byte_size(line)?.1);
            Ok(())
        },
    },
    FieldRule {
        label: "Files in cache:",
        field: "files_in_cache",
        required: true,
        apply: |fs, line, _| {
            fs.files_in_cache = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Directories:",
        field: "directories",
        required: true,
        apply: |fs, line, _| {
            fs.directories = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Streams:",
        field: "streams",
        required: true,
        apply: |fs, line, _| {
            fs.streams = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Number of delayed events:",
        field: "number_of_delayed_events",
        required: true,
        apply: |fs, line, _| {
            fs.number_of_delayed_events = Some(matchers::integer(line)?);
            Ok(())
        },
    },
    FieldRule {
        label: "Read/write access:",
        field: "read_write_access",
        required: true,
        apply: |fs, line, _| {
            fs.read_write_access = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
    FieldRule {
        label: "Archiving:",
        field: "archiving",
        required: true,
        apply: |fs, line, _| {
            fs.archiving = Some(matchers::text(line)?.to_string());
            Ok(())
        },
    },
];

/// Page size and replica count, found anywhere in the dump.
fn scan_header(text: &str) -> Result<(i64, i64), FilesystemError> {
    let mut page_size = None;
    let mut replicas = None;

    for line in text.lines().map(str::trim) {
        if line.starts_with("Page size:") {
            let (_, bytes) = matchers::byte_size(line).map_err(|source| {
                FilesystemError::Malformed {
                    field: "page_size",
                    source,
                }
            })?;
            page_size = Some(bytes);
        } else if line.starts_with("Replicas:") {
            let count = matchers::integer(line).map_err(|source| FilesystemError::Malformed {
                field: "replicas",
                source,
            })?;
            replicas = Some(count);
        }
    }

    let page_size = page_size
        .filter(|size| *size > 0)
        .ok_or(FilesystemError::MissingRequired { field: "page_size" })?;
    let replicas = replicas.ok_or(FilesystemError::MissingRequired { field: "replicas" })?;
    Ok((page_size, replicas))
}

/// Parse the dump of filesystem `name`.
pub fn parse_filesystem(name: &str, text: &str) -> Result<FilesystemReport, FilesystemError> {
    let (page_size, replica_count) = scan_header(text)?;

    let mut filesystem = FilesystemRecord {
        name: name.to_string(),
        page_size,
        replicas: replica_count,
        ..Default::default()
    };
    let count = usize::try_from(replica_count).map_err(|_| FilesystemError::MissingRequired {
        field: "replicas",
    })?;
    let mut replicas = replica::allocate(name, count);
    let mut current: Option<usize> = None;

    for line in text.lines().map(str::trim) {
        if apply_first(FILESYSTEM_RULES, &mut filesystem, line, page_size)? {
            continue;
        }

        if let Some(index) = replica::apply_header_line(&mut replicas, line)? {
            current = Some(index);
            continue;
        }

        // Lines before the first replica header are not replica details.
        let Some(index) = current else {
            continue;
        };
        apply_first(replica::DETAIL_RULES, &mut replicas[index], line, page_size)?;
    }

    if let (Some(max), Some(present)) = (filesystem.max_number_of_pages, filesystem.present_pages)
    {
        let free = max - present;
        if free >= 0 {
            filesystem.free_pages = Some(free);
            filesystem.free_bytes = Some(free.saturating_mul(page_size));
        }
    }

    Ok(FilesystemReport {
        filesystem,
        replicas,
    })
}
