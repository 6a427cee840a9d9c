//! Error model: packed diagnostic codes, recoverable errors, and invariants.
//!
//! Two disjoint failure modes, never mixed:
//!
//! - **Recoverable errors** ([`AllocError`]) mark environmental failures
//!   such as an exhausted reservation or a refused permission change. They
//!   are returned by value, propagate with `?`, and are never logged by the
//!   library.
//! - **Invariant violations** mark caller bugs: a zero size, an alignment
//!   that is not a power of two, an unwind on an empty checkpoint stack. The
//!   [`invariant!`](crate::invariant) family writes a diagnostic record to
//!   stderr (and appends a JSONL record to the file named by `LOG_FILE`,
//!   when set) and panics. Invariants are never caught.
//!
//! Diagnostics carry a packed 16-bit code (domain 4 bits, code 8 bits,
//! severity 4 bits) with zero reserved for success. The packing is a
//! diagnostic and ABI encoding only; Rust callers see the [`AllocError`]
//! variants.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Packed code
// ---------------------------------------------------------------------------

/// Packed 16-bit diagnostic code: `domain << 12 | code << 4 | severity`.
pub type Code = u16;

/// Subsystem a diagnostic code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    None = 0,
    Memory = 1,
    State = 2,
    Value = 3,
}

/// How severe a diagnostic code is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success = 0,
    Warning = 1,
    Failure = 2,
    Fatal = 3,
}

const DOMAIN_SHIFT: u16 = 12;
const CODE_SHIFT: u16 = 4;
const DOMAIN_MASK: u16 = 0x0F;
const CODE_MASK: u16 = 0xFF;
const SEVERITY_MASK: u16 = 0x0F;

/// Pack a domain, severity, and 8-bit code into a [`Code`].
#[must_use]
pub const fn pack(domain: Domain, severity: Severity, code: u8) -> Code {
    ((domain as Code) << DOMAIN_SHIFT) | ((code as Code) << CODE_SHIFT) | severity as Code
}

/// The reserved success value.
pub const SUCCESS: Code = 0;

/// Null pointer handed to an operation that requires a live handle.
pub const INV_NULL_POINTER: Code = pack(Domain::Memory, Severity::Fatal, 0x01);
/// A size or capacity that must be positive was zero.
pub const INV_ZERO_SIZE: Code = pack(Domain::Memory, Severity::Fatal, 0x02);
/// Alignment was not a power of two.
pub const INV_BAD_ALIGNMENT: Code = pack(Domain::Memory, Severity::Fatal, 0x03);
/// An operation was issued in a state that forbids it.
pub const INV_INVALID_STATE: Code = pack(Domain::State, Severity::Fatal, 0x01);
/// A value fell outside its documented range.
pub const INV_OUT_OF_RANGE: Code = pack(Domain::Value, Severity::Fatal, 0x01);
/// A precondition that is not covered by a more specific code failed.
pub const INV_PRECONDITION: Code = pack(Domain::State, Severity::Fatal, 0x02);

/// Reservation or commit ran out of backing memory.
pub const ERR_OUT_OF_MEMORY: Code = pack(Domain::Memory, Severity::Failure, 0x10);
/// `mprotect` refused a permission change.
pub const ERR_MEMORY_PERMISSION_CHANGE: Code = pack(Domain::Memory, Severity::Failure, 0x20);
/// `munmap` refused to release a mapping.
pub const ERR_MEMORY_DEALLOCATION: Code = pack(Domain::Memory, Severity::Failure, 0x30);
/// The checkpoint stack is at its maximum depth.
pub const ERR_STACK_OVERFLOW: Code = pack(Domain::Memory, Severity::Failure, 0x40);

/// Domain bits of a packed code.
#[must_use]
pub const fn domain(value: Code) -> Domain {
    match (value >> DOMAIN_SHIFT) & DOMAIN_MASK {
        1 => Domain::Memory,
        2 => Domain::State,
        3 => Domain::Value,
        _ => Domain::None,
    }
}

/// Severity bits of a packed code.
#[must_use]
pub const fn severity(value: Code) -> Severity {
    match value & SEVERITY_MASK {
        1 => Severity::Warning,
        2 => Severity::Failure,
        3 => Severity::Fatal,
        _ => Severity::Success,
    }
}

/// Code bits of a packed code.
#[must_use]
pub const fn code(value: Code) -> u8 {
    ((value >> CODE_SHIFT) & CODE_MASK) as u8
}

// ---------------------------------------------------------------------------
// Message table
// ---------------------------------------------------------------------------

struct Descriptor {
    value: Code,
    message: &'static str,
}

const DESCRIPTORS: [Descriptor; 11] = [
    Descriptor { value: SUCCESS, message: "success" },
    Descriptor { value: INV_NULL_POINTER, message: "null pointer violation" },
    Descriptor { value: INV_ZERO_SIZE, message: "size must be positive" },
    Descriptor { value: INV_BAD_ALIGNMENT, message: "alignment not a power of two" },
    Descriptor { value: INV_INVALID_STATE, message: "invalid state transition" },
    Descriptor { value: INV_OUT_OF_RANGE, message: "value out of valid range" },
    Descriptor { value: INV_PRECONDITION, message: "precondition violation" },
    Descriptor { value: ERR_OUT_OF_MEMORY, message: "memory allocation failed" },
    Descriptor {
        value: ERR_MEMORY_PERMISSION_CHANGE,
        message: "failed to change permissions on a reserved range",
    },
    Descriptor {
        value: ERR_MEMORY_DEALLOCATION,
        message: "failed to release a memory mapping",
    },
    Descriptor {
        value: ERR_STACK_OVERFLOW,
        message: "checkpoint stack exceeded its maximum depth",
    },
];

/// Human-readable message for a packed code.
///
/// Unknown codes fall back on a severity-based generic.
#[must_use]
pub fn message(value: Code) -> &'static str {
    for descriptor in &DESCRIPTORS {
        if descriptor.value == value {
            return descriptor.message;
        }
    }
    match severity(value) {
        Severity::Fatal => "unknown invariant error",
        Severity::Failure => "unknown runtime error",
        _ => "unknown error",
    }
}

// ---------------------------------------------------------------------------
// Recoverable errors
// ---------------------------------------------------------------------------

/// Environmental failures returned by value.
///
/// Callers inspect and propagate these; the library never panics or logs on
/// their behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The reservation (or its uncommitted remainder) cannot satisfy the
    /// request.
    #[error("memory allocation failed")]
    OutOfMemory,
    /// The kernel refused to change page permissions on a reserved range.
    #[error("failed to change permissions on a reserved range")]
    PermissionChange,
    /// The kernel refused to release a mapping.
    #[error("failed to release a memory mapping")]
    Deallocation,
    /// The checkpoint stack is at its maximum depth.
    #[error("checkpoint stack exceeded its maximum depth")]
    StackOverflow,
}

impl AllocError {
    /// The packed diagnostic code for this error.
    #[must_use]
    pub const fn code(self) -> Code {
        match self {
            AllocError::OutOfMemory => ERR_OUT_OF_MEMORY,
            AllocError::PermissionChange => ERR_MEMORY_PERMISSION_CHANGE,
            AllocError::Deallocation => ERR_MEMORY_DEALLOCATION,
            AllocError::StackOverflow => ERR_STACK_OVERFLOW,
        }
    }

    /// Decode a packed code into the matching variant, if it names one.
    #[must_use]
    pub const fn from_code(value: Code) -> Option<AllocError> {
        match value {
            ERR_OUT_OF_MEMORY => Some(AllocError::OutOfMemory),
            ERR_MEMORY_PERMISSION_CHANGE => Some(AllocError::PermissionChange),
            ERR_MEMORY_DEALLOCATION => Some(AllocError::Deallocation),
            ERR_STACK_OVERFLOW => Some(AllocError::StackOverflow),
            _ => None,
        }
    }
}

/// `Ok(())` when `condition` holds, `Err(err)` otherwise.
#[inline]
pub fn check(condition: bool, err: AllocError) -> Result<(), AllocError> {
    if condition { Ok(()) } else { Err(err) }
}

// ---------------------------------------------------------------------------
// Invariant diagnostics
// ---------------------------------------------------------------------------

/// One JSONL record appended to `LOG_FILE` for each invariant violation.
#[derive(Debug, Serialize)]
struct InvariantRecord<'a> {
    timestamp: String,
    expression: &'a str,
    location: String,
    code: Code,
    domain: Domain,
    severity: Severity,
    message: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    details: &'a str,
}

/// Path named by the `LOG_FILE` environment variable, resolved once.
fn log_file() -> Option<&'static PathBuf> {
    static LOG_FILE: OnceLock<Option<PathBuf>> = OnceLock::new();
    LOG_FILE
        .get_or_init(|| std::env::var_os("LOG_FILE").map(PathBuf::from))
        .as_ref()
}

fn append_record(path: &Path, record: &InvariantRecord<'_>) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")
}

/// Approximate UTC timestamp without an external clock dependency.
fn timestamp() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86_400 + 1,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
        millis,
    )
}

/// Emit the diagnostic for a failed invariant and panic.
///
/// Called by the `invariant!` macros; not intended for direct use.
#[cold]
#[inline(never)]
pub fn invariant_failure(
    expression: &str,
    file: &str,
    line: u32,
    value: Code,
    details: fmt::Arguments<'_>,
) -> ! {
    let details = details.to_string();
    let record = InvariantRecord {
        timestamp: timestamp(),
        expression,
        location: format!("{file}:{line}"),
        code: value,
        domain: domain(value),
        severity: severity(value),
        message: message(value),
        details: &details,
    };

    {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "\n*** INVARIANT VIOLATION ***");
        let _ = writeln!(err, "Expression: {expression}");
        let _ = writeln!(err, "Location: {file}:{line}");
        let _ = writeln!(
            err,
            "Error: [{:?}:{:02X}] {}",
            record.domain,
            code(value),
            record.message
        );
        if !details.is_empty() {
            let _ = writeln!(err, "Details: {details}");
        }
    }

    if let Some(path) = log_file() {
        let _ = append_record(path, &record);
    }

    if details.is_empty() {
        panic!("invariant violation: {}", record.message);
    }
    panic!("invariant violation: {} ({details})", record.message);
}

/// Panics with a diagnostic when `$cond` is false.
///
/// `$value` is the packed [`Code`](crate::error::Code) to report; an optional
/// format string and arguments add detail to the record.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $value:expr) => {
        if !$cond {
            $crate::error::invariant_failure(
                stringify!($cond),
                file!(),
                line!(),
                $value,
                format_args!(""),
            );
        }
    };
    ($cond:expr, $value:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::invariant_failure(
                stringify!($cond),
                file!(),
                line!(),
                $value,
                format_args!($($arg)+),
            );
        }
    };
}

/// Panics with [`INV_ZERO_SIZE`](crate::error::INV_ZERO_SIZE) when `$val` is
/// not positive.
#[macro_export]
macro_rules! invariant_positive {
    ($val:expr) => {
        $crate::invariant!(
            $val > 0,
            $crate::error::INV_ZERO_SIZE,
            "{} = {}",
            stringify!($val),
            $val
        )
    };
}

/// Panics with [`INV_OUT_OF_RANGE`](crate::error::INV_OUT_OF_RANGE) when
/// `$val` lies outside `[$min, $max]`.
#[macro_export]
macro_rules! invariant_range {
    ($val:expr, $min:expr, $max:expr) => {
        $crate::invariant!(
            $val >= $min && $val <= $max,
            $crate::error::INV_OUT_OF_RANGE,
            "{} = {} not in [{}, {}]",
            stringify!($val),
            $val,
            $min,
            $max
        )
    };
}
