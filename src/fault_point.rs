//! Fault injection for restore and backup paths
//!
//! A `FaultInjector` names at most one point at which the next pass turns
//! into an I/O error. Unlike a crash, the error travels the normal error
//! path, so tests can observe that reopen and cleanup still run.
//!
//! The binary reads the point from `INVOICE_VAULT_FAULT_POINT`; tests build
//! an injector directly with [`FaultInjector::at`].
//!
//! ```ignore
//! faults.check(points::SWAP_AFTER_SNAPSHOT)?;
//! ```

use std::io;

/// Environment variable consulted by [`FaultInjector::from_env`].
pub const FAULT_POINT_ENV: &str = "INVOICE_VAULT_FAULT_POINT";

#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    point: Option<String>,
}

impl FaultInjector {
    /// No fault ever fires.
    pub fn disabled() -> Self {
        Self { point: None }
    }

    /// Fire at the named point.
    pub fn at(name: &str) -> Self {
        Self {
            point: Some(name.to_string()),
        }
    }

    pub fn from_env() -> Self {
        Self {
            point: std::env::var(FAULT_POINT_ENV).ok().filter(|p| !p.is_empty()),
        }
    }

    #[inline]
    pub fn enabled(&self, name: &str) -> bool {
        self.point.as_deref() == Some(name)
    }

    /// Returns an error if the named point is armed.
    #[inline]
    pub fn check(&self, name: &str) -> io::Result<()> {
        if self.enabled(name) {
            tracing::warn!(point = name, "injected fault");
            return Err(io::Error::other(format!("injected fault at {}", name)));
        }
        Ok(())
    }
}

/// All defined fault point names
pub mod points {
    // Swap controller
    pub const SWAP_AFTER_QUIESCE: &str = "swap_after_quiesce";
    pub const SWAP_AFTER_SNAPSHOT: &str = "swap_after_snapshot";
    pub const SWAP_DURING_INSTALL: &str = "swap_during_install";
    pub const SWAP_BEFORE_RENAME: &str = "swap_before_rename";
    pub const UPLOADS_AFTER_PRESERVE: &str = "uploads_after_preserve";
    pub const UPLOADS_AFTER_CLEAR: &str = "uploads_after_clear";

    // Archive builder
    pub const ARCHIVE_AFTER_FIRST_ENTRY: &str = "archive_after_first_entry";

    /// Get all fault point names
    pub fn all() -> &'static [&'static str] {
        &[
            SWAP_AFTER_QUIESCE,
            SWAP_AFTER_SNAPSHOT,
            SWAP_DURING_INSTALL,
            SWAP_BEFORE_RENAME,
            UPLOADS_AFTER_PRESERVE,
            UPLOADS_AFTER_CLEAR,
            ARCHIVE_AFTER_FIRST_ENTRY,
        ]
    }
}
