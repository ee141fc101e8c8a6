//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether a torn frame at the end of the journal is cut off during
    /// recovery. When false the database refuses to open instead.
    pub repair_torn_tail: bool,

    /// Largest encoded commit record accepted, in bytes.
    pub max_record_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            repair_torn_tail: true,
            max_record_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether a torn journal tail is repaired on open.
    #[must_use]
    pub const fn repair_torn_tail(mut self, value: bool) -> Self {
        self.repair_torn_tail = value;
        self
    }

    /// Sets the largest accepted commit record.
    #[must_use]
    pub const fn max_record_size(mut self, bytes: u32) -> Self {
        self.max_record_size = bytes;
        self
    }
}
