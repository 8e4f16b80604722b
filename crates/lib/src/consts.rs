//! Crate-wide constants.

/// Application name, used for data/cache directory names.
pub const APP_NAME: &str = "kiln";

/// Length of the truncated hex digest used for build output keys.
pub const OBJ_HASH_PREFIX_LEN: usize = 32;

/// Overrides the content-addressed store root.
pub const STORE_ENV: &str = "KILN_STORE";

/// Path-list of prefix directories searched for build inputs.
pub const INPUT_PATH_ENV: &str = "KILN_INPUT_PATH";

/// Marker written into every published store entry.
pub const COMPLETE_MARKER: &str = ".kiln-complete";

/// January 1, 1980 00:00:00 UTC (ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
