//! Keyword vocabulary of the collector protocol.

/// Declare a chart.
pub const CHART: &str = "CHART";
/// Declare a dimension on the most recently declared chart.
pub const DIMENSION: &str = "DIMENSION";
/// Open a sample batch on a chart.
pub const BEGIN: &str = "BEGIN";
/// Set a dimension value inside the open batch.
pub const SET: &str = "SET";
/// Commit the open batch.
pub const END: &str = "END";
/// Discard the open batch.
pub const FLUSH: &str = "FLUSH";
/// The plugin requests its own disablement.
pub const DISABLE: &str = "DISABLE";
/// Set a host- or chart-scoped variable.
pub const VARIABLE: &str = "VARIABLE";
/// Stage a host label.
pub const LABEL: &str = "LABEL";
/// Commit staged host labels, replacing the previous set.
pub const OVERWRITE: &str = "OVERWRITE";
/// Stage a chart label.
pub const CLABEL: &str = "CLABEL";
/// Commit staged chart labels.
pub const CLABEL_COMMIT: &str = "CLABEL_COMMIT";
/// Switch the active host.
pub const HOST: &str = "HOST";
/// Announce the sending host's GUID.
pub const GUID: &str = "GUID";
/// Announce a context UUID.
pub const CONTEXT: &str = "CONTEXT";
/// Announce a tombstoned UUID.
pub const TOMBSTONE: &str = "TOMBSTONE";
/// Invoke a named function; fields are transaction id, timeout, name, args.
pub const FUNCTION: &str = "FUNCTION";
/// Open a function result frame; raw lines follow until the end keyword.
pub const FUNCTION_RESULT_BEGIN: &str = "FUNCTION_RESULT_BEGIN";
/// Close a function result frame.
pub const FUNCTION_RESULT_END: &str = "FUNCTION_RESULT_END";

/// Reserved registration name that replaces the session's line source.
pub const HOOK_READ: &str = "_read";
/// Reserved registration name that installs the end-of-stream hook.
pub const HOOK_EOF: &str = "_eof";
/// Reserved registration name that installs the unknown-keyword hook.
pub const HOOK_UNKNOWN: &str = "_unknown";
