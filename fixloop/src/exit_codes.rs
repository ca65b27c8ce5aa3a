//! Stable exit codes for `fixloop` commands.

/// Command succeeded, or the run's check passed.
pub const OK: i32 = 0;
/// Invalid config or arguments, probe failure, or any other error.
pub const INVALID: i32 = 1;
/// `fixloop run` used its whole iteration budget without a passing check.
pub const EXHAUSTED: i32 = 2;
/// `fixloop run` stopped early because no strategy applied a fix.
pub const STALLED: i32 = 3;
