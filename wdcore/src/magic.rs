/// Name of the environment variable containing the path to the analysis configuration file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/warden/analysis.toml` or `$HOME/.config/warden/analysis.toml`
///  (2) on Windows: `%APPDATA%\warden\analysis.toml`
pub const ENV_ANALYSIS_CONFIG_PATH: &str = "WARDEN_CONFIG_PATH";

/// Maximum number of rule applications spent on a single obligation.
pub const DEFAULT_RULE_BUDGET: u32 = 64;

/// How many rounds of equality substitution the prover attempts.
pub const DEFAULT_SUBSTITUTION_DEPTH: u32 = 2;

/// Longest chain of relational facts followed by the prover.
pub const DEFAULT_RELATION_DEPTH: u32 = 4;

/// Number of times a loop header may be revisited before giving up.
pub const DEFAULT_LOOP_ITERATION_CAP: u32 = 8;

/// Deepest expression tree accepted by the checker.
pub const DEFAULT_MAX_EXPR_DEPTH: usize = 64;

/// Status reported when a read hits the end of a closed input.
pub const STATUS_UNEXPECTED_EOF: &str = "unexpected end of input";

/// Status reported when a continuation is resumed by a different function.
pub const STATUS_INTERLEAVED_CALLS: &str = "interleaved coroutine calls";

/// Bounds of a single byte transferred by `read_u8` / `write_u8`.
pub const BYTE_MIN: i64 = 0;
pub const BYTE_MAX: i64 = 255;
