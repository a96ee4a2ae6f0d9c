/// Error code registry for forest-batch
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Partitioning errors
/// - 3000-3999: Data read and reader state errors
/// - 4000-4999: Record validation errors
/// - 5000-5999: Projection errors
/// - 6000-6999: Result storage errors
/// - 7000-7999: Fault tolerance errors (skip limit, worker failures)
/// - 8000-8999: Metrics and aggregation errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;
    pub const CONFIG_MISSING_PARAMETER: u16 = 1004;
    pub const CONFIG_INVALID_PROJECTION_PARAMETERS: u16 = 1005;
    pub const CONFIG_INVALID_PATH: u16 = 1006;
    pub const CONFIG_ALREADY_INITIALIZED: u16 = 1007;

    // Partitioning errors (2000-2999)
    pub const PARTITION_GENERIC: u16 = 2000;
    pub const PARTITION_NO_FEATURE_IDS: u16 = 2001;
    pub const PARTITION_IO_ERROR: u16 = 2002;
    pub const PARTITION_INVALID_COUNT: u16 = 2003;
    pub const PARTITION_BASE_DIR_UNSET: u16 = 2004;

    // Data read errors (3000-3999)
    pub const READ_GENERIC: u16 = 3000;
    pub const READ_NOT_OPENED: u16 = 3001;
    pub const READ_OPEN_FAILED: u16 = 3002;
    pub const READ_MISSING_FILE: u16 = 3003;
    pub const READ_IO_ERROR: u16 = 3004;
    pub const READ_MALFORMED_ROW: u16 = 3005;

    // Record validation errors (4000-4999)
    pub const RECORD_GENERIC: u16 = 4000;
    pub const RECORD_BLANK_FEATURE_ID: u16 = 4001;

    // Projection errors (5000-5999)
    pub const PROJECTION_GENERIC: u16 = 5000;
    pub const PROJECTION_TRANSIENT: u16 = 5001;
    pub const PROJECTION_FATAL: u16 = 5002;

    // Result storage errors (6000-6999)
    pub const STORAGE_GENERIC: u16 = 6000;
    pub const STORAGE_IO_ERROR: u16 = 6001;

    // Fault tolerance errors (7000-7999)
    pub const SKIP_LIMIT_EXCEEDED: u16 = 7001;
    pub const WORKER_FAILED: u16 = 7002;
    pub const WORKER_PANICKED: u16 = 7003;

    // Metrics and aggregation errors (8000-8999)
    pub const METRICS_GENERIC: u16 = 8000;
    pub const AGGREGATION_GENERIC: u16 = 8100;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description of an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Invalid value in configuration",
        1004 => "Required job parameter is missing",
        1005 => "Projection parameters are missing or unparseable",
        1006 => "Path does not exist or is not a directory",
        1007 => "Component was already initialized for this step",

        // Partitioning errors
        2000 => "Generic partitioning error",
        2001 => "Polygon input contains no valid feature ids",
        2002 => "I/O failure while splitting input into partitions",
        2003 => "Requested partition count is invalid",
        2004 => "Job base directory was not set before partitioning",

        // Data read errors
        3000 => "Generic data read error",
        3001 => "Reader was used before it was opened",
        3002 => "Reader failed to open",
        3003 => "Required partition input file is missing",
        3004 => "I/O failure while reading partition input",
        3005 => "Malformed CSV row",

        // Record validation errors
        4000 => "Generic record validation error",
        4001 => "Record has a blank feature id",

        // Projection errors
        5000 => "Generic projection error",
        5001 => "Transient projection failure",
        5002 => "Fatal projection failure",

        // Result storage errors
        6000 => "Generic result storage error",
        6001 => "I/O failure while writing partition results",

        // Fault tolerance errors
        7001 => "Skip limit exceeded",
        7002 => "Partition worker failed",
        7003 => "Partition worker panicked",

        // Metrics and aggregation errors
        8000 => "Metrics collector error",
        8100 => "Result aggregation error",

        9000 => "Unknown error",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_codes() {
        assert_eq!(
            describe_error_code(ErrorCode::READ_NOT_OPENED),
            "Reader was used before it was opened"
        );
        assert_eq!(
            describe_error_code(ErrorCode::SKIP_LIMIT_EXCEEDED),
            "Skip limit exceeded"
        );
    }

    #[test]
    fn test_describe_unknown_code() {
        assert_eq!(describe_error_code(4242), "Unknown error code");
    }
}
