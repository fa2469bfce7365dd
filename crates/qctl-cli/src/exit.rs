// Exit codes for scripted callers; 2 is left to clap usage errors
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_NOT_FOUND: i32 = 4;
