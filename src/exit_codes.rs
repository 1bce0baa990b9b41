pub const SUCCESS: i32 = 0;
pub const START_FAILED: i32 = 1;
pub const CONFIG_ERROR: i32 = 2;
pub const STREAM_STALLED: i32 = 3;
