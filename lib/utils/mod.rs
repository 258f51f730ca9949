use uuid::Uuid;

pub const DEFAULT_BLOCK_SIZE: usize = 64 << 10;

pub const DEFAULT_REFRESH_PERIOD_MS: i64 = 10000;
pub const DEFAULT_COMMIT_PERIOD_MS: i64 = 1000;

pub const DEFAULT_METADATA_KEY: &str = "_directory_metadata_";
pub const DEFAULT_TABLE_METADATA: &str = "directory_metadata";
pub const DEFAULT_TABLE_FILEDATA: &str = "filedata";

pub const fn is_power_of2(size: u64) -> bool {
    (size > 0) && (size & (size - 1)) == 0
}

pub const fn align_up(size: u64, align: u64) -> u64 {
    size.div_ceil(align) * align
}

/// number of `block_size` blocks needed to hold `size` bytes
pub const fn blocks_for(size: u64, block_size: u64) -> u64 {
    size.div_ceil(block_size)
}

/// a fresh 128-bit id rendered as lowercase hex
pub fn next_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// ids are compared case-insensitively by lowering them once on the way in
pub fn canonical_id(id: &str) -> String {
    id.trim().to_lowercase()
}
