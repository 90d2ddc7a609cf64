use crate::model::Ms;

pub const MAX_TOOLS_PER_TENANT: usize = 100_000;
pub const MAX_RESERVATIONS_PER_TOOL: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_COMMENT_LEN: usize = 4096;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One year.
pub const MAX_RESERVATION_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Compare-and-set attempts on a status write before giving up.
pub const MAX_CAS_RETRIES: usize = 3;
