/// Application name
pub const APP_NAME: &str = "Amity";

/// Largest history page a single request may return
pub const MAX_PAGE_SIZE: u32 = 200;

/// Smallest history page; a `take` of 0 is bumped to this
pub const MIN_PAGE_SIZE: u32 = 1;

/// Page size used when the client does not pass `take`
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Header carrying the caller id, set by the authenticating gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Per-connection outbound event buffer
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;
