/// Application name
pub const APP_NAME: &str = "Deskline";

/// Field holding the rendered `table:key` identity of every record
pub const ID_FIELD: &str = "id";

/// Field holding the RFC 3339 creation timestamp of every record
pub const CREATED_AT_FIELD: &str = "created_at";

/// Joined customer name attached to chat rows
pub const CUSTOMER_NAME_FIELD: &str = "customer_name";

/// Number of admins shown in the top-admin ranking
pub const TOP_ADMINS_LIMIT: usize = 5;

/// Number of most recent chat rooms scanned for the daily chart
pub const CHART_SCAN_LIMIT: u32 = 100;

/// Number of days shown in the daily chart
pub const CHART_DAYS: usize = 5;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the authenticated actor's id
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Header carrying the authenticated actor's role claim
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
