use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Live connection count for one room
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct RoomDiagnostics {
    pub room: String,
    pub n_conn: u32,
    pub n_named: u32,
    /// Age in seconds of the longest-lived connection
    pub oldest_conn_secs: Option<i64>,
}

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub rooms: Vec<RoomDiagnostics>,
    pub n_conn: u32,
    pub counter: i64,
    pub auth_required: bool,
    pub uptime_secs: i64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
