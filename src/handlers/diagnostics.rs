use crate::models::{DiagnosticsResponse, RoomDiagnostics};
use crate::state::AppState;
use crate::ws::Room;
use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

fn room_diagnostics(room: &dyn Room) -> RoomDiagnostics {
    let entries = room.registry().list();
    RoomDiagnostics {
        room: room.kind().to_string(),
        n_conn: entries.len() as u32,
        n_named: entries.iter().filter(|e| e.name.is_some()).count() as u32,
        oldest_conn_secs: room
            .registry()
            .oldest_joined_at()
            .map(|joined| (Utc::now() - joined).num_seconds()),
    }
}

/// Live connection counts and process stats
pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsResponse> {

    let rooms = vec![
        room_diagnostics(&*state.chat),
        room_diagnostics(&*state.echo),
        room_diagnostics(&*state.counter),
    ];
    let n_conn: u32 = rooms.iter().map(|r| r.n_conn).sum();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
    );

    Json(DiagnosticsResponse {
        rooms,
        n_conn,
        counter: state.counter.value(),
        auth_required: state.config.auth_required(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        cpu_usage,
        memory_alloc,
        memory_total,
        memory_free,
    })
}
