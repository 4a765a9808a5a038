use crate::assistants::{self, StaffingSummary};
use crate::classrooms::{self, AllocationSummary};
use crate::error::PlanError;
use crate::store::Store;
use crate::timetable::{self, TimetableSummary};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::{Arc, Mutex};

/// Shared store behind the HTTP surface. Each solver run holds the lock for
/// its whole batch, which also keeps two runs over the same scope from
/// interleaving their delete-then-insert writes.
#[derive(Clone, Default)]
pub struct AppState {
    store: Arc<Mutex<Store>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearScope {
    year_id: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeriodScope {
    period_id: u32,
}

fn reject(err: PlanError) -> (StatusCode, String) {
    let status = match &err {
        PlanError::NotFound(_) => StatusCode::NOT_FOUND,
        PlanError::Solver(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, err.to_string())
}

async fn put_dataset(
    State(state): State<AppState>,
    Json(snapshot): Json<Store>,
) -> Result<StatusCode, (StatusCode, String)> {
    snapshot.validate().map_err(reject)?;
    *state.store.lock().unwrap() = snapshot;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_dataset(State(state): State<AppState>) -> Json<Store> {
    Json(state.store.lock().unwrap().clone())
}

async fn activate_period(
    State(state): State<AppState>,
    Json(req): Json<PeriodScope>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut store = state.store.lock().unwrap();
    store.activate_period(req.period_id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn solve_timetable(
    State(state): State<AppState>,
    Json(req): Json<YearScope>,
) -> Result<Json<TimetableSummary>, (StatusCode, String)> {
    let mut store = state.store.lock().unwrap();
    timetable::schedule_exams(&mut store, req.year_id)
        .map(Json)
        .map_err(reject)
}

async fn allocate_classrooms(
    State(state): State<AppState>,
    Json(req): Json<PeriodScope>,
) -> Result<Json<AllocationSummary>, (StatusCode, String)> {
    let mut store = state.store.lock().unwrap();
    classrooms::assign_classrooms(&mut store, req.period_id)
        .map(Json)
        .map_err(reject)
}

async fn staff_sittings(
    State(state): State<AppState>,
    Json(req): Json<PeriodScope>,
) -> Result<Json<StaffingSummary>, (StatusCode, String)> {
    let mut store = state.store.lock().unwrap();
    assistants::assign_assistants(&mut store, req.period_id)
        .map(Json)
        .map_err(reject)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/dataset", put(put_dataset).get(get_dataset))
        .route("/v1/periods/activate", post(activate_period))
        .route("/v1/timetable/solve", post(solve_timetable))
        .route("/v1/classrooms/assign", post(allocate_classrooms))
        .route("/v1/assistants/assign", post(staff_sittings))
        .with_state(state)
}

pub async fn run_server() {
    let app = router(AppState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080")
        .await
        .unwrap();

    println!("Server running at http://{}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
