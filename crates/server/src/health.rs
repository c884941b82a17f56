use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use airloop_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    registered_agents: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub runtime: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, registered_agents: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState { db_pool, registered_agents })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let runtime = runtime_check(state.registered_agents);
    let database = database_check(&state.db_pool).await;
    let ready = runtime.status == "ready" && database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        runtime,
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn runtime_check(registered_agents: usize) -> HealthCheck {
    if registered_agents == 0 {
        return HealthCheck { status: "degraded", detail: "no agents registered".to_string() };
    }
    HealthCheck { status: "ready", detail: format!("{registered_agents} agents registered") }
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            warn!(
                event_name = "system.health.database_degraded",
                correlation_id = "health",
                session_id = "unknown",
                error = %error,
                "health probe could not reach the database"
            );
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use airloop_db::connect_with_settings;
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    #[tokio::test]
    async fn health_is_ready_with_agents_and_a_reachable_database() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let response = router(pool.clone(), 6)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["runtime"]["detail"], "6 agents registered");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, registered_agents: 6 })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.runtime.status, "ready");
    }

    #[tokio::test]
    async fn health_degrades_without_registered_agents() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), registered_agents: 0 })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.runtime.status, "degraded");
        assert_eq!(payload.database.status, "ready");

        pool.close().await;
    }
}
