use std::sync::Arc;

use airloop_agent::{ConversationRuntime, TurnRequest};
use airloop_core::audit::{AuditSink, NoopAuditSink, TracingAuditSink};
use airloop_db::{SqlBookingRepository, SqlSessionRepository};

use crate::commands::{open_store, prepare, CommandResult, StepFailure};

pub fn run(session: Option<String>, message: String) -> CommandResult {
    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let audit: Arc<dyn AuditSink> = if config.observability.audit_enabled {
            Arc::new(TracingAuditSink)
        } else {
            Arc::new(NoopAuditSink)
        };
        let conversation = ConversationRuntime::airline_default(
            &config,
            Arc::new(SqlBookingRepository::new(pool.clone())),
            Arc::new(SqlSessionRepository::new(pool.clone())),
            audit,
        )
        .map_err(|error| ("runtime_config", error.to_string(), 6u8))?;

        let response = conversation
            .process_turn(TurnRequest::new(session, message))
            .await
            .map_err(|error| ("round", error.to_string(), 7u8))?;
        pool.close().await;
        Ok::<_, StepFailure>(response)
    });

    let response = match result {
        Ok(response) => response,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("chat", error_class, message, exit_code);
        }
    };

    let summary = format!(
        "session {} round {} answered by {}",
        response.session_id, response.round, response.active_agent
    );
    match serde_json::to_value(&response) {
        Ok(data) => CommandResult::success_with_data("chat", summary, data),
        Err(error) => CommandResult::failure("chat", "serialization", error.to_string(), 8),
    }
}
