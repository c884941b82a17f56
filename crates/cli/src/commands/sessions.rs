use airloop_db::{SessionRepository, SqlSessionRepository};

use crate::commands::{open_store, prepare, CommandResult, StepFailure};

pub fn run(limit: u32) -> CommandResult {
    let (config, runtime) = match prepare("sessions") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let sessions = SqlSessionRepository::new(pool.clone())
            .list(limit.max(1))
            .await
            .map_err(|error| ("persistence", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, StepFailure>(sessions)
    });

    let sessions = match result {
        Ok(sessions) => sessions,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("sessions", error_class, message, exit_code);
        }
    };

    match serde_json::to_value(&sessions) {
        Ok(data) => CommandResult::success_with_data(
            "sessions",
            format!("{} sessions", sessions.len()),
            data,
        ),
        Err(error) => CommandResult::failure("sessions", "serialization", error.to_string(), 7),
    }
}
