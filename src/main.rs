//! Preflight check: load a survey the way a session would and list its questions.
//!
//! Usage: `proctored-survey <survey_id>`

use std::process::ExitCode;

use survey_lib::api::{load_survey, HttpSurveyApi, SurveyId};
use survey_lib::settings::{load_settings, save_settings, settings_path, AppSettings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("usage: proctored-survey <survey_id>");
        return ExitCode::from(2);
    };
    let survey_id: SurveyId = match arg.parse() {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid survey id {:?}: {}", arg, e);
            return ExitCode::from(2);
        }
    };

    // First run: leave a settings file with the defaults to edit
    match settings_path() {
        Ok(path) if !path.exists() => match save_settings(&AppSettings::default()) {
            Ok(()) => log::info!("Wrote default settings to {:?}", path),
            Err(e) => log::warn!("Could not write default settings: {}", e),
        },
        Ok(_) => {}
        Err(e) => log::warn!("Settings: {}", e),
    }

    let settings = load_settings();
    log::info!("Survey server: {}", settings.api_base_url);

    let api = match HttpSurveyApi::new(&settings.api_base_url, settings.request_timeout()) {
        Ok(api) => api,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match load_survey(&api, survey_id).await {
        Ok(survey) => {
            log::info!(
                "Survey {} '{}': {} questions",
                survey.id,
                survey.title,
                survey.questions.len()
            );
            for (n, question) in survey.questions.iter().enumerate() {
                log::info!("  {}. [{}] {}", n + 1, question.id, question.question_text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Failed to load survey {}: {}", survey_id, e);
            ExitCode::FAILURE
        }
    }
}
