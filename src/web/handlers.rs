use actix_web::{web, HttpResponse, Responder};
use log::{error, info, warn};
use serde_json::json;
use tera::Context;
use uuid::Uuid;

use crate::chat::{ControllerError, GREETING};
use crate::model::{gemini, llama};
use crate::web::models::{
    ChatRequest, ChatResponse, NoticeLevel, ProviderSettings, ProviderUpdateResponse,
};
use crate::AppState;

fn error_response(err: ControllerError) -> HttpResponse {
    let body = json!({ "error": err.to_string() });
    match err {
        ControllerError::SessionNotFound(_) => HttpResponse::NotFound().json(body),
        ControllerError::Busy => HttpResponse::Conflict().json(body),
        ControllerError::LockPoisoned | ControllerError::Worker(_) => {
            error!("Chat controller failure: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let mut context = Context::new();
    context.insert("greeting", GREETING);
    context.insert(
        "llama_models",
        &llama::MODELS.iter().map(|m| m.name).collect::<Vec<_>>(),
    );
    context.insert("gemini_models", gemini::MODELS);
    context.insert("temperature", &llama::DEFAULT_TEMPERATURE);
    context.insert("top_p", &llama::DEFAULT_TOP_P);
    context.insert("max_length", &llama::DEFAULT_MAX_LENGTH);
    context.insert("replicate_secret", &data.config.replicate_api_token.is_some());
    context.insert("gemini_secret", &data.config.gemini_api_key.is_some());

    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Models, tuning ranges and defaults for the settings panel
pub async fn providers(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "llama": {
            "models": llama::MODELS.iter().map(|m| m.name).collect::<Vec<_>>(),
            "temperature": {
                "min": llama::TEMPERATURE_RANGE.0,
                "max": llama::TEMPERATURE_RANGE.1,
                "default": llama::DEFAULT_TEMPERATURE,
            },
            "top_p": {
                "min": llama::TOP_P_RANGE.0,
                "max": llama::TOP_P_RANGE.1,
                "default": llama::DEFAULT_TOP_P,
            },
            "max_length": {
                "min": llama::MAX_LENGTH_RANGE.0,
                "max": llama::MAX_LENGTH_RANGE.1,
                "default": llama::DEFAULT_MAX_LENGTH,
            },
            "secret_configured": data.config.replicate_api_token.is_some(),
        },
        "gemini": {
            "models": gemini::MODELS,
            "secret_configured": data.config.gemini_api_key.is_some(),
        },
    }))
}

pub async fn create_session(data: web::Data<AppState>) -> impl Responder {
    match data.controller.create_session() {
        Ok(view) => HttpResponse::Created().json(view),
        Err(e) => error_response(e),
    }
}

pub async fn get_session(data: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match data.controller.session(path.into_inner()) {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(e),
    }
}

pub async fn select_provider(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    settings: web::Json<ProviderSettings>,
) -> impl Responder {
    let session_id = path.into_inner();

    let (provider, credential) = match settings.into_inner().resolve(&data.config) {
        Ok(resolved) => resolved,
        Err(message) => {
            warn!("Rejected provider settings for session {}: {}", session_id, message);
            return HttpResponse::BadRequest().json(json!({ "error": message }));
        }
    };
    if credential.level == NoticeLevel::Warning {
        warn!("Session {}: {}", session_id, credential.message);
    }

    match data.controller.select_provider(session_id, provider) {
        Ok(session) => HttpResponse::Ok().json(ProviderUpdateResponse { session, credential }),
        Err(e) => error_response(e),
    }
}

pub async fn clear_session(data: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match data.controller.clear(path.into_inner()) {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(e),
    }
}

// Chat API endpoint
pub async fn chat(data: web::Data<AppState>, req: web::Json<ChatRequest>) -> impl Responder {
    let ChatRequest {
        message,
        session_id,
    } = req.into_inner();

    info!(
        "Chat request from session {:?} ({} characters)",
        session_id,
        message.chars().count()
    );

    match data.controller.submit(session_id, message).await {
        Ok(outcome) => HttpResponse::Ok().json(ChatResponse {
            reply: outcome.reply,
            session_id: outcome.view.session_id,
            messages: outcome.view.messages,
        }),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatController, SessionView};
    use crate::config::AppConfig;
    use crate::model::{LlamaConfig, ProviderConfig, Providers, Secret};
    use crate::web::routes;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;
    use tera::Tera;

    fn state() -> web::Data<AppState> {
        let config = AppConfig::default();
        let providers = Providers::new(&config).unwrap();
        let controller = ChatController::new(
            Arc::new(providers),
            ProviderConfig::Llama(LlamaConfig::new(Secret::new(""))),
        );
        let mut tera = Tera::default();
        tera.add_raw_template("index.html", "<p>{{ greeting }}</p>")
            .unwrap();
        web::Data::new(AppState {
            tera,
            controller,
            config,
        })
    }

    #[actix_web::test]
    async fn index_renders_greeting() {
        let app =
            test::init_service(App::new().app_data(state()).configure(routes::configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert_eq!(body, "<p>How may I assist you today?</p>");
    }

    #[actix_web::test]
    async fn chat_with_unconfigured_provider_reports_inline_error() {
        let app =
            test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

        let created: SessionView = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/sessions").to_request(),
        )
        .await;
        assert_eq!(created.messages.len(), 1);

        let reply: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/chat")
                .set_json(json!({ "message": "hello", "session_id": created.session_id }))
                .to_request(),
        )
        .await;

        let mut keys: Vec<&str> = reply
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        keys.sort();
        assert_eq!(keys, ["messages", "reply", "session_id"]);

        let messages = reply["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], json!({ "role": "user", "content": "hello" }));
        assert_eq!(messages[2]["role"], "assistant");
        assert!(reply["reply"]
            .as_str()
            .unwrap()
            .starts_with("❌ Error: "));
    }

    #[actix_web::test]
    async fn provider_switch_and_clear() {
        let app =
            test::init_service(App::new().app_data(state()).configure(routes::configure)).await;
        let created: SessionView = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/sessions").to_request(),
        )
        .await;
        let id = created.session_id;

        let switched: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/sessions/{}/provider", id))
                .set_json(json!({ "provider": "gemini" }))
                .to_request(),
        )
        .await;
        assert_eq!(switched["session"]["provider"], "gemini");
        assert_eq!(switched["credential"]["level"], "warning");

        // Gemini without a key fails before any network call
        let reply: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/chat")
                .set_json(json!({ "message": "hi", "session_id": id }))
                .to_request(),
        )
        .await;
        assert_eq!(reply["reply"], "❌ Error: Please enter a Gemini API key");

        let cleared: SessionView = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/sessions/{}/clear", id))
                .to_request(),
        )
        .await;
        assert_eq!(cleared.messages.len(), 1);
        assert_eq!(cleared.messages[0].content, GREETING);
    }

    #[actix_web::test]
    async fn bad_settings_and_unknown_sessions() {
        let app =
            test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/sessions/{}/clear", Uuid::new_v4()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);

        let created: SessionView = test::call_and_read_body_json(
            &app,
            test::TestRequest::post().uri("/api/sessions").to_request(),
        )
        .await;
        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri(&format!("/api/sessions/{}/provider", created.session_id))
                .set_json(json!({ "provider": "llama", "temperature": 3.0 }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn providers_catalog_lists_ranges() {
        let app =
            test::init_service(App::new().app_data(state()).configure(routes::configure)).await;
        let catalog: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/providers").to_request(),
        )
        .await;
        assert_eq!(catalog["llama"]["models"], json!(["Llama2-7B", "Llama2-13B"]));
        assert_eq!(catalog["llama"]["max_length"]["min"], 20);
        assert_eq!(catalog["gemini"]["models"], json!(["gemini-pro"]));
    }
}
