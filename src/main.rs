mod chat;
mod config;
mod model;
mod web;

use actix_web::{App, HttpServer, web::Data};
use actix_files as fs;
use dotenv::dotenv;
use log::{info, error, warn};
use std::sync::Arc;
use tera::Tera;

use chat::ChatController;
use config::AppConfig;
use model::{LlamaConfig, ProviderConfig, Providers, Secret};
use web::routes;

// App state structure
pub struct AppState {
    pub tera: Tera,
    pub controller: ChatController,
    pub config: AppConfig,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting multi-model chat");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    if config.replicate_api_token.is_none() {
        warn!("REPLICATE_API_TOKEN not set; LLaMA sessions need a token typed in the UI");
    }

    let providers = match Providers::new(&config) {
        Ok(providers) => providers,
        Err(e) => {
            error!("Failed to initialize provider clients: {:#}", e);
            std::process::exit(1);
        }
    };

    // New sessions start on LLaMA, with the stored token when there is one
    let default_provider = ProviderConfig::Llama(LlamaConfig::new(
        config
            .replicate_api_token
            .clone()
            .unwrap_or_else(|| Secret::new("")),
    ));
    let controller = ChatController::new(Arc::new(providers), default_provider)
        .with_idle_ttl(config.session_idle_ttl);

    // Initialize template engine
    let mut tera = match Tera::new(&format!("{}/**/*", config.template_dir)) {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {}", e);
            std::process::exit(1);
        }
    };
    tera.autoescape_on(vec![".html"]);

    let bind = (config.host.clone(), config.port);
    info!("Listening on {}:{}", bind.0, bind.1);

    // Create app state
    let app_state = Data::new(AppState {
        tera,
        controller,
        config,
    });

    // Start web server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", "./static"))
    })
    .bind(bind)?
    .run()
    .await
}
