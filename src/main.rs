use std::sync::Arc;

use anyhow::Context;
use reqwest::Url;
use tokio::io::BufReader;
use tracing::info;

use hydrate_tracker::{
    config::{Backend, Config},
    form::IntakeForm,
    http::build_client,
    intake::IntakeManager,
    oauth::OAuthClient,
    screen, storage,
    store::{
        google_fit::{GoogleFitOptions, GoogleFitStore},
        local::LocalHealthStore,
        HealthStore,
    },
    telemetry,
};

fn open_store(
    config: &Config,
    dirs: &directories::ProjectDirs,
) -> anyhow::Result<Arc<dyn HealthStore>> {
    let data_dir = dirs.data_dir();

    let store: Arc<dyn HealthStore> = match config.backend {
        Backend::Local if config.local.persist => Arc::new(
            LocalHealthStore::open(data_dir.join(storage::INTAKE_FILE))
                .context("Unable to open local intake store")?,
        ),
        Backend::Local => Arc::new(LocalHealthStore::in_memory()),
        Backend::GoogleFit => {
            let google = &config.google_fit;
            let (client_id, client_secret) = google.client_credentials()?;
            let http = build_client().context("Unable to create HTTP client")?;

            let oauth = OAuthClient::new(
                http.clone(),
                client_id,
                client_secret,
                Url::parse(&google.auth_url).context("Invalid google_fit.auth_url")?,
                Url::parse(&google.token_url).context("Invalid google_fit.token_url")?,
            );

            let mut options = GoogleFitOptions::new(
                Url::parse(&google.api_base_url).context("Invalid google_fit.api_base_url")?,
            );
            options.redirect_port = google.redirect_port;
            options.credentials_path = Some(data_dir.join(storage::CREDENTIALS_FILE));

            Arc::new(
                GoogleFitStore::new(http, oauth, options)
                    .context("Unable to load Google Fit credentials")?,
            )
        }
    };

    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dirs = storage::project_dirs()?;
    let config_path = dirs.config_dir().join(storage::CONFIG_FILE);
    let config = Config::load(&config_path)
        .with_context(|| format!("Unable to load {}", config_path.display()))?;

    let _telemetry = telemetry::init(&config, &dirs.data_dir().join(storage::LOG_DIR))?;
    info!("Starting with {:?} backend", config.backend);

    let store = open_store(&config, &dirs)?;
    let form = IntakeForm::new(IntakeManager::new(store));
    let renderer = screen::spawn_renderer(form.subscribe(), tokio::io::stdout());

    form.on_appear().await;
    screen::drive(&form, BufReader::new(tokio::io::stdin())).await?;

    info!("Input closed, shutting down");
    drop(form);
    renderer.await??;

    Ok(())
}
