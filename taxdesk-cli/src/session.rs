//! Everything a command needs: stores, cookie jar and the authenticated client

use crate::cookies;
use reqwest::cookie::Jar;
use reqwest::Url;
use std::sync::Arc;
use taxdesk_client::{AuthenticatedClient, Navigator, ReqwestTransport, SessionEndpoints};
use taxdesk_core::{config_error, ClientConfig, TaxdeskResult};
use taxdesk_store::{AuthStore, FileStorage, UiStore};
use tracing::debug;

/// Tells the user when the client ended their session
#[derive(Debug, Default)]
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, location: &str) {
        let reason = location
            .split_once("reason=")
            .map(|(_, reason)| reason.replace('_', " "));
        match reason {
            Some(reason) => eprintln!("Signed out ({}). Run `taxdesk login` to continue.", reason),
            None => eprintln!("Signed out. Run `taxdesk login` to continue."),
        }
    }
}

pub struct CliSession {
    pub config: ClientConfig,
    pub storage: Arc<FileStorage>,
    pub auth: Arc<AuthStore>,
    pub ui: Arc<UiStore>,
    pub client: Arc<AuthenticatedClient>,
    jar: Arc<Jar>,
    base_url: Url,
    cookie_scopes: Vec<Url>,
}

/// Session endpoint URLs whose path-scoped cookies must be saved as well
fn cookie_scopes(base_url: &Url, endpoints: &SessionEndpoints) -> Vec<Url> {
    [
        &endpoints.login,
        &endpoints.refresh,
        &endpoints.logout,
        &endpoints.me,
        &endpoints.two_factor_verify,
    ]
    .into_iter()
    .filter_map(|path| base_url.join(path.trim_start_matches('/')).ok())
    .collect()
}

impl CliSession {
    pub async fn open(config: &ClientConfig) -> TaxdeskResult<Self> {
        let state_dir = config.state_dir();
        let storage = Arc::new(FileStorage::new(&state_dir)?);
        debug!(state_dir = %state_dir.display(), "Opened state directory");

        let auth = Arc::new(AuthStore::load(storage.clone()).await);
        let ui = Arc::new(UiStore::load(storage.clone()).await);

        let base_url = Url::parse(&format!("{}/", config.api.base_url.trim_end_matches('/')))
            .map_err(|e| config_error!(format!("Invalid api.base_url: {}", e), "cli"))?;
        let jar = cookies::restore_jar(&*storage, &base_url).await?;

        let transport = ReqwestTransport::with_cookie_jar(&config.api, jar.clone())?;
        let client = AuthenticatedClient::builder(Arc::new(transport))
            .login_route(config.session.login_route.clone())
            .navigator(Arc::new(TerminalNavigator))
            .session_store(auth.clone())
            .build();
        let cookie_scopes = cookie_scopes(&base_url, client.endpoints());

        Ok(Self {
            config: config.clone(),
            storage,
            auth,
            ui,
            client: Arc::new(client),
            jar,
            base_url,
            cookie_scopes,
        })
    }

    /// Write the jar back so the next run keeps the session
    pub async fn save_cookies(&self) -> TaxdeskResult<()> {
        cookies::save_jar(&*self.storage, &self.jar, &self.base_url, &self.cookie_scopes).await
    }
}
