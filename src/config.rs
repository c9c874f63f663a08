//! Configuration manager for career compass.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_NAME: &str = "Career Compass";
const DEFAULT_URL: &str = "http://localhost:8080";
const DEFAULT_PORT: u16 = 8080;
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PLACEHOLDER_BACKEND_URL: &str =
    "https://placeholder-project.supabase.co";
pub const PLACEHOLDER_ANON_KEY: &str = "placeholder-anon-key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of this instance, used for OAuth and recovery redirects.
    pub url: String,
    /// Listening port.
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to the Backend-as-a-Service project.
    #[serde(skip_serializing)]
    pub backend: Backend,
    /// Related to browser sessions.
    #[serde(skip_serializing)]
    pub session: Session,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            url: DEFAULT_URL.to_owned(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            backend: Backend::default(),
            session: Session::default(),
        }
    }
}

/// Supabase project configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Project URL, such as `https://xyz.supabase.co`.
    pub url: Option<String>,
    /// Public (anon) API key.
    pub anon_key: Option<String>,
}

/// Browser session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,
    /// Only send the cookie over HTTPS.
    pub secure_cookie: bool,
    /// Seconds of inactivity before a session is forgotten.
    pub idle_timeout: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            cookie_name: "cc_session".into(),
            secure_cookie: false,
            idle_timeout: 60 * 60 * 24, // 1 day.
        }
    }
}

/// Resolved backend credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCredentials {
    pub url: String,
    pub anon_key: String,
    /// Whether credentials are missing and placeholders are used.
    pub placeholder: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.as_str().trim_end_matches('/').to_owned())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path;
        config.apply_env(|key| std::env::var(key).ok());

        // normalize URLs.
        config.url = self.normalize_url(&config.url)?;
        config.backend.url = config
            .backend
            .url
            .map(|u| self.normalize_url(&u))
            .transpose()?;

        Ok(Arc::new(config))
    }

    /// Override values with environment variables.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.backend.url = Some(url);
        }
        if let Some(key) = var("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()) {
            self.backend.anon_key = Some(key);
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }

    /// Backend credentials, or placeholders when not configured.
    pub fn backend_credentials(&self) -> BackendCredentials {
        match (&self.backend.url, &self.backend.anon_key) {
            (Some(url), Some(anon_key))
                if !url.is_empty() && !anon_key.is_empty() =>
            {
                BackendCredentials {
                    url: url.clone(),
                    anon_key: anon_key.clone(),
                    placeholder: false,
                }
            },
            _ => {
                tracing::warn!(
                    "missing backend url or anon key, using placeholder values; authentication and data features will not work"
                );
                BackendCredentials {
                    url: PLACEHOLDER_BACKEND_URL.to_owned(),
                    anon_key: PLACEHOLDER_ANON_KEY.to_owned(),
                    placeholder: true,
                }
            },
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self::default()
    }
}
