use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Config, CoreError, FailurePolicy, UploadMode};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub google: Option<GoogleConfig>,
    pub storage: Option<StorageConfig>,
    pub extraction: Option<ExtractionConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub credentials_path: Option<String>,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub model: Option<String>,
    pub model_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub key_prefix: Option<String>,
    pub upload_mode: Option<UploadMode>,
    pub upload_endpoint: Option<String>,
    pub download_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub prompt: Option<String>,
    pub default_mime_type: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub max_upload_mb: Option<usize>,
}

/// Platform config directory path: `<config_dir>/logreader/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("logreader").join("config.toml"))
}

/// Load config by cascading CWD `.logreader.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".logreader.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let google = match (base.google, overlay.google) {
        (Some(b), Some(o)) => Some(GoogleConfig {
            credentials_path: o.credentials_path.or(b.credentials_path),
            project_id: o.project_id.or(b.project_id),
            location: o.location.or(b.location),
            model: o.model.or(b.model),
            model_endpoint: o.model_endpoint.or(b.model_endpoint),
        }),
        (b, o) => o.or(b),
    };
    let storage = match (base.storage, overlay.storage) {
        (Some(b), Some(o)) => Some(StorageConfig {
            bucket: o.bucket.or(b.bucket),
            key_prefix: o.key_prefix.or(b.key_prefix),
            upload_mode: o.upload_mode.or(b.upload_mode),
            upload_endpoint: o.upload_endpoint.or(b.upload_endpoint),
            download_endpoint: o.download_endpoint.or(b.download_endpoint),
        }),
        (b, o) => o.or(b),
    };
    let extraction = match (base.extraction, overlay.extraction) {
        (Some(b), Some(o)) => Some(ExtractionConfig {
            prompt: o.prompt.or(b.prompt),
            default_mime_type: o.default_mime_type.or(b.default_mime_type),
            failure_policy: o.failure_policy.or(b.failure_policy),
            request_timeout_secs: o.request_timeout_secs.or(b.request_timeout_secs),
        }),
        (b, o) => o.or(b),
    };
    let server = match (base.server, overlay.server) {
        (Some(b), Some(o)) => Some(ServerConfig {
            port: o.port.or(b.port),
            max_upload_mb: o.max_upload_mb.or(b.max_upload_mb),
        }),
        (b, o) => o.or(b),
    };
    ConfigFile {
        google,
        storage,
        extraction,
        server,
    }
}

impl Config {
    /// Defaults overlaid with whatever the config file sets.
    pub fn from_file(file: &ConfigFile) -> Self {
        let mut config = Config::default();
        if let Some(ref g) = file.google {
            if let Some(ref p) = g.credentials_path {
                config.credentials_path = PathBuf::from(p);
            }
            config.project_id = g.project_id.clone().or(config.project_id);
            if let Some(ref l) = g.location {
                config.location = l.clone();
            }
            if let Some(ref m) = g.model {
                config.model = m.clone();
            }
            config.model_endpoint = g.model_endpoint.clone().or(config.model_endpoint);
        }
        if let Some(ref s) = file.storage {
            config.bucket = s.bucket.clone().or(config.bucket);
            if let Some(ref p) = s.key_prefix {
                config.key_prefix = p.clone();
            }
            if let Some(mode) = s.upload_mode {
                config.upload_mode = mode;
            }
            if let Some(ref e) = s.upload_endpoint {
                config.upload_endpoint = e.clone();
            }
            if let Some(ref e) = s.download_endpoint {
                config.download_endpoint = e.clone();
            }
        }
        if let Some(ref x) = file.extraction {
            if let Some(ref p) = x.prompt {
                config.prompt = p.clone();
            }
            if let Some(ref m) = x.default_mime_type {
                config.default_mime_type = m.clone();
            }
            if let Some(policy) = x.failure_policy {
                config.failure_policy = policy;
            }
            if let Some(secs) = x.request_timeout_secs {
                config.request_timeout_secs = secs;
            }
        }
        if let Some(ref s) = file.server {
            if let Some(port) = s.port {
                config.port = port;
            }
            if let Some(mb) = s.max_upload_mb {
                config.max_upload_mb = mb;
            }
        }
        config
    }

    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` in
    /// production and a map in tests. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| CoreError::Config(format!("PORT must be a port number, got '{port}'")))?;
        }
        if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            self.credentials_path = PathBuf::from(path);
        }
        if let Some(token) = get("LOGREADER_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(project) = get("LOGREADER_PROJECT") {
            self.project_id = Some(project);
        }
        if let Some(location) = get("LOGREADER_LOCATION") {
            self.location = location;
        }
        if let Some(model) = get("LOGREADER_MODEL") {
            self.model = model;
        }
        if let Some(bucket) = get("LOGREADER_BUCKET") {
            self.bucket = Some(bucket);
        }
        if let Some(prompt) = get("LOGREADER_PROMPT") {
            self.prompt = prompt;
        }
        if let Some(mode) = get("LOGREADER_UPLOAD_MODE") {
            self.upload_mode = mode.parse().map_err(CoreError::Config)?;
        }
        if let Some(policy) = get("LOGREADER_FAILURE_POLICY") {
            self.failure_policy = policy.parse().map_err(CoreError::Config)?;
        }
        Ok(())
    }
}

/// Resolve the effective config: file cascade, then process environment.
pub fn resolve() -> Result<Config, CoreError> {
    let mut config = Config::from_file(&load_config());
    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}
