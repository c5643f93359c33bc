//! Configuration: defaults, then an optional TOML file, then the environment.

mod server;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use server::{ServerConfig, ServiceKind};

use crate::conversion::{PreviewLimits, Remotes, SchedulerOptions, ToolRunner, Toolbox, Tools};
use crate::error::{Error, Result};
use crate::service::Settings;

const MB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    /// `PORT`: overrides the port of whichever single service is served.
    pub port: Option<u16>,
    pub api_port: u16,
    pub conversion_port: u16,
    pub webdav_port: u16,
    pub data_dir: PathBuf,

    pub api_url: String,
    pub idp_url: String,
    pub conversion_url: String,
    /// Services some pipelines call; empty leaves the service unset.
    pub language_url: String,
    pub mosaic_url: String,
    pub watermark_url: String,

    /// Database location; `sqlite://` is stripped. Empty means `DATA_DIR/voltcore.db`.
    pub postgres_url: String,

    /// Empty selects the filesystem object store.
    pub s3_url: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_region: String,
    pub s3_secure: bool,

    /// Empty selects the in-memory cache.
    pub redis_address: String,
    pub redis_password: String,
    pub redis_db: i64,

    pub security_api_key: String,
    pub security_cors_origins: Vec<String>,
    pub security_access_token_ttl_seconds: i64,

    pub limits_external_command_timeout_seconds: u64,
    pub limits_multipart_body_length_limit_mb: usize,
    pub limits_image_preview_max_width: u32,
    pub limits_image_preview_max_height: u32,
    pub limits_file_processing_mb: i64,
    pub default_workspace_storage_capacity_bytes: i64,
    pub conversion_workers: usize,

    pub toolbox: Toolbox,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            api_port: 8080,
            conversion_port: 8083,
            webdav_port: 8082,
            data_dir: PathBuf::from("./data"),
            api_url: "http://127.0.0.1:8080".to_string(),
            idp_url: "http://127.0.0.1:8080".to_string(),
            conversion_url: "http://127.0.0.1:8083".to_string(),
            language_url: String::new(),
            mosaic_url: String::new(),
            watermark_url: String::new(),
            postgres_url: String::new(),
            s3_url: String::new(),
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_region: "us-east-1".to_string(),
            s3_secure: false,
            redis_address: String::new(),
            redis_password: String::new(),
            redis_db: 0,
            security_api_key: String::new(),
            security_cors_origins: Vec::new(),
            security_access_token_ttl_seconds: crate::auth::DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            limits_external_command_timeout_seconds: 300,
            limits_multipart_body_length_limit_mb: 1000,
            limits_image_preview_max_width: 1280,
            limits_image_preview_max_height: 1280,
            limits_file_processing_mb: 1000,
            default_workspace_storage_capacity_bytes: 100_000_000_000,
            conversion_workers: std::thread::available_parallelism().map_or(1, usize::from),
            toolbox: Toolbox::default(),
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}: cannot parse '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{name}: cannot parse '{value}' as a boolean"))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Defaults, overlaid by `file` when given, overlaid by the process
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Applies every variable `lookup` knows about.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        macro_rules! string {
            ($name:literal, $field:expr) => {
                if let Some(v) = lookup($name) {
                    $field = v;
                }
            };
        }
        macro_rules! parsed {
            ($name:literal, $field:expr) => {
                if let Some(v) = lookup($name) {
                    $field = parse($name, &v)?;
                }
            };
        }

        string!("HOST", self.host);
        if let Some(v) = lookup("PORT") {
            self.port = Some(parse("PORT", &v)?);
        }
        parsed!("API_PORT", self.api_port);
        parsed!("CONVERSION_PORT", self.conversion_port);
        parsed!("WEBDAV_PORT", self.webdav_port);
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        string!("API_URL", self.api_url);
        string!("IDP_URL", self.idp_url);
        string!("CONVERSION_URL", self.conversion_url);
        string!("LANGUAGE_URL", self.language_url);
        string!("MOSAIC_URL", self.mosaic_url);
        string!("WATERMARK_URL", self.watermark_url);
        string!("POSTGRES_URL", self.postgres_url);
        string!("S3_URL", self.s3_url);
        string!("S3_ACCESS_KEY", self.s3_access_key);
        string!("S3_SECRET_KEY", self.s3_secret_key);
        string!("S3_REGION", self.s3_region);
        if let Some(v) = lookup("S3_SECURE") {
            self.s3_secure = parse_bool("S3_SECURE", &v)?;
        }
        string!("REDIS_ADDRESS", self.redis_address);
        string!("REDIS_PASSWORD", self.redis_password);
        parsed!("REDIS_DB", self.redis_db);
        string!("SECURITY_API_KEY", self.security_api_key);
        if let Some(v) = lookup("SECURITY_CORS_ORIGINS") {
            self.security_cors_origins = split_list(&v);
        }
        parsed!(
            "SECURITY_ACCESS_TOKEN_TTL_SECONDS",
            self.security_access_token_ttl_seconds
        );
        parsed!(
            "LIMITS_EXTERNAL_COMMAND_TIMEOUT_SECONDS",
            self.limits_external_command_timeout_seconds
        );
        parsed!(
            "LIMITS_MULTIPART_BODY_LENGTH_LIMIT_MB",
            self.limits_multipart_body_length_limit_mb
        );
        parsed!(
            "LIMITS_IMAGE_PREVIEW_MAX_WIDTH",
            self.limits_image_preview_max_width
        );
        parsed!(
            "LIMITS_IMAGE_PREVIEW_MAX_HEIGHT",
            self.limits_image_preview_max_height
        );
        parsed!("LIMITS_FILE_PROCESSING_MB", self.limits_file_processing_mb);
        parsed!(
            "DEFAULT_WORKSPACE_STORAGE_CAPACITY_BYTES",
            self.default_workspace_storage_capacity_bytes
        );
        parsed!("CONVERSION_WORKERS", self.conversion_workers);
        string!("TOOLBOX_MAGICK", self.toolbox.magick);
        string!("TOOLBOX_PDFTOTEXT", self.toolbox.pdftotext);
        string!("TOOLBOX_PDFINFO", self.toolbox.pdfinfo);
        string!("TOOLBOX_SOFFICE", self.toolbox.soffice);
        string!("TOOLBOX_FFMPEG", self.toolbox.ffmpeg);
        string!("TOOLBOX_OCRMYPDF", self.toolbox.ocrmypdf);

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.conversion_workers == 0 {
            return Err(Error::Config("CONVERSION_WORKERS must be at least 1".into()));
        }
        if self.limits_external_command_timeout_seconds == 0 {
            return Err(Error::Config(
                "LIMITS_EXTERNAL_COMMAND_TIMEOUT_SECONDS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Bind address of `kind`. `PORT` wins unless several services share
    /// the process.
    #[must_use]
    pub fn server(&self, kind: ServiceKind, single: bool) -> ServerConfig {
        let default = match kind {
            ServiceKind::Api => self.api_port,
            ServiceKind::Conversion => self.conversion_port,
            ServiceKind::WebDav => self.webdav_port,
        };
        ServerConfig {
            host: self.host.clone(),
            port: if single { self.port.unwrap_or(default) } else { default },
        }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        let url = self.postgres_url.trim();
        match url.strip_prefix("sqlite://").unwrap_or(url) {
            "" => self.data_dir.join("voltcore.db"),
            path => PathBuf::from(path),
        }
    }

    /// `S3_URL` with a scheme, chosen by `S3_SECURE` when absent.
    #[must_use]
    pub fn s3_endpoint(&self) -> String {
        let url = self.s3_url.trim().trim_end_matches('/');
        if url.contains("://") {
            url.to_string()
        } else if self.s3_secure {
            format!("https://{url}")
        } else {
            format!("http://{url}")
        }
    }

    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    #[must_use]
    pub fn multipart_limit_bytes(&self) -> usize {
        self.limits_multipart_body_length_limit_mb.saturating_mul(MB)
    }

    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.limits_external_command_timeout_seconds)
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            default_storage_capacity: self.default_workspace_storage_capacity_bytes,
            file_processing_limit_bytes: self
                .limits_file_processing_mb
                .saturating_mul(MB as i64),
        }
    }

    pub fn scheduler_options(&self) -> Result<SchedulerOptions> {
        let runner = ToolRunner::new(self.tool_timeout()).with_temp_dir(self.temp_dir());
        Ok(SchedulerOptions {
            workers: self.conversion_workers,
            tools: Tools::new(runner, self.toolbox.clone()),
            limits: PreviewLimits {
                max_width: self.limits_image_preview_max_width,
                max_height: self.limits_image_preview_max_height,
            },
            remotes: Remotes::from_urls(&self.language_url, &self.mosaic_url, &self.watermark_url)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default().with_env(env(&[])).unwrap();
        assert_eq!(config.server(ServiceKind::Api, true).port, 8080);
        assert_eq!(config.server(ServiceKind::Conversion, true).port, 8083);
        assert_eq!(config.server(ServiceKind::WebDav, true).port, 8082);
        assert_eq!(config.tool_timeout(), Duration::from_secs(300));
        assert_eq!(config.multipart_limit_bytes(), 1000 * MB);
        assert_eq!(config.db_path(), PathBuf::from("./data/voltcore.db"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = Config::from_toml(
            r#"
            api_port = 9000
            security_api_key = "from-file"
            limits_image_preview_max_width = 640

            [toolbox]
            magick = "/opt/magick"
            "#,
        )
        .unwrap();
        assert_eq!(file.toolbox.magick, "/opt/magick");
        assert_eq!(file.toolbox.ffmpeg, "ffmpeg");

        let config = file
            .with_env(env(&[
                ("SECURITY_API_KEY", "from-env"),
                ("SECURITY_CORS_ORIGINS", "https://a.example, https://b.example"),
            ]))
            .unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.security_api_key, "from-env");
        assert_eq!(config.limits_image_preview_max_width, 640);
        assert_eq!(config.security_cors_origins.len(), 2);
    }

    #[test]
    fn test_pipeline_services_follow_urls() {
        let config = Config::default()
            .with_env(env(&[
                ("MOSAIC_URL", "http://127.0.0.1:8085"),
                ("TOOLBOX_OCRMYPDF", "/usr/local/bin/ocrmypdf"),
            ]))
            .unwrap();
        let options = config.scheduler_options().unwrap();
        assert!(options.remotes.mosaic.is_some());
        assert!(options.remotes.language.is_none());
        assert!(options.remotes.watermark.is_none());
        assert_eq!(options.tools.toolbox.ocrmypdf, "/usr/local/bin/ocrmypdf");
    }

    #[test]
    fn test_port_applies_to_single_service() {
        let config = Config::default().with_env(env(&[("PORT", "7000")])).unwrap();
        assert_eq!(config.server(ServiceKind::WebDav, true).port, 7000);
        assert_eq!(config.server(ServiceKind::WebDav, false).port, 8082);
    }

    #[test]
    fn test_sqlite_prefix_is_stripped() {
        let config = Config::default()
            .with_env(env(&[("POSTGRES_URL", "sqlite:///var/lib/voltcore.db")]))
            .unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/voltcore.db"));
    }

    #[test]
    fn test_s3_endpoint() {
        let mut config = Config {
            s3_url: "minio:9000".to_string(),
            ..Config::default()
        };
        assert_eq!(config.s3_endpoint(), "http://minio:9000");
        config.s3_secure = true;
        assert_eq!(config.s3_endpoint(), "https://minio:9000");
        config.s3_url = "http://minio:9000/".to_string();
        assert_eq!(config.s3_endpoint(), "http://minio:9000");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::default().with_env(env(&[("REDIS_DB", "x")])).is_err());
        assert!(
            Config::default()
                .with_env(env(&[("CONVERSION_WORKERS", "0")]))
                .is_err()
        );
        assert!(Config::from_toml("api_port = \"high\"").is_err());
    }
}
