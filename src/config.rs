use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::filter::{build_globset, DEFAULT_BUILD_FILES, DEFAULT_EXTENSIONS};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL used in the "Go to Url" event.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Directory of static files served at `/` (the browser client).
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
            static_dir: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// Ceiling in whitespace-delimited words.
    #[serde(default = "default_budget_ceiling")]
    pub budget_ceiling: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_build_files")]
    pub build_files: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_ceiling: default_budget_ceiling(),
            extensions: default_extensions(),
            build_files: default_build_files(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_budget_ceiling() -> usize {
    30_000
}
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}
fn default_build_files() -> Vec<String> {
    DEFAULT_BUILD_FILES.iter().map(|s| s.to_string()).collect()
}
fn default_max_file_bytes() -> u64 {
    4 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloneConfig {
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default = "default_clone_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            shallow: true,
            timeout_secs: default_clone_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_clone_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Also ask for a diagram overview of the generated document.
    #[serde(default = "default_true")]
    pub overview: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_max_retries(),
            overview: true,
        }
    }
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `local`, `s3`, or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_docs_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dir: default_docs_dir(),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_docs_dir() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path`, falling back to built-in defaults when the file is absent.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate prompt
    if config.prompt.budget_ceiling == 0 {
        bail!("prompt.budget_ceiling must be > 0");
    }
    if config.prompt.extensions.is_empty() && config.prompt.build_files.is_empty() {
        bail!("prompt.extensions and prompt.build_files cannot both be empty");
    }
    for ext in &config.prompt.extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            bail!("prompt.extensions entry '{}' must look like '.ext'", ext);
        }
    }
    build_globset(&config.prompt.exclude_globs)
        .with_context(|| "prompt.exclude_globs contains an invalid pattern")?;

    // Validate server
    if config.server.max_frame_bytes == 0 {
        bail!("server.max_frame_bytes must be > 0");
    }

    // Validate storage
    match config.storage.backend.as_str() {
        "local" | "memory" => {}
        "s3" => {
            if config.storage.bucket.as_deref().unwrap_or("").is_empty() {
                bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local, s3, or memory.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docgen.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.prompt.budget_ceiling, 30_000);
        assert_eq!(cfg.prompt.build_files, vec!["Dockerfile"]);
        assert!(cfg.prompt.extensions.contains(&".go".to_string()));
        assert_eq!(cfg.generation.api_key_env, "GEMINI_API_KEY");
        assert_eq!(cfg.storage.backend, "local");
        assert!(cfg.clone.shallow);
    }

    #[test]
    fn parses_sections() {
        let (_tmp, path) = write_config(
            r#"
[server]
bind = "127.0.0.1:9000"
public_url = "https://docs.example.com"

[prompt]
budget_ceiling = 500
extensions = [".rs", ".toml"]
exclude_globs = ["vendor/**"]

[storage]
backend = "s3"
bucket = "docgen-markdown"
region = "eu-west-1"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.prompt.budget_ceiling, 500);
        assert_eq!(cfg.prompt.extensions, vec![".rs", ".toml"]);
        assert_eq!(cfg.storage.bucket.as_deref(), Some("docgen-markdown"));
        assert_eq!(cfg.storage.region, "eu-west-1");
    }

    #[test]
    fn rejects_zero_ceiling() {
        let (_tmp, path) = write_config("[prompt]\nbudget_ceiling = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_malformed_extension() {
        let (_tmp, path) = write_config("[prompt]\nextensions = [\"go\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_bad_glob() {
        let (_tmp, path) = write_config("[prompt]\nexclude_globs = [\"a[\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn s3_requires_bucket() {
        let (_tmp, path) = write_config("[storage]\nbackend = \"s3\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn rejects_unknown_backend() {
        let (_tmp, path) = write_config("[storage]\nbackend = \"ftp\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }
}
