//! Configuration file management for careplan.
//!
//! Provides a TOML-based config file at `~/.config/careplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use careplan_core::generate::ModelSuggestionGenerator;
use careplan_core::provider::{CommandProvider, ModelProvider, UnconfiguredProvider};
use careplan_core::safety::ModelSafetyClassifier;
use careplan_core::store::PlanStore;
use careplan_core::{SuggestionWorkflow, WorkflowConfig};
use careplan_db::config::DbConfig;

/// Env var naming the model provider command; overrides `[model] command`.
pub const MODEL_COMMAND_ENV: &str = "CAREPLAN_MODEL_COMMAND";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSection>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

/// External command that answers structured-output requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the careplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/careplan` or `~/.config/careplan`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("careplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("careplan")
}

/// Return the path to the careplan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CareplanConfig {
    pub db_config: DbConfig,
    pub model: Option<ModelSection>,
    pub workflow: WorkflowConfig,
}

impl CareplanConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `CAREPLAN_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Model command: `CAREPLAN_MODEL_COMMAND` env > `config_file.model` > none
    /// - Workflow tunables: `config_file.workflow` > defaults
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let file_model = file_config.as_ref().and_then(|c| c.model.clone());
        let model = match std::env::var(MODEL_COMMAND_ENV) {
            Ok(command) if !command.trim().is_empty() => Some(ModelSection {
                command,
                // Args only make sense alongside the command they were written for.
                args: Vec::new(),
            }),
            _ => file_model,
        };

        let workflow = file_config.map(|c| c.workflow).unwrap_or_default();

        Ok(Self {
            db_config,
            model,
            workflow,
        })
    }

    /// The configured model command, or an error explaining how to set one.
    pub fn require_model(&self) -> Result<&ModelSection> {
        match &self.model {
            Some(model) => Ok(model),
            None => bail!(
                "no model provider configured; set {MODEL_COMMAND_ENV} or add a [model] section with `careplan init --model-command`"
            ),
        }
    }

    /// The configured model provider. Without one, every call fails and
    /// analyses are blocked as `classifier_unavailable`.
    pub fn provider(&self) -> Arc<dyn ModelProvider> {
        match &self.model {
            Some(model) => Arc::new(CommandProvider::new(
                model.command.clone(),
                model.args.clone(),
            )),
            None => Arc::new(UnconfiguredProvider),
        }
    }

    /// Wire the classifier, generator, and store into a workflow.
    pub fn build_workflow(&self, store: Arc<dyn PlanStore>) -> SuggestionWorkflow {
        let provider = self.provider();
        let classifier =
            ModelSafetyClassifier::new(provider.clone(), self.workflow.classifier_timeout());
        let generator = ModelSuggestionGenerator::new(
            provider,
            self.workflow.generation_timeout(),
            self.workflow.prior_excerpt_chars,
        );
        SuggestionWorkflow::new(
            store,
            Arc::new(classifier),
            Arc::new(generator),
            self.workflow.clone(),
        )
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point config lookup at an empty temp dir for the duration of `f`.
    fn with_empty_config_home<T>(f: impl FnOnce(&std::path::Path) -> T) -> T {
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let out = f(tmp.path());

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        out
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        with_empty_config_home(|_| {
            let original = ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://testhost:5432/testdb".to_string(),
                },
                model: Some(ModelSection {
                    command: "/usr/local/bin/llm-json".to_string(),
                    args: vec!["--model".to_string(), "clinical".to_string()],
                }),
                workflow: WorkflowConfig {
                    max_commit_retries: 7,
                    ..WorkflowConfig::default()
                },
            };
            save_config(&original).unwrap();

            let loaded = load_config().unwrap();
            assert_eq!(loaded.database.url, original.database.url);
            assert_eq!(loaded.model, original.model);
            assert_eq!(loaded.workflow.max_commit_retries, 7);
        });
    }

    #[test]
    fn workflow_table_is_optional() {
        let cfg: ConfigFile = toml::from_str(
            r#"
            [database]
            url = "postgresql://localhost:5432/careplan"
            "#,
        )
        .unwrap();
        assert!(cfg.model.is_none());
        assert_eq!(cfg.workflow, WorkflowConfig::default());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        with_empty_config_home(|_| {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://localhost:5432/careplan".to_string(),
                },
                model: None,
                workflow: WorkflowConfig::default(),
            })
            .unwrap();
            let meta = std::fs::metadata(config_path()).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        });
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        let config = CareplanConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        with_empty_config_home(|_| {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://file:5432/filedb".to_string(),
                },
                model: None,
                workflow: WorkflowConfig::default(),
            })
            .unwrap();

            unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
            let config = CareplanConfig::resolve(None).unwrap();
            unsafe { std::env::remove_var(DbConfig::ENV_VAR) };

            assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        });
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        with_empty_config_home(|_| {
            unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
            unsafe { std::env::remove_var(MODEL_COMMAND_ENV) };

            let config = CareplanConfig::resolve(None).unwrap();
            assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
            assert!(config.model.is_none());
            assert_eq!(config.workflow, WorkflowConfig::default());

            let err = config.require_model().unwrap_err();
            assert!(err.to_string().contains("no model provider configured"));
            assert_eq!(config.provider().name(), "unconfigured");
        });
    }

    #[test]
    fn model_command_env_overrides_file() {
        let _lock = lock_env();
        with_empty_config_home(|_| {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://localhost:5432/careplan".to_string(),
                },
                model: Some(ModelSection {
                    command: "file-llm".to_string(),
                    args: vec!["--json".to_string()],
                }),
                workflow: WorkflowConfig::default(),
            })
            .unwrap();

            unsafe { std::env::set_var(MODEL_COMMAND_ENV, "env-llm") };
            let config = CareplanConfig::resolve(None).unwrap();
            unsafe { std::env::remove_var(MODEL_COMMAND_ENV) };

            let model = config.model.unwrap();
            assert_eq!(model.command, "env-llm");
            assert!(model.args.is_empty());
        });
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("careplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
