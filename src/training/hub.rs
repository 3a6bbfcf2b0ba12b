//! Pretrained model resolution.
//!
//! A model is named either by a HuggingFace Hub id ("distilbert-base-uncased")
//! or a local directory. Either way it resolves to a [`ModelPath`] pointing at
//! config.json, model.safetensors and (when present) tokenizer.json. Only
//! safetensors weights are supported.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use hf_hub::api::sync::Api;

/// Resolved locations of a pretrained model's files
#[derive(Debug, Clone)]
pub struct ModelPath {
    /// Directory containing the model files
    pub path: PathBuf,
    /// Model id or local directory name
    pub model_id: String,
    /// Whether the files came from a local directory rather than the Hub
    pub is_local: bool,
    /// Path to config.json
    pub config_file: PathBuf,
    /// Path to model.safetensors
    pub weights_file: PathBuf,
    /// Path to tokenizer.json, when the model ships one
    pub tokenizer_file: Option<PathBuf>,
}

impl ModelPath {
    /// Builds a `ModelPath` from a local model directory.
    pub fn from_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            bail!("Model directory does not exist: {:?}", path);
        }

        let config_file = path.join("config.json");
        if !config_file.exists() {
            bail!("config.json not found in {:?}", path);
        }

        let weights_file = path.join("model.safetensors");
        if !weights_file.exists() {
            if path.join("pytorch_model.bin").exists() {
                bail!(
                    "Only safetensors weights are supported; found pytorch_model.bin in {:?}",
                    path
                );
            }
            bail!("model.safetensors not found in {:?}", path);
        }

        let tokenizer_file = path.join("tokenizer.json");

        Ok(Self {
            model_id: path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            path: path.clone(),
            is_local: true,
            config_file,
            weights_file,
            tokenizer_file: tokenizer_file.exists().then_some(tokenizer_file),
        })
    }

    /// Checks that the required files still exist on disk.
    pub fn validate(&self) -> Result<()> {
        if !self.config_file.exists() {
            bail!("Config file not found: {:?}", self.config_file);
        }
        if !self.weights_file.exists() {
            bail!("Weights file not found: {:?}", self.weights_file);
        }
        Ok(())
    }
}

fn missing_safetensors_error(model_id: &str, has_pickle: bool) -> anyhow::Error {
    if has_pickle {
        anyhow!(
            "{} only ships pickle weights; safetensors are required",
            model_id
        )
    } else {
        anyhow!("No model.safetensors found for {}", model_id)
    }
}

/// Resolves model ids to files, downloading from the Hub when needed
pub struct ModelResolver {
    api: Api,
}

impl ModelResolver {
    pub fn new() -> Result<Self> {
        let api = Api::new().context("Failed to initialize HuggingFace Hub API")?;
        Ok(Self { api })
    }

    /// Resolves a model id or local path.
    ///
    /// Anything that exists on disk, or that looks like a path (`.`, `/` or
    /// `~` prefix), is treated as local; everything else is fetched from the
    /// Hub into its cache directory.
    pub fn resolve(&self, model_id_or_path: &str) -> Result<ModelPath> {
        let local_path = Path::new(model_id_or_path);
        let looks_local = local_path.exists()
            || model_id_or_path.starts_with('.')
            || model_id_or_path.starts_with('/')
            || model_id_or_path.starts_with('~');

        if looks_local && local_path.exists() {
            tracing::info!("Loading model from local path: {}", model_id_or_path);
            ModelPath::from_local(model_id_or_path)
        } else if looks_local {
            Err(anyhow!(
                "Local model path does not exist: {}",
                model_id_or_path
            ))
        } else {
            self.download(model_id_or_path)
        }
    }

    fn download(&self, model_id: &str) -> Result<ModelPath> {
        tracing::info!("Fetching model from HuggingFace Hub: {}", model_id);

        let repo = self.api.model(model_id.to_string());

        let config_file = repo
            .get("config.json")
            .with_context(|| format!("Failed to download config.json for {}", model_id))?;

        let weights_file = match repo.get("model.safetensors") {
            Ok(path) => path,
            Err(_) => {
                // consult the repo file listing rather than fetching the
                // pickle weights just to name them in the error
                let has_pickle = repo
                    .info()
                    .map(|info| {
                        info.siblings
                            .iter()
                            .any(|s| s.rfilename == "pytorch_model.bin")
                    })
                    .unwrap_or(false);
                return Err(missing_safetensors_error(model_id, has_pickle));
            }
        };

        let tokenizer_file = repo.get("tokenizer.json").ok();

        let path = config_file
            .parent()
            .ok_or_else(|| anyhow!("Invalid config path"))?
            .to_path_buf();

        Ok(ModelPath {
            path,
            model_id: model_id.to_string(),
            is_local: false,
            config_file,
            weights_file,
            tokenizer_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_local_model(dir: &Path, with_safetensors: bool, with_pickle: bool) {
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        if with_safetensors {
            std::fs::write(dir.join("model.safetensors"), b"stub").unwrap();
        }
        if with_pickle {
            std::fs::write(dir.join("pytorch_model.bin"), b"stub").unwrap();
        }
    }

    #[test]
    fn test_missing_local_paths_error() {
        let resolver = ModelResolver::new().unwrap();

        assert!(resolver
            .resolve("./no-such-model")
            .is_err_and(|e| e.to_string().contains("does not exist")));
        assert!(resolver
            .resolve("/no/such/model")
            .is_err_and(|e| e.to_string().contains("does not exist")));
    }

    #[test]
    fn test_from_local_safetensors_only() {
        let dir = tempfile::tempdir().unwrap();
        write_local_model(dir.path(), false, true);

        let err = ModelPath::from_local(dir.path()).unwrap_err();
        assert!(err.to_string().contains("safetensors"));
    }

    #[test]
    fn test_missing_safetensors_error_names_the_problem() {
        let err = missing_safetensors_error("some/model", true);
        assert!(err.to_string().contains("pickle"));
        assert!(err.to_string().contains("safetensors"));

        let err = missing_safetensors_error("some/model", false);
        assert!(err.to_string().contains("model.safetensors"));
    }

    #[test]
    fn test_from_local_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_local_model(dir.path(), true, false);
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();

        let model_path = ModelPath::from_local(dir.path()).unwrap();
        assert!(model_path.is_local);
        assert!(model_path.tokenizer_file.is_some());
        assert!(model_path.validate().is_ok());
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_resolve_from_hub() {
        let resolver = ModelResolver::new().unwrap();
        let model_path = resolver.resolve("distilbert-base-uncased").unwrap();

        assert!(!model_path.is_local);
        assert!(model_path.tokenizer_file.is_some());
        assert!(model_path.validate().is_ok());
    }
}
