//! Conversion of CLI arguments into a `RemovalConfig`

use crate::cli::main_impl::Cli;
use crate::{
    config::RemovalConfig,
    models::ModelSpec,
    utils::{ExecutionProviderManager, ModelSpecParser},
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build `RemovalConfig` from the global CLI flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<RemovalConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        RemovalConfig::builder()
            .model_spec(Self::model_spec(cli)?)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .num_threads(cli.threads)
            .debug(cli.verbose >= 2)
            .build()
            .context("Invalid configuration")
    }

    /// Model from `--model`/`--variant`, or the default BiRefNet model
    pub(crate) fn model_spec(cli: &Cli) -> Result<ModelSpec> {
        let spec = match &cli.model {
            Some(model_arg) => ModelSpecParser::parse(model_arg),
            None => ModelSpec::default(),
        };
        let spec = ModelSpecParser::with_variant(spec, cli.variant.as_deref());
        ModelSpecParser::validate(&spec).context("Invalid model specification")?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType, ExecutionProvider};
    use crate::models::ModelSource;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["birefnet-bgremove"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["providers"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.backend_type, BackendType::Onnx);
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.model_spec, ModelSpec::default());
        assert!(!config.debug);
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&[
            "file",
            "butterfly.jpg",
            "--execution-provider",
            "tract:cpu",
            "--model",
            "onnx-community--BiRefNet-ONNX:fp32",
            "--variant",
            "fp16",
            "--threads",
            "4",
            "-vv",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(
            config.model_spec.source,
            ModelSource::Downloaded("onnx-community--BiRefNet-ONNX".to_string())
        );
        assert_eq!(config.model_spec.variant.as_deref(), Some("fp16"));
        assert_eq!(config.intra_threads, 4);
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_provider() {
        let cli = parse(&["providers", "--execution-provider", "tract:cuda"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }

    #[test]
    fn test_invalid_variant() {
        let cli = parse(&["providers", "--variant", "fp 16"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
