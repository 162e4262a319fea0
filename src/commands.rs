//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bdsync_core::{Declaration, DesiredState};
use bdsync_maas::{MaasClient, MaasConfig};
use bdsync_reconciler::{Reconciler, ReconcilerConfig};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::cli::Commands;

/// Settings file contents: MAAS connection plus reconciler options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub maas: MaasConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl Settings {
    /// Load settings from a TOML or JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;

        if has_extension(path, "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse settings {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse settings {}", path.display()))
        }
    }

    /// Resolve settings: file, then `BDSYNC_MAAS_*` environment, then flags.
    ///
    /// # Errors
    ///
    /// Fails when the settings file cannot be loaded.
    pub fn resolve(
        config: Option<&Path>,
        url: Option<Url>,
        forward_partition_bootable: bool,
    ) -> Result<Self> {
        let mut settings = match config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        settings.maas = settings.maas.apply_env();
        if let Some(url) = url {
            settings.maas.base_url = Some(url);
        }
        if forward_partition_bootable {
            settings.reconciler.forward_partition_bootable = true;
        }

        Ok(settings)
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Apply {
            file,
            config,
            url,
            check,
            forward_partition_bootable,
        } => cmd_apply(file, config, url, check, forward_partition_bootable).await,

        Commands::Validate { file } => cmd_validate(&file),
    }
}

/// Load and validate a declaration, choosing the format by extension.
///
/// # Errors
///
/// Fails when the file cannot be read, does not parse, or is invalid.
pub fn load_declaration(path: &Path) -> Result<DesiredState> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read declaration {}", path.display()))?;

    let declaration = if has_extension(path, "json") {
        Declaration::from_json_str(&content)
    } else {
        Declaration::from_yaml_str(&content)
    }
    .with_context(|| format!("Invalid declaration {}", path.display()))?;

    declaration
        .into_desired()
        .with_context(|| format!("Invalid declaration {}", path.display()))
}

async fn cmd_apply(
    file: PathBuf,
    config: Option<PathBuf>,
    url: Option<Url>,
    check: bool,
    forward_partition_bootable: bool,
) -> Result<()> {
    let desired = load_declaration(&file)?;
    let settings = Settings::resolve(config.as_deref(), url, forward_partition_bootable)?;

    let client = MaasClient::with_config(settings.maas).context("Failed to build MAAS client")?;
    let reconciler = Reconciler::new(Arc::new(client), settings.reconciler);

    info!(
        machine = desired.machine_fqdn(),
        device = desired.name(),
        check,
        "Applying declaration"
    );

    let output = if check {
        let plan = reconciler
            .plan(&desired)
            .await
            .context("Failed to plan block device changes")?;
        serde_json::to_string_pretty(&plan)?
    } else {
        let outcome = reconciler
            .reconcile(&desired)
            .await
            .context("Failed to converge block device")?;
        serde_json::to_string_pretty(&outcome)?
    };

    println!("{output}");
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let desired = load_declaration(file)?;
    info!(
        machine = desired.machine_fqdn(),
        device = desired.name(),
        "Declaration is valid"
    );
    println!("{}", serde_json::to_string_pretty(&desired)?);
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, content: &str) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn test_load_yaml_declaration() -> Result<()> {
        let file = write_temp(
            ".yaml",
            "state: present\nmachine_fqdn: m1.maas\nname: vdb\nsize_gigabytes: 27\nid_path: /dev/vdb\n",
        )?;
        let desired = load_declaration(file.path())?;
        assert_eq!(desired.machine_fqdn(), "m1.maas");
        assert_eq!(desired.name(), "vdb");
        Ok(())
    }

    #[test]
    fn test_load_json_declaration() -> Result<()> {
        let file = write_temp(
            ".json",
            r#"{"state": "absent", "machine_fqdn": "m1.maas", "name": "vdb"}"#,
        )?;
        let desired = load_declaration(file.path())?;
        assert!(matches!(desired, DesiredState::Absent { .. }));
        Ok(())
    }

    #[test]
    fn test_conflicting_identity_is_rejected() -> Result<()> {
        let file = write_temp(
            ".yaml",
            "state: present\nmachine_fqdn: m1.maas\nname: vdb\nsize_gigabytes: 1\nmodel: QEMU\nid_path: /dev/vdb\n",
        )?;
        let error = load_declaration(file.path())
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        assert!(error.contains("Invalid declaration"));
        Ok(())
    }

    #[test]
    fn test_settings_toml_with_reconciler_section() -> Result<()> {
        let file = write_temp(
            ".toml",
            "base_url = \"http://maas.example:5240/MAAS/\"\ntimeout = 5\n\n[reconciler]\nforward_partition_bootable = true\n",
        )?;
        let settings = Settings::from_file(file.path())?;
        assert!(settings.reconciler.forward_partition_bootable);
        assert_eq!(settings.maas.timeout, std::time::Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_settings_json_defaults() -> Result<()> {
        let file = write_temp(
            ".json",
            r#"{"base_url": "http://maas.example/MAAS/", "api_version": "2.0"}"#,
        )?;
        let settings = Settings::from_file(file.path())?;
        assert!(settings.maas.base_url.is_some());
        assert_eq!(settings.maas.timeout, std::time::Duration::from_secs(30));
        assert!(!settings.reconciler.forward_partition_bootable);
        Ok(())
    }

    #[test]
    fn test_invalid_settings_are_rejected() -> Result<()> {
        let file = write_temp(".toml", "timeout = \"forever\"\n")?;
        let error = Settings::from_file(file.path())
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        assert!(error.contains("Failed to parse settings"));
        Ok(())
    }

    #[test]
    fn test_flags_override_settings() -> Result<()> {
        let file = write_temp(".json", r#"{"base_url": "http://file.example/MAAS/"}"#)?;
        let url: Url = "http://flag.example/MAAS/".parse()?;
        let settings = Settings::resolve(Some(file.path()), Some(url), true)?;
        assert_eq!(
            settings.maas.base_url.as_ref().map(Url::as_str),
            Some("http://flag.example/MAAS/")
        );
        assert!(settings.reconciler.forward_partition_bootable);
        Ok(())
    }
}
