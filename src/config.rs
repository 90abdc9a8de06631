use anyhow::{Context, Result, anyhow, bail};
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use url::Url;

pub const KEYRING_SERVICE: &str = "repo-import-access-token";
pub const KEYRING_USER: &str = "Repository";
pub const DEFAULT_CLOUD_BASE_URL: &str = "https://api.laserfiche.com/repository/";
pub const ROOT_FOLDER_ENTRY_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorizationType {
    #[default]
    #[serde(rename = "CLOUD_ACCESS_KEY")]
    CloudAccessKey,
    #[serde(rename = "API_SERVER_USERNAME_PASSWORD")]
    ApiServerUsernamePassword,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub authorization_type: Option<AuthorizationType>,
    pub repository_id: Option<String>,
    pub repository_api_base_url: Option<Url>,
    pub default_folder_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    authorization_type: Option<AuthorizationType>,
    repository_id: Option<String>,
    repository_api_base_url: Option<Url>,
    apiserver_repository_api_base_url: Option<Url>,
    repository_access_token: Option<String>,
    default_folder_id: Option<i64>,
}

pub struct Config {
    pub authorization_type: AuthorizationType,
    pub repository_id: String,
    pub repository_api_base_url: Url,
    pub access_token: String,
    pub default_folder_id: i64,
}

fn merge_config(
    base: ConfigFile,
    override_config: ConfigEnv,
    keyring_token: impl FnOnce() -> Result<String>,
) -> Result<Config> {
    let authorization_type = override_config
        .authorization_type
        .or(base.authorization_type)
        .unwrap_or_default();

    let repository_id = override_config
        .repository_id
        .or(base.repository_id)
        .filter(|id| !id.is_empty())
        .ok_or(anyhow!("No repository ID provided (set REPOSITORY_ID)"))?;

    let configured_url = override_config
        .repository_api_base_url
        .or(override_config.apiserver_repository_api_base_url)
        .or(base.repository_api_base_url);

    let repository_api_base_url = match (authorization_type, configured_url) {
        (_, Some(url)) => url,
        (AuthorizationType::CloudAccessKey, None) => Url::parse(DEFAULT_CLOUD_BASE_URL)?,
        (AuthorizationType::ApiServerUsernamePassword, None) => bail!(
            "A self-hosted repository requires REPOSITORY_API_BASE_URL to be set"
        ),
    };

    let access_token = match override_config.repository_access_token {
        Some(token) => token,
        None => keyring_token()?,
    };

    Ok(Config {
        authorization_type,
        repository_id,
        repository_api_base_url,
        access_token,
        default_folder_id: override_config
            .default_folder_id
            .or(base.default_folder_id)
            .unwrap_or(ROOT_FOLDER_ENTRY_ID),
    })
}

fn config_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "repo-import", "repo-import")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

fn read_keyring_token() -> Result<String> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    let token = entry.get_secret().context(
        "Access token not specified via REPOSITORY_ACCESS_TOKEN nor present in OS keyring",
    )?;
    Ok(String::from_utf8(token)?)
}

pub fn read_config_file() -> Result<ConfigFile> {
    let config_file = config_path()?;
    match fs::read_to_string(&config_file) {
        Ok(config) => toml::from_str(&config)
            .with_context(|| format!("Failed to parse {}", config_file.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().context("Invalid environment configuration")?;

    merge_config(read_config_file()?, env_config, read_keyring_token)
}

pub fn write_config(config: ConfigFile) -> Result<PathBuf> {
    let config_file = config_path()?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_file, toml::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(config_file)
}

pub fn set_access_token_keyring(token: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(token.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_keyring() -> Result<String> {
        Err(anyhow!("keyring unavailable"))
    }

    fn env_with_token() -> ConfigEnv {
        ConfigEnv {
            repository_access_token: Some("env-token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn environment_overrides_file() {
        let file = ConfigFile {
            authorization_type: Some(AuthorizationType::ApiServerUsernamePassword),
            repository_id: Some("file-repo".to_string()),
            repository_api_base_url: Some(Url::parse("https://file.example.com/api/").unwrap()),
            default_folder_id: Some(12),
        };
        let env = ConfigEnv {
            repository_id: Some("env-repo".to_string()),
            default_folder_id: Some(34),
            ..env_with_token()
        };

        let config = merge_config(file, env, no_keyring).unwrap();

        assert_eq!(config.authorization_type, AuthorizationType::ApiServerUsernamePassword);
        assert_eq!(config.repository_id, "env-repo");
        assert_eq!(config.repository_api_base_url.as_str(), "https://file.example.com/api/");
        assert_eq!(config.access_token, "env-token");
        assert_eq!(config.default_folder_id, 34);
    }

    #[test]
    fn cloud_mode_defaults_base_url_and_root_folder() {
        let env = ConfigEnv {
            repository_id: Some("r-1".to_string()),
            ..env_with_token()
        };

        let config = merge_config(ConfigFile::default(), env, no_keyring).unwrap();

        assert_eq!(config.authorization_type, AuthorizationType::CloudAccessKey);
        assert_eq!(config.repository_api_base_url.as_str(), DEFAULT_CLOUD_BASE_URL);
        assert_eq!(config.default_folder_id, ROOT_FOLDER_ENTRY_ID);
    }

    #[test]
    fn self_hosted_requires_base_url() {
        let env = ConfigEnv {
            authorization_type: Some(AuthorizationType::ApiServerUsernamePassword),
            repository_id: Some("r-1".to_string()),
            ..env_with_token()
        };

        assert!(merge_config(ConfigFile::default(), env, no_keyring).is_err());
    }

    #[test]
    fn self_hosted_accepts_api_server_alias() {
        let env = ConfigEnv {
            authorization_type: Some(AuthorizationType::ApiServerUsernamePassword),
            repository_id: Some("r-1".to_string()),
            apiserver_repository_api_base_url: Some(
                Url::parse("https://lf.internal/LFRepositoryAPI/").unwrap(),
            ),
            ..env_with_token()
        };

        let config = merge_config(ConfigFile::default(), env, no_keyring).unwrap();
        assert_eq!(config.repository_api_base_url.host_str(), Some("lf.internal"));
    }

    #[test]
    fn token_falls_back_to_keyring() {
        let env = ConfigEnv {
            repository_id: Some("r-1".to_string()),
            ..Default::default()
        };

        let config = merge_config(ConfigFile::default(), env, || Ok("stored".to_string())).unwrap();
        assert_eq!(config.access_token, "stored");
    }

    #[test]
    fn missing_repository_id_is_an_error() {
        assert!(merge_config(ConfigFile::default(), env_with_token(), no_keyring).is_err());
    }

    #[test]
    fn authorization_type_parses_env_values() {
        let file: ConfigFile =
            toml::from_str("authorization_type = \"API_SERVER_USERNAME_PASSWORD\"").unwrap();
        assert_eq!(
            file.authorization_type,
            Some(AuthorizationType::ApiServerUsernamePassword)
        );
    }
}
