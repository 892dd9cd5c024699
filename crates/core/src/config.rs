use crate::error::ConfigError;
use crate::selection::StageMapping;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_SKIP_STATUS: &str = "SL Skipped";
pub const DEFAULT_MOCK_FILE: &str = "mock-recommendations.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(rename = "qTestUrl")]
    pub qtest_url: String,
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealights: Option<SealightsConfig>,
    #[serde(default)]
    pub user_lab_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub test_stage_mapping: StageMapping,
    #[serde(default)]
    pub recommendations: RecommendationsConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Base64 `client:secret` sent as HTTP Basic during the password grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Bearer(String),
    Password {
        username: String,
        password: String,
        client_credentials: String,
    },
}

impl AuthConfig {
    pub fn method(&self) -> Result<AuthMethod, ConfigError> {
        if let Some(token) = self.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(AuthMethod::Bearer(token.to_string()));
        }
        match (&self.username, &self.password, &self.client_credentials) {
            (Some(u), Some(p), Some(c)) if !u.is_empty() && !p.is_empty() && !c.is_empty() => {
                Ok(AuthMethod::Password {
                    username: u.clone(),
                    password: p.clone(),
                    client_credentials: c.clone(),
                })
            }
            _ => Err(ConfigError::MissingAuth),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealightsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_status_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_mock_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_file: Option<String>,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.qtest_url.starts_with("http") {
            return Err(ConfigError::InvalidUrl(self.qtest_url.clone()));
        }
        self.auth.method()?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.qtest_url.trim_end_matches('/')
    }

    pub fn skip_status_name(&self) -> &str {
        self.recommendations
            .skip_status_name
            .as_deref()
            .unwrap_or(DEFAULT_SKIP_STATUS)
    }

    pub fn mock_mode(&self) -> bool {
        self.recommendations.enable_mock_mode.unwrap_or(true)
    }

    pub fn mock_file(&self, workdir: &Path) -> PathBuf {
        workdir.join(
            self.recommendations
                .mock_file
                .as_deref()
                .unwrap_or(DEFAULT_MOCK_FILE),
        )
    }

    pub fn sealights_token(&self) -> Option<&str> {
        self.sealights.as_ref()?.token.as_deref()
    }

    /// Base URL of the recommendation server, if one can be determined.
    ///
    /// A configured token's claims take precedence over `backendUrl`.
    pub fn sealights_base_url(&self) -> Option<String> {
        let sl = self.sealights.as_ref()?;
        let url = match sl.token.as_deref() {
            Some(token) => backend_url_from_token(token).or_else(|| sl.backend_url.clone()),
            None => sl.backend_url.clone(),
        }?;
        let url = url.trim_end_matches('/');
        Some(url.strip_suffix("/api").unwrap_or(url).to_string())
    }

    /// Lab for a user, by exact key.
    pub fn lab_for(&self, user: &str) -> Option<&str> {
        self.user_lab_mapping.get(user).map(String::as_str)
    }

    /// Pick the user a run is performed for: the requested one, else the
    /// configured username, else the first mapped user.
    pub fn select_user(&self, requested: Option<&str>) -> Result<UserSelection, ConfigError> {
        let email = match requested {
            Some(u) => {
                let is_current = self.auth.username.as_deref() == Some(u);
                if !is_current && !self.user_lab_mapping.contains_key(u) {
                    return Err(ConfigError::UnknownUser(u.to_string()));
                }
                u.to_string()
            }
            None => self
                .auth
                .username
                .clone()
                .or_else(|| self.user_lab_mapping.keys().next().cloned())
                .ok_or(ConfigError::NoUsers)?,
        };
        let lab_id = self.lab_for(&email).map(str::to_string);
        Ok(UserSelection { email, lab_id })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSelection {
    pub email: String,
    pub lab_id: Option<String>,
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

/// Read the server URL out of a recommendation-server JWT.
///
/// Looks at `x-sl-server`, then `backendUrl`, then an `iss` that is a URL.
pub fn backend_url_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = decode_segment(payload)?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let claim = |key: &str| claims.get(key).and_then(|v| v.as_str()).map(str::to_string);
    claim("x-sl-server")
        .or_else(|| claim("backendUrl"))
        .or_else(|| claim("iss").filter(|iss| iss.starts_with("http")))
}
