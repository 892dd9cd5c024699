use anyhow::Context;
use async_trait::async_trait;
use qbridge_core::{
    Config, ConfigError, ExcludedTest, RecommendationMetadata, RecommendationResponse,
    RecommendationStatus,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Who and what recommendations are requested for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationRequest {
    pub project_name: String,
    /// Overrides the stage named by the source, when set.
    pub test_stage: Option<String>,
    pub user_email: String,
    pub lab_id: Option<String>,
}

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> anyhow::Result<RecommendationResponse>;
}

/// Skips apply only to a ready, partial selection.
pub fn is_actionable(response: &RecommendationResponse) -> bool {
    response.metadata.status == RecommendationStatus::Ready && !response.metadata.is_full_run
}

pub fn default_response() -> RecommendationResponse {
    RecommendationResponse {
        metadata: RecommendationMetadata {
            app_name: "SampleApp".into(),
            branch_name: "main".into(),
            build_name: "build-123".into(),
            test_stage: "Regression".into(),
            test_group_id: "group-1".into(),
            test_selection_enabled: true,
            is_full_run: false,
            status: RecommendationStatus::Ready,
            full_run_reason: None,
        },
        excluded_tests: vec![
            ExcludedTest {
                test_name: "Some Test".into(),
            },
            ExcludedTest {
                test_name: "Another Test".into(),
            },
        ],
    }
}

/// Recommendations read from a local JSON file.
pub struct FileRecommendations {
    path: PathBuf,
}

impl FileRecommendations {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the sample file if none exists. Returns whether one was written.
    pub fn ensure_exists(&self) -> anyhow::Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        let text = serde_json::to_string_pretty(&default_response())?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("writing {}", self.path.display()))?;
        info!("created sample recommendations file {}", self.path.display());
        Ok(true)
    }
}

#[async_trait]
impl RecommendationSource for FileRecommendations {
    async fn recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> anyhow::Result<RecommendationResponse> {
        self.ensure_exists()?;
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let mut response: RecommendationResponse = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        if !request.project_name.is_empty() {
            response.metadata.app_name = request.project_name.clone();
        }
        if let Some(stage) = &request.test_stage {
            response.metadata.test_stage = stage.clone();
        }
        Ok(response)
    }
}

/// The configured source. Only file-backed recommendations are supported.
pub fn source_from_config(
    cfg: &Config,
    workdir: &Path,
) -> Result<Box<dyn RecommendationSource>, ConfigError> {
    if !cfg.mock_mode() {
        return Err(ConfigError::LiveRecommendationsUnsupported);
    }
    Ok(Box::new(FileRecommendations::new(cfg.mock_file(workdir))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actionable_requires_ready_partial_run() {
        let mut r = default_response();
        assert!(is_actionable(&r));
        r.metadata.is_full_run = true;
        assert!(!is_actionable(&r));
        r.metadata.is_full_run = false;
        r.metadata.status = RecommendationStatus::NotReady;
        assert!(!is_actionable(&r));
    }

    #[tokio::test]
    async fn missing_file_is_created_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileRecommendations::new(dir.path().join("mock-recommendations.json"));
        let request = RecommendationRequest {
            project_name: "Shop".into(),
            test_stage: Some("Smoke".into()),
            ..Default::default()
        };
        let response = source.recommendations(&request).await.unwrap();
        assert!(source.path().exists());
        assert_eq!(response.metadata.app_name, "Shop");
        assert_eq!(response.metadata.test_stage, "Smoke");
        assert_eq!(response.excluded_tests.len(), 2);
        assert!(!source.ensure_exists().unwrap());
    }

    #[test]
    fn stage_comes_from_file_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recs.json");
        std::fs::write(
            &path,
            r#"{"metadata":{"testStage":"Regression","status":"wontBeReady","isFullRun":true,"fullRunReason":"new build"},"excludedTests":[]}"#,
        )
        .unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let response = rt
            .block_on(FileRecommendations::new(&path).recommendations(&RecommendationRequest::default()))
            .unwrap();
        assert_eq!(response.metadata.test_stage, "Regression");
        assert_eq!(response.metadata.status, RecommendationStatus::WontBeReady);
        assert_eq!(response.metadata.full_run_reason.as_deref(), Some("new build"));
        assert!(!is_actionable(&response));
    }

    #[test]
    fn live_source_is_a_configuration_error() {
        let mut cfg: Config = serde_json::from_value(serde_json::json!({
            "qTestUrl": "https://x.example",
            "auth": { "bearerToken": "t" },
            "recommendations": { "enableMockMode": false }
        }))
        .unwrap();
        assert!(matches!(
            source_from_config(&cfg, Path::new(".")),
            Err(ConfigError::LiveRecommendationsUnsupported)
        ));
        cfg.recommendations.enable_mock_mode = Some(true);
        assert!(source_from_config(&cfg, Path::new(".")).is_ok());
    }
}
