use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use super::error::BatchError;
use super::types::{
    ApiErrorBody, CreateJobRequest, CreateJobResponse, InputDataConfig, JobDescription,
    OutputDataConfig,
};
use crate::error::StepError;
use crate::ports::{DispatchRequest, JobDispatcher, ProbeResult, StatusProber};
use crate::workflow::JobHandle;

const JOBS_PATH: &str = "model-invocation-job";

/// HTTP client for the batch inference service.
///
/// Acts as both the job dispatcher and the status prober of the workflow.
pub struct BatchClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model_id: String,
    role_arn: Option<String>,
}

impl BatchClient {
    pub fn new(base_url: &str, model_id: impl Into<String>) -> Result<Self, BatchError> {
        let base_url = Url::parse(base_url).map_err(|e| BatchError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(BatchError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: None,
            model_id: model_id.into(),
            role_arn: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    pub fn with_role_arn(mut self, role_arn: Option<String>) -> Self {
        self.role_arn = role_arn;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Submit a model invocation job.
    pub async fn create_job(
        &self,
        req: &CreateJobRequest,
    ) -> Result<CreateJobResponse, BatchError> {
        let url = self.jobs_url(&[])?;
        let response = self.send(self.client.post(url).json(req)).await?;
        Ok(response.json::<CreateJobResponse>().await?)
    }

    /// Describe a job, including its current status.
    pub async fn get_job(&self, handle: &JobHandle) -> Result<JobDescription, BatchError> {
        let url = self.jobs_url(&[handle.as_str()])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json::<JobDescription>().await?)
    }

    /// Ask the service to stop a running job. The workflow picks the stop up
    /// on its next poll.
    pub async fn stop_job(&self, handle: &JobHandle) -> Result<(), BatchError> {
        let url = self.jobs_url(&[handle.as_str(), "stop"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    fn jobs_url(&self, segments: &[&str]) -> Result<Url, BatchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BatchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(JOBS_PATH)
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BatchError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "batch service responded");

        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body.message.clone().unwrap_or_else(|| text.clone());

        if status == StatusCode::TOO_MANY_REQUESTS || body.is_quota_exceeded() {
            return Err(BatchError::QuotaExceeded { message });
        }
        Err(BatchError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl JobDispatcher for BatchClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<JobHandle, StepError> {
        let req = CreateJobRequest {
            job_name: request.job_name.clone(),
            model_id: self.model_id.clone(),
            role_arn: self.role_arn.clone(),
            input_data_config: InputDataConfig {
                uri: request.input_location.clone(),
                input_format: "JSONL".to_string(),
            },
            output_data_config: OutputDataConfig {
                uri: request.output_location.clone(),
            },
        };
        let response = self
            .create_job(&req)
            .await
            .map_err(BatchError::into_dispatch_error)?;
        if response.job_arn.is_empty() {
            return Err(StepError::Dispatch(
                "service returned an empty job identifier".into(),
            ));
        }
        Ok(JobHandle::new(response.job_arn))
    }
}

#[async_trait]
impl StatusProber for BatchClient {
    async fn probe(&self, handle: &JobHandle) -> Result<ProbeResult, StepError> {
        let desc = self
            .get_job(handle)
            .await
            .map_err(BatchError::into_probe_error)?;
        Ok(ProbeResult {
            status: desc.status_or_empty().to_string(),
            job_handle: handle.clone(),
            message: desc.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatch_request() -> DispatchRequest {
        DispatchRequest {
            job_name: "j1".into(),
            input_location: "s3://bucket/g1/jobs/j1/input/g1_j1.jsonl".into(),
            output_location: "s3://bucket/g1/jobs/j1/output/".into(),
        }
    }

    fn client(server: &MockServer) -> BatchClient {
        BatchClient::new(&server.uri(), "anthropic.claude-3-haiku-20240307-v1:0")
            .unwrap()
            .with_api_key("secret")
    }

    #[tokio::test]
    async fn dispatch_returns_job_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/model-invocation-job"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "jobName": "j1",
                "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
                "inputDataConfig": {"uri": "s3://bucket/g1/jobs/j1/input/g1_j1.jsonl"}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"jobArn": "job-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = client(&server).dispatch(&dispatch_request()).await.unwrap();
        assert_eq!(handle.as_str(), "job-123");
    }

    #[tokio::test]
    async fn too_many_requests_is_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server).dispatch(&dispatch_request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn quota_error_code_is_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "ServiceQuotaExceededException",
                "message": "concurrent job limit reached"
            })))
            .mount(&server)
            .await;

        let err = client(&server).dispatch(&dispatch_request()).await.unwrap_err();
        assert!(
            matches!(&err, StepError::QuotaExceeded(msg) if msg == "concurrent job limit reached")
        );
    }

    #[tokio::test]
    async fn other_errors_are_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "__type": "AccessDeniedException",
                "message": "not authorized"
            })))
            .mount(&server)
            .await;

        let err = client(&server).dispatch(&dispatch_request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn probe_returns_raw_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model-invocation-job/job-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobArn": "job-123",
                "status": "Scheduled",
                "message": "waiting for capacity"
            })))
            .mount(&server)
            .await;

        let probe = client(&server).probe(&JobHandle::new("job-123")).await.unwrap();
        assert_eq!(probe.status, "Scheduled");
        assert_eq!(probe.message.as_deref(), Some("waiting for capacity"));
        assert_eq!(probe.job_handle.as_str(), "job-123");
    }

    #[tokio::test]
    async fn null_status_keeps_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model-invocation-job/job-123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": null})),
            )
            .mount(&server)
            .await;

        let probe = client(&server).probe(&JobHandle::new("job-123")).await.unwrap();
        assert_eq!(probe.status, "");
        assert_eq!(
            crate::workflow::OutcomeRouter::route(&probe.status),
            crate::workflow::Route::ContinuePolling
        );
    }

    #[tokio::test]
    async fn probe_failure_is_probe_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).probe(&JobHandle::new("job-123")).await.unwrap_err();
        assert!(matches!(err, StepError::Probe(_)));
    }

    #[tokio::test]
    async fn stop_job_posts_to_stop_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/model-invocation-job/job-123/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .stop_job(&JobHandle::new("job-123"))
            .await
            .unwrap();
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            BatchClient::new("not a url", "model"),
            Err(BatchError::InvalidUrl(_))
        ));
    }
}
