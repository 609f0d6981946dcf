//! Request status tracking and the retrieve-then-extract pipeline
//!
//! A unit of work is one repository. Its progress is recorded in the
//! `retrieve_requests` collection as `queued`, then `processing`, then
//! `success` or `error`, keyed by the caller's request id.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::extractor::{BuildMetricsExtractor, ExtractError, ExtractionSummary, SummaryStatus};
use crate::retriever::{RepoRetriever, RetrieveError};
use crate::store::collections::RETRIEVE_REQUESTS;
use crate::store::{ResourceRepository, Selector, StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Retrieval failed: {0}")]
    Retrieve(#[from] RetrieveError),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Processing,
    Success,
    Error,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Success | RequestStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub request_id: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `(owner, repo)` of a `https://github.com/<owner>/<repo>` URL.
///
/// Anything not hosted on github.com, or with fewer than two path
/// segments, is rejected.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if parsed.host_str() != Some("github.com") {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    Some((owner.to_string(), repo.to_string()))
}

#[derive(Clone)]
pub struct RequestTracker {
    docs: ResourceRepository,
}

impl RequestTracker {
    pub fn new(docs: ResourceRepository) -> Self {
        Self { docs }
    }

    pub async fn enqueue(&self, request_id: &str) -> StoreResult<StatusRecord> {
        self.mark(request_id, RequestStatus::Queued, None, None).await
    }

    /// Record a status transition. Fields left `None` keep their stored value.
    pub async fn mark(
        &self,
        request_id: &str,
        status: RequestStatus,
        data: Option<Value>,
        error: Option<String>,
    ) -> StoreResult<StatusRecord> {
        let record = StatusRecord {
            request_id: request_id.to_string(),
            status,
            data,
            error,
            updated_at: Utc::now(),
        };
        let doc = serde_json::to_value(&record)?;
        self.docs
            .upsert(RETRIEVE_REQUESTS, &Selector::new().eq("request_id", request_id), &doc)
            .await?;
        Ok(record)
    }

    pub async fn status(&self, request_id: &str) -> StoreResult<Option<StatusRecord>> {
        let Some(doc) = self
            .docs
            .find_one(RETRIEVE_REQUESTS, &Selector::new().eq("request_id", request_id))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(doc)?))
    }
}

/// Full retrieval followed by extraction, for one repository.
pub struct Pipeline {
    retriever: RepoRetriever,
    extractor: BuildMetricsExtractor,
    tracker: RequestTracker,
}

impl Pipeline {
    pub fn new(retriever: RepoRetriever, extractor: BuildMetricsExtractor, tracker: RequestTracker) -> Self {
        Self {
            retriever,
            extractor,
            tracker,
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub async fn run(&self, owner: &str, repo: &str) -> PipelineResult<ExtractionSummary> {
        info!("Retrieving repository {owner}/{repo}");
        self.retriever.retrieve_full_repo(owner, repo).await?;
        info!("Extracting build data for {owner}/{repo}");
        Ok(self.extractor.extract_builds(owner, repo).await?)
    }

    /// Run the pipeline under a tracked request id. The request always ends
    /// in a terminal status, which is returned.
    pub async fn run_request(&self, owner: &str, repo: &str, request_id: &str) -> StatusRecord {
        info!("Processing job for {owner}/{repo} (request_id: {request_id})");
        if let Err(e) = self.tracker.mark(request_id, RequestStatus::Processing, None, None).await {
            warn!("Cannot record processing status for {request_id}: {e}");
        }

        let (status, data, failure) = match self.run(owner, repo).await {
            Ok(summary) => {
                let status = match summary.status {
                    SummaryStatus::Success => RequestStatus::Success,
                    SummaryStatus::Error => RequestStatus::Error,
                };
                let failure = (status == RequestStatus::Error).then(|| summary.message.clone());
                (status, serde_json::to_value(&summary).ok(), failure)
            }
            Err(e) => {
                error!("Request {request_id} for {owner}/{repo} failed: {e}");
                (RequestStatus::Error, None, Some(e.to_string()))
            }
        };

        match self.tracker.mark(request_id, status, data.clone(), failure.clone()).await {
            Ok(record) => record,
            Err(e) => {
                error!("Cannot record final status for {request_id}: {e}");
                StatusRecord {
                    request_id: request_id.to_string(),
                    status,
                    data,
                    error: failure,
                    updated_at: Utc::now(),
                }
            }
        }
    }
}
