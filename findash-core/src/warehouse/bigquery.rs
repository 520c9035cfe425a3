//! BigQuery load jobs over the REST API.
//!
//! `jobs.insert` with a Parquet load configuration (autodetect,
//! WRITE_TRUNCATE), then `jobs.get` at a fixed interval until the job is
//! `DONE`, then `tables.get` for the resulting row count.

use super::{LoadReport, Warehouse};
use crate::auth::TokenSource;
use crate::domain::{RemoteObject, WarehouseTable};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    /// BigQuery encodes int64 fields as JSON strings.
    #[serde(default)]
    num_rows: Option<String>,
}

pub struct BigQueryWarehouse {
    client: reqwest::blocking::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl BigQueryWarehouse {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    pub fn with_base_url(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Load(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.job_timeout = timeout;
        self
    }

    fn token(&self) -> Result<String> {
        self.tokens
            .token()
            .map_err(|e| PipelineError::Load(e.to_string()))
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(self.token()?)
            .send()
            .map_err(|e| PipelineError::Load(format!("GET {url}: {e}")))?;
        parse_json(resp, url)
    }

    fn insert_job(&self, source: &RemoteObject, table: &WarehouseTable, location: &str) -> Result<Job> {
        let url = format!("{}/bigquery/v2/projects/{}/jobs", self.base_url, table.project);
        let body = json!({
            "jobReference": { "projectId": table.project, "location": location },
            "configuration": {
                "load": {
                    "sourceUris": [source.uri()],
                    "sourceFormat": "PARQUET",
                    "autodetect": true,
                    "writeDisposition": "WRITE_TRUNCATE",
                    "destinationTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                }
            }
        });

        debug!(%url, source = %source, table = %table, "inserting load job");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .map_err(|e| PipelineError::Load(format!("POST {url}: {e}")))?;
        parse_json(resp, &url)
    }

    fn wait_for_job(&self, project: &str, mut job: Job, location: &str) -> Result<()> {
        let started = Instant::now();
        let location = job
            .job_reference
            .location
            .clone()
            .unwrap_or_else(|| location.to_string());
        let url = format!(
            "{}/bigquery/v2/projects/{project}/jobs/{}",
            self.base_url, job.job_reference.job_id
        );

        loop {
            if job.status.state == "DONE" {
                return match job.status.error_result {
                    Some(err) => Err(PipelineError::Load(format!(
                        "job {} failed ({}): {}",
                        job.job_reference.job_id, err.reason, err.message
                    ))),
                    None => Ok(()),
                };
            }
            if started.elapsed() >= self.job_timeout {
                return Err(PipelineError::Load(format!(
                    "job {} still {} after {:?}",
                    job.job_reference.job_id, job.status.state, self.job_timeout
                )));
            }

            std::thread::sleep(self.poll_interval);
            job = self.get_json(&url, &[("location", location.as_str())])?;
            debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "polled load job");
        }
    }

    fn row_count(&self, table: &WarehouseTable) -> Result<u64> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.base_url, table.project, table.dataset, table.table
        );
        let resource: TableResource = self.get_json(&url, &[])?;
        match resource.num_rows {
            Some(n) => n
                .parse()
                .map_err(|e| PipelineError::Load(format!("numRows '{n}' for {table}: {e}"))),
            None => Ok(0),
        }
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(resp: reqwest::blocking::Response, url: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().unwrap_or_default();
        return Err(PipelineError::Load(format!("{url}: HTTP {status}: {detail}")));
    }
    resp.json()
        .map_err(|e| PipelineError::Load(format!("{url}: malformed response: {e}")))
}

impl Warehouse for BigQueryWarehouse {
    fn load(&self, source: &RemoteObject, table: &WarehouseTable, location: &str) -> Result<LoadReport> {
        let job = self.insert_job(source, table, location)?;
        self.wait_for_job(&table.project, job, location)?;
        let rows = self.row_count(table)?;
        info!("Loaded {} rows into {}", rows, table);
        Ok(LoadReport {
            table: table.clone(),
            rows,
        })
    }
}
