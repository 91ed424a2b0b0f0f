//! REST client for benchmark, cube and dataset records.
//!
//! Every record fetched from the server is mirrored locally so offline runs
//! can resolve it later.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::cube::is_synthetic;
use crate::effects::MetadataClient;
use crate::entities::{BenchmarkRecord, CubeRecord, DatasetRecord};
use crate::error::TestError;
use crate::records::RecordStore;

pub struct RestMetadataClient {
    base_url: String,
    token: Option<String>,
    client: Client,
    records: RecordStore,
}

impl RestMetadataClient {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        client: Client,
        records: RecordStore,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
            records,
        }
    }

    /// # Errors
    /// Returns an error when the http client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = medperf_store::http_client(config.network().timeout)?;
        Ok(Self::new(
            config.server().url.clone(),
            config.server().token.clone(),
            client,
            RecordStore::new(config.storage().clone()),
        ))
    }

    fn get_json<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!(%url, "fetching record");
        let response = request
            .send()
            .with_context(|| format!("failed to reach the server for {what}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(
                TestError::invalid_argument(format!("{what} was not found on the server")).into(),
            );
        }
        if !status.is_success() {
            anyhow::bail!("server responded with status {status} for {what}");
        }
        response
            .json()
            .with_context(|| format!("failed to decode {what}"))
    }

    fn missing_locally(what: &str) -> anyhow::Error {
        TestError::invalid_argument(format!("{what} is not available locally")).into()
    }
}

impl MetadataClient for RestMetadataClient {
    fn get_benchmark(&self, id: u64, local_only: bool) -> Result<BenchmarkRecord> {
        let what = format!("benchmark {id}");
        if local_only {
            return self
                .records
                .load_benchmark(id)?
                .ok_or_else(|| Self::missing_locally(&what));
        }
        let record: BenchmarkRecord = self.get_json(&what, &format!("benchmarks/{id}/"))?;
        self.records.save_benchmark(&record)?;
        Ok(record)
    }

    fn get_cube(&self, id: &str, local_only: bool) -> Result<CubeRecord> {
        let what = format!("mlcube {id}");
        let local = self.records.load_cube(id)?;
        if local_only || is_synthetic(id) {
            return local.ok_or_else(|| Self::missing_locally(&what));
        }
        let mut record: CubeRecord = self.get_json(&what, &format!("mlcubes/{id}/"))?;
        if let Some(previous) = &local {
            record.inherit_hashes(previous);
        }
        self.records.save_cube(&record)?;
        Ok(record)
    }

    fn get_dataset(&self, uid: &str, local_only: bool) -> Result<DatasetRecord> {
        let what = format!("dataset {uid}");
        if let Some(record) = self.records.load_dataset(uid)? {
            return Ok(record);
        }
        if local_only || !uid.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(Self::missing_locally(&what));
        }
        let record: DatasetRecord = self.get_json(&what, &format!("datasets/{uid}/"))?;
        self.records.save_dataset(uid, &record)?;
        Ok(record)
    }
}
