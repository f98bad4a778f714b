//! Data client - Queries the REDCap API and normalizes responses into records.
//!
//! Record-level requests fan out over every access token and concatenate the
//! results in token order: each token is an account that sees its own subset
//! of participants. Metadata-level requests are the same for every account on
//! the project and go out once, with the first token only.
//!
//! Every record-level result keeps only enrolled participants.

pub mod query;
pub mod transport;

pub use query::{Content, Query};
pub use transport::{HttpTransport, Transport};

use crate::config::StudyConfig;
use crate::error::TransportError;
use crate::records::RecordSet;
use crate::vault::Credentials;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Issues queries for one set of credentials.
#[derive(Clone)]
pub struct DataClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    study: StudyConfig,
}

impl DataClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, study: StudyConfig) -> Self {
        Self {
            transport,
            credentials,
            study,
        }
    }

    /// Enrolled participants at the baseline event, with id, baseline
    /// timestamp and data access group.
    pub async fn list_participants(&self) -> Result<RecordSet, TransportError> {
        let query = Query::records()
            .field(&self.study.enroll_field)
            .field(&self.study.id_field)
            .field(&self.study.baseline_timestamp_field)
            .event(&self.study.baseline_event);
        self.fetch_enrolled(&query).await
    }

    /// Full instrument metadata (one row per field).
    pub async fn list_instruments(&self) -> Result<RecordSet, TransportError> {
        self.fetch_first(&Query::metadata()).await
    }

    /// Event -> instrument mapping, reduced to `unique_event_name` and `form`.
    pub async fn list_form_event_mapping(&self) -> Result<RecordSet, TransportError> {
        let rows = self.fetch_first(&Query::form_event_mapping()).await?;
        Ok(query::project_event_mapping(rows))
    }

    /// Metadata rows of the named instruments.
    pub async fn get_data_dictionary(
        &self,
        instruments: &[&str],
    ) -> Result<RecordSet, TransportError> {
        let query = instruments
            .iter()
            .fold(Query::metadata(), |q, name| q.form(*name));
        self.fetch_first(&query).await
    }

    /// All enrolled rows of one instrument.
    pub async fn get_instrument(&self, name: &str) -> Result<RecordSet, TransportError> {
        let query = Query::records()
            .form(name)
            .field(&self.study.id_field)
            .field(&self.study.enroll_field);
        self.fetch_enrolled(&query).await
    }

    /// All enrolled rows of one field.
    pub async fn get_measure(&self, field: &str) -> Result<RecordSet, TransportError> {
        let query = Query::records()
            .field(field)
            .field(&self.study.id_field)
            .field(&self.study.enroll_field);
        self.fetch_enrolled(&query).await
    }

    /// Run `query` with the first token only. No token or no URL means no
    /// request and an empty result.
    async fn fetch_first(&self, query: &Query) -> Result<RecordSet, TransportError> {
        let Some(token) = self.credentials.first_token() else {
            debug!("No access token configured, {} query skipped", query.content.as_str());
            return Ok(RecordSet::new());
        };
        if !self.credentials.has_base_url() {
            debug!("No base URL configured, {} query skipped", query.content.as_str());
            return Ok(RecordSet::new());
        }
        self.fetch(query, token).await
    }

    /// Run `query` for every token, concatenate, keep enrolled rows.
    async fn fetch_enrolled(&self, query: &Query) -> Result<RecordSet, TransportError> {
        if self.credentials.access_tokens.is_empty() {
            warn!("No access tokens configured, returning no records");
            return Ok(RecordSet::new());
        }
        if !self.credentials.has_base_url() {
            return Err(TransportError::NoBaseUrl);
        }

        let per_token = try_join_all(
            self.credentials
                .access_tokens
                .iter()
                .map(|token| self.fetch(query, token)),
        )
        .await?;

        let enrolled_column = self.study.enrolled_column();
        let rows: RecordSet = per_token
            .into_iter()
            .flatten()
            .filter(|row| row.get(&enrolled_column).map(String::as_str) == Some("1"))
            .collect();
        debug!("{} enrolled row(s)", rows.len());
        Ok(rows)
    }

    async fn fetch(&self, query: &Query, token: &str) -> Result<RecordSet, TransportError> {
        let body = self
            .transport
            .post_form(&self.credentials.base_url, &query.to_form(token))
            .await?;
        query::parse_rows(&body)
    }
}
