//! Status probe seam and its HTTP implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const SERVICES_STATUS_PATH: &str = "/v3/system/services/status";
pub const SYSTEM_STATUS_PATH: &str = "/v3/namespaces/system/status";

/// A system program whose status is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRef {
    pub app_id: String,
    pub program_type: String,
    pub program_id: String,
}

impl ProgramRef {
    fn service(app: &str, program: &str) -> Self {
        Self { app_id: app.to_string(), program_type: "Service".to_string(), program_id: program.to_string() }
    }
}

/// The two system applications that must be up for the platform to be ready.
pub fn system_checks() -> Vec<ProgramRef> {
    vec![ProgramRef::service("dataprep", "service"), ProgramRef::service("pipeline", "studio")]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStatus {
    pub status_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of platform status.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Internal service name to status string.
    async fn services_status(&self, router: &str) -> Result<BTreeMap<String, String>, ProbeError>;

    async fn system_app_status(&self, router: &str, checks: &[ProgramRef]) -> Result<Vec<ProgramStatus>, ProbeError>;
}

/// Plain HTTP probe against the router.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

fn transport(e: reqwest::Error) -> ProbeError {
    if e.is_decode() {
        ProbeError::Decode(e.to_string())
    } else {
        ProbeError::Transport(e.to_string())
    }
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(transport)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self { Self { client } }
}

fn url(router: &str, path: &str) -> String { format!("{}{}", router.trim_end_matches('/'), path) }

#[async_trait]
impl StatusProbe for HttpProbe {
    async fn services_status(&self, router: &str) -> Result<BTreeMap<String, String>, ProbeError> {
        let resp = self.client.get(url(router, SERVICES_STATUS_PATH)).send().await.map_err(transport)?;
        let resp = resp.error_for_status().map_err(transport)?;
        resp.json().await.map_err(transport)
    }

    async fn system_app_status(&self, router: &str, checks: &[ProgramRef]) -> Result<Vec<ProgramStatus>, ProbeError> {
        let resp = self.client.post(url(router, SYSTEM_STATUS_PATH)).json(checks).send().await.map_err(transport)?;
        let resp = resp.error_for_status().map_err(transport)?;
        resp.json().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_check_body_is_fixed() {
        let body = serde_json::to_string(&system_checks()).unwrap();
        assert_eq!(
            body,
            r#"[{"appId":"dataprep","programType":"Service","programId":"service"},{"appId":"pipeline","programType":"Service","programId":"studio"}]"#
        );
    }

    #[test]
    fn urls_join_without_double_slash() {
        assert_eq!(url("http://r:11015/", SERVICES_STATUS_PATH), "http://r:11015/v3/system/services/status");
    }

    #[test]
    fn program_status_tolerates_extra_fields() {
        let v: Vec<ProgramStatus> =
            serde_json::from_str(r#"[{"appId":"dataprep","statusCode":200,"status":"RUNNING"},{"statusCode":404,"error":"not found"}]"#).unwrap();
        assert_eq!(v[0].status_code, 200);
        assert_eq!(v[1].error.as_deref(), Some("not found"));
    }
}
