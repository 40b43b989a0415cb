//! Session implementation over the JSON volume gateway.
//!
//! Login posts basic-auth credentials to `{endpoint}/session` and keeps the
//! returned token for every later request. Volume operations are submitted
//! under `{endpoint}/cns/` and answer with a task identifier that is polled
//! through `{endpoint}/cns/tasks/{task}`.

mod error;
mod protocol;
mod trace;

use std::fmt;

use log::{debug, info, warn};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ConnectOptions;
use crate::session::{Session, SessionFuture, TaskHandle, TaskInfo, TaskResult};
use crate::volume::{DatastoreRef, DeleteRequest, QueryFilter, VolumeCreateRequest};
use protocol::{
    CreateVolumeBody, DatastoreResponse, DeleteVolumeBody, QueryVolumeBody, SubmitResponse,
    WireOperationResult, WireTaskInfo,
};
use trace::{TraceEntry, TraceRecorder, response_value};

pub use error::HttpSessionError;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Authenticated session against the volume gateway.
pub struct HttpSession {
    client: Client,
    base: Url,
    token: String,
    trace: Option<TraceRecorder>,
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpSession")
            .field("base", &self.base.as_str())
            .field("token", &"<redacted>")
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

impl HttpSession {
    /// Logs in and returns a ready session.
    ///
    /// # Errors
    ///
    /// Returns [`HttpSessionError::Unauthorized`] when the credentials are
    /// rejected and other [`HttpSessionError`] variants when the endpoint is
    /// unreachable or answers unexpectedly.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, HttpSessionError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .build()
            .map_err(|err| HttpSessionError::Client {
                message: err.to_string(),
            })?;
        let trace = options
            .trace_dir
            .as_deref()
            .and_then(|path| match TraceRecorder::open(path) {
                Ok(recorder) => Some(recorder),
                Err(err) => {
                    warn!("request tracing disabled: cannot open {path}: {err}");
                    None
                }
            });

        info!("connecting to {}", options.endpoint);
        let url = join_url(&options.endpoint, &["session"])?;
        let response = client
            .post(url.clone())
            .basic_auth(
                &options.credentials.username,
                Some(&options.credentials.password),
            )
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if let Some(recorder) = &trace {
            recorder.record(&TraceEntry {
                operation: "login",
                method: Method::POST.as_str(),
                url: url.as_str(),
                request: None,
                status: status.as_u16(),
                response: response_value(&body),
            });
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(HttpSessionError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(HttpSessionError::Status {
                operation: String::from("login"),
                status: status.as_u16(),
                body,
            });
        }
        let token: String = decode("login", &body)?;
        debug!("session established with {}", options.endpoint);

        Ok(Self {
            client,
            base: options.endpoint.clone(),
            token,
            trace,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        segments: &[&str],
    ) -> Result<T, HttpSessionError> {
        self.exchange(operation, Method::GET, segments, None).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<T, HttpSessionError> {
        let payload = serde_json::to_value(body).map_err(|err| HttpSessionError::Decode {
            operation: operation.to_owned(),
            message: err.to_string(),
        })?;
        self.exchange(operation, Method::POST, segments, Some(payload))
            .await
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
    ) -> Result<T, HttpSessionError> {
        let url = join_url(&self.base, segments)?;
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(SESSION_HEADER, &self.token);
        if let Some(payload) = &body {
            request = request.json(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if let Some(recorder) = &self.trace {
            recorder.record(&TraceEntry {
                operation,
                method: method.as_str(),
                url: url.as_str(),
                request: body.as_ref(),
                status: status.as_u16(),
                response: response_value(&text),
            });
        }

        if !status.is_success() {
            return Err(HttpSessionError::Status {
                operation: operation.to_owned(),
                status: status.as_u16(),
                body: text,
            });
        }
        decode(operation, &text)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T, HttpSessionError> {
    serde_json::from_str(body).map_err(|err| HttpSessionError::Decode {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

fn join_url(base: &Url, segments: &[&str]) -> Result<Url, HttpSessionError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| HttpSessionError::Url {
            message: format!("{base} cannot be used as a base URL"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl Session for HttpSession {
    type Error = HttpSessionError;

    fn find_datastore<'a>(
        &'a self,
        datacenter: &'a str,
        datastore: &'a str,
    ) -> SessionFuture<'a, DatastoreRef, Self::Error> {
        Box::pin(async move {
            let found: DatastoreResponse = self
                .get(
                    "find-datastore",
                    &["cns", "datacenters", datacenter, "datastores", datastore],
                )
                .await?;
            Ok(DatastoreRef::new(found.reference, found.url))
        })
    }

    fn submit_create_volume<'a>(
        &'a self,
        request: &'a VolumeCreateRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let submitted: SubmitResponse = self
                .post(
                    "create-volume",
                    &["cns", "volumes", "create"],
                    &CreateVolumeBody::from(request),
                )
                .await?;
            Ok(TaskHandle::new(submitted.task))
        })
    }

    fn submit_query_volume<'a>(
        &'a self,
        filter: &'a QueryFilter,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let submitted: SubmitResponse = self
                .post(
                    "query-volume",
                    &["cns", "volumes", "query"],
                    &QueryVolumeBody::from(filter),
                )
                .await?;
            Ok(TaskHandle::new(submitted.task))
        })
    }

    fn submit_delete_volume<'a>(
        &'a self,
        request: &'a DeleteRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let submitted: SubmitResponse = self
                .post(
                    "delete-volume",
                    &["cns", "volumes", "delete"],
                    &DeleteVolumeBody::from(request),
                )
                .await?;
            Ok(TaskHandle::new(submitted.task))
        })
    }

    fn task_info<'a>(
        &'a self,
        handle: &'a TaskHandle,
    ) -> SessionFuture<'a, TaskInfo, Self::Error> {
        Box::pin(async move {
            let info: WireTaskInfo = self
                .get("task-info", &["cns", "tasks", handle.as_str()])
                .await?;
            Ok(TaskInfo {
                handle: TaskHandle::new(info.task),
                state: info.state,
                error: info.error,
                result: info.result,
            })
        })
    }

    fn task_result(&self, info: &TaskInfo) -> Result<Option<TaskResult>, Self::Error> {
        info.result
            .clone()
            .map(serde_json::from_value::<WireOperationResult>)
            .transpose()
            .map(|result| result.map(TaskResult::from))
            .map_err(|err| HttpSessionError::Decode {
                operation: String::from("task-result"),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_appends_encoded_segments() {
        let base = Url::parse("https://vc.example/api/").expect("url");
        let url = join_url(&base, &["cns", "datacenters", "DC 1"]).expect("join");
        assert_eq!(url.as_str(), "https://vc.example/api/cns/datacenters/DC%201");
    }

    #[test]
    fn join_url_rejects_opaque_bases() {
        let base = Url::parse("mailto:ops@example.com").expect("url");
        assert!(matches!(
            join_url(&base, &["session"]),
            Err(HttpSessionError::Url { .. })
        ));
    }
}
