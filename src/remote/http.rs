//! REST implementation of [`RemoteApi`].
//!
//! Talks to a GitLab-style `api/v4` surface with a bounded connection pool
//! and explicit timeouts. Redirects are never followed automatically; the
//! download path re-validates every hop against the SSRF guard. Every
//! response body is deserialized into an explicit DTO and validated before
//! use: a payload missing a required identifier fails that call with
//! [`RemoteError::Contract`].

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, LOCATION, RETRY_AFTER};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::{AttachmentConfig, HttpClientConfig};
use crate::error::RemoteError;
use crate::models::Instance;

use super::{
    IssueState, IssueStateFilter, IssueUpdate, NewIssue, RemoteApi, RemoteEpic, RemoteIssue,
    RemoteIteration, RemoteLabel, RemoteMilestone, RemoteNote, RemoteUser, TimeStats, UploadedFile,
    ssrf,
    ssrf::SsrfPolicy,
};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// How much of an error body is kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 512;

/// Production HTTP client for one or more platform instances.
pub struct HttpRemote {
    client: reqwest::Client,
    max_redirects: u32,
    ssrf_policy: SsrfPolicy,
}

impl HttpRemote {
    pub fn new(
        http: &HttpClientConfig,
        attachments: &AttachmentConfig,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(http.request_timeout_seconds))
            .connect_timeout(std::time::Duration::from_secs(
                http.connect_timeout_seconds,
            ))
            .pool_max_idle_per_host(http.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_redirects: attachments.max_redirects,
            ssrf_policy: SsrfPolicy {
                allow_private_networks: attachments.allow_private_networks,
            },
        })
    }

    fn api_url(instance: &Instance, path: &str) -> Result<Url, RemoteError> {
        let base = instance.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/api/v4/{path}")).map_err(|err| RemoteError::Contract {
            details: format!("could not build API URL for '{path}': {err}"),
        })
    }

    /// Send a request, mapping throttling and non-success statuses.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = parse_retry_after(&response);
            return Err(RemoteError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: truncate(body),
            });
        }
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response.json::<T>().await.map_err(|err| {
            if err.is_decode() {
                RemoteError::Contract {
                    details: format!("undecodable response body: {err}"),
                }
            } else {
                RemoteError::Network(err)
            }
        })
    }
}

#[async_trait::async_trait]
impl RemoteApi for HttpRemote {
    async fn list_issues(
        &self,
        instance: &Instance,
        project_id: u64,
        updated_after: Option<DateTime<Utc>>,
        state: IssueStateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteIssue>, RemoteError> {
        let mut url = Self::api_url(instance, &format!("projects/{project_id}/issues"))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("order_by", "updated_at")
                .append_pair("sort", "asc")
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string());
            if let Some(after) = updated_after {
                query.append_pair("updated_after", &after.to_rfc3339());
            }
            match state {
                IssueStateFilter::All => {}
                IssueStateFilter::Opened => {
                    query.append_pair("state", "opened");
                }
                IssueStateFilter::Closed => {
                    query.append_pair("state", "closed");
                }
            }
        }

        let response = self
            .send(self.client.get(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        let dtos: Vec<IssueDto> = Self::decode(response).await?;
        dtos.into_iter().map(IssueDto::validate).collect()
    }

    async fn get_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<RemoteIssue, RemoteError> {
        let url = Self::api_url(instance, &format!("projects/{project_id}/issues/{iid}"))?;
        let response = self
            .send(self.client.get(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        Self::decode::<IssueDto>(response).await?.validate()
    }

    async fn create_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        issue: &NewIssue,
    ) -> Result<RemoteIssue, RemoteError> {
        let url = Self::api_url(instance, &format!("projects/{project_id}/issues"))?;
        let body = NewIssueDto {
            title: &issue.title,
            description: issue.description.as_deref(),
            labels: join_labels(&issue.labels),
            weight: issue.weight,
        };
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .json(&body),
            )
            .await?;
        Self::decode::<IssueDto>(response).await?.validate()
    }

    async fn update_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<RemoteIssue, RemoteError> {
        let url = Self::api_url(instance, &format!("projects/{project_id}/issues/{iid}"))?;
        let body = IssueUpdateDto {
            title: update.title.as_deref(),
            description: update.description.as_deref(),
            labels: update.labels.as_deref().and_then(join_labels_opt),
            state_event: update.state_event,
            weight: update.weight,
        };
        let response = self
            .send(
                self.client
                    .put(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .json(&body),
            )
            .await?;
        Self::decode::<IssueDto>(response).await?.validate()
    }

    async fn list_notes(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteNote>, RemoteError> {
        let mut url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/notes"),
        )?;
        url.query_pairs_mut()
            .append_pair("order_by", "created_at")
            .append_pair("sort", "asc")
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());

        let response = self
            .send(self.client.get(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        let dtos: Vec<NoteDto> = Self::decode(response).await?;
        dtos.into_iter().map(NoteDto::validate).collect()
    }

    async fn create_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError> {
        let url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/notes"),
        )?;
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .json(&NoteBodyDto { body }),
            )
            .await?;
        Self::decode::<NoteDto>(response).await?.validate()
    }

    async fn update_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError> {
        let url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/notes/{note_id}"),
        )?;
        let response = self
            .send(
                self.client
                    .put(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .json(&NoteBodyDto { body }),
            )
            .await?;
        Self::decode::<NoteDto>(response).await?.validate()
    }

    async fn list_labels(
        &self,
        instance: &Instance,
        project_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteLabel>, RemoteError> {
        let mut url = Self::api_url(instance, &format!("projects/{project_id}/labels"))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        let response = self
            .send(self.client.get(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        let dtos: Vec<LabelDto> = Self::decode(response).await?;
        dtos.into_iter().map(LabelDto::validate).collect()
    }

    async fn create_label(
        &self,
        instance: &Instance,
        project_id: u64,
        name: &str,
        color: &str,
    ) -> Result<RemoteLabel, RemoteError> {
        let url = Self::api_url(instance, &format!("projects/{project_id}/labels"))?;
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .json(&NewLabelDto { name, color }),
            )
            .await?;
        Self::decode::<LabelDto>(response).await?.validate()
    }

    async fn upload_file(
        &self,
        instance: &Instance,
        project_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, RemoteError> {
        let url = Self::api_url(instance, &format!("projects/{project_id}/uploads"))?;
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(TOKEN_HEADER, &instance.token)
                    .multipart(form),
            )
            .await?;
        Self::decode::<UploadDto>(response).await?.validate()
    }

    async fn download_file(
        &self,
        instance: &Instance,
        url: &Url,
        max_bytes: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        let instance_origin = instance.base_url.origin();
        let mut current = url.clone();

        for _hop in 0..=self.max_redirects {
            // Validated before any connection is opened, on every hop.
            ssrf::validate_url(&current, self.ssrf_policy).await?;

            let mut request = self.client.get(current.clone());
            // The token is only presented to the instance it belongs to.
            if current.origin() == instance_origin {
                request = request.header(TOKEN_HEADER, &instance.token);
            }
            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| RemoteError::Contract {
                        details: format!("redirect from {current} without a Location header"),
                    })?;
                let next = current.join(location).map_err(|err| RemoteError::Contract {
                    details: format!("invalid redirect target '{location}': {err}"),
                })?;
                debug!(from = %current, to = %next, "Following validated redirect");
                current = next;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = parse_retry_after(&response);
                return Err(RemoteError::RateLimited { retry_after_secs });
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::Http {
                    status: status.as_u16(),
                    body: truncate(body),
                });
            }

            // Trust Content-Length only after it parses as a bounded integer;
            // the ceiling is enforced on received bytes regardless.
            if let Some(declared) = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
            {
                if declared > max_bytes {
                    return Err(RemoteError::TooLarge {
                        limit_bytes: max_bytes,
                    });
                }
            }

            let mut body = Vec::new();
            let mut response = response;
            while let Some(chunk) = response.chunk().await? {
                if body.len() as u64 + chunk.len() as u64 > max_bytes {
                    return Err(RemoteError::TooLarge {
                        limit_bytes: max_bytes,
                    });
                }
                body.extend_from_slice(&chunk);
            }
            return Ok(body);
        }

        warn!(url = %url, hops = self.max_redirects, "Redirect chain too long");
        Err(RemoteError::Contract {
            details: format!(
                "redirect chain for {url} exceeded {} hops",
                self.max_redirects
            ),
        })
    }

    async fn time_stats(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<TimeStats, RemoteError> {
        let url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/time_stats"),
        )?;
        let response = self
            .send(self.client.get(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        let dto: TimeStatsDto = Self::decode(response).await?;
        Ok(dto.into_stats())
    }

    async fn set_time_estimate(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError> {
        let mut url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/time_estimate"),
        )?;
        url.query_pairs_mut()
            .append_pair("duration", &format!("{seconds}s"));
        self.send(self.client.post(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        Ok(())
    }

    async fn reset_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<(), RemoteError> {
        let url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/reset_spent_time"),
        )?;
        self.send(self.client.post(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        Ok(())
    }

    async fn add_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError> {
        let mut url = Self::api_url(
            instance,
            &format!("projects/{project_id}/issues/{iid}/add_spent_time"),
        )?;
        url.query_pairs_mut()
            .append_pair("duration", &format!("{seconds}s"));
        self.send(self.client.post(url).header(TOKEN_HEADER, &instance.token))
            .await?;
        Ok(())
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

fn join_labels(labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(","))
    }
}

fn join_labels_opt(labels: &[String]) -> Option<String> {
    Some(labels.join(","))
}

fn contract(details: impl Into<String>) -> RemoteError {
    RemoteError::Contract {
        details: details.into(),
    }
}

#[derive(Debug, Deserialize)]
struct RefDto {
    id: Option<u64>,
    title: Option<String>,
}

impl RefDto {
    fn validate(self, what: &str) -> Result<(u64, String), RemoteError> {
        let id = self
            .id
            .ok_or_else(|| contract(format!("{what} missing 'id'")))?;
        let title = self
            .title
            .ok_or_else(|| contract(format!("{what} {id} missing 'title'")))?;
        Ok((id, title))
    }
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: Option<u64>,
    username: Option<String>,
}

impl UserDto {
    fn validate(self) -> Result<RemoteUser, RemoteError> {
        let id = self.id.ok_or_else(|| contract("assignee missing 'id'"))?;
        let username = self
            .username
            .ok_or_else(|| contract(format!("assignee {id} missing 'username'")))?;
        Ok(RemoteUser { id, username })
    }
}

#[derive(Debug, Deserialize)]
struct IssueDto {
    id: Option<u64>,
    iid: Option<u64>,
    project_id: Option<u64>,
    title: Option<String>,
    description: Option<String>,
    state: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    milestone: Option<RefDto>,
    iteration: Option<RefDto>,
    epic: Option<RefDto>,
    #[serde(default)]
    assignees: Vec<UserDto>,
    weight: Option<i64>,
    web_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl IssueDto {
    fn validate(self) -> Result<RemoteIssue, RemoteError> {
        let id = self.id.ok_or_else(|| contract("issue missing 'id'"))?;
        let iid = self
            .iid
            .ok_or_else(|| contract(format!("issue {id} missing 'iid'")))?;
        let project_id = self
            .project_id
            .ok_or_else(|| contract(format!("issue {id} missing 'project_id'")))?;
        let title = self
            .title
            .ok_or_else(|| contract(format!("issue {id} missing 'title'")))?;
        let state = match self.state.as_deref() {
            Some("opened") => IssueState::Opened,
            Some("closed") => IssueState::Closed,
            Some(other) => {
                return Err(contract(format!("issue {id} has unknown state '{other}'")));
            }
            None => return Err(contract(format!("issue {id} missing 'state'"))),
        };
        let created_at = self
            .created_at
            .ok_or_else(|| contract(format!("issue {id} missing 'created_at'")))?;
        let updated_at = self
            .updated_at
            .ok_or_else(|| contract(format!("issue {id} missing 'updated_at'")))?;

        let milestone = self
            .milestone
            .map(|dto| dto.validate("milestone"))
            .transpose()?
            .map(|(id, title)| RemoteMilestone { id, title });
        let iteration = self
            .iteration
            .map(|dto| dto.validate("iteration"))
            .transpose()?
            .map(|(id, title)| RemoteIteration { id, title });
        let epic = self
            .epic
            .map(|dto| dto.validate("epic"))
            .transpose()?
            .map(|(id, title)| RemoteEpic { id, title });
        let assignees = self
            .assignees
            .into_iter()
            .map(UserDto::validate)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RemoteIssue {
            id,
            iid,
            project_id,
            title,
            description: self.description,
            state,
            labels: self.labels,
            milestone,
            iteration,
            epic,
            assignees,
            weight: self.weight,
            web_url: self.web_url,
            created_at,
            updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NoteAuthorDto {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NoteDto {
    id: Option<u64>,
    body: Option<String>,
    #[serde(default)]
    system: bool,
    author: Option<NoteAuthorDto>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl NoteDto {
    fn validate(self) -> Result<RemoteNote, RemoteError> {
        let id = self.id.ok_or_else(|| contract("note missing 'id'"))?;
        let body = self
            .body
            .ok_or_else(|| contract(format!("note {id} missing 'body'")))?;
        let created_at = self
            .created_at
            .ok_or_else(|| contract(format!("note {id} missing 'created_at'")))?;
        Ok(RemoteNote {
            id,
            body,
            system: self.system,
            author_username: self.author.and_then(|author| author.username),
            created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LabelDto {
    id: Option<u64>,
    name: Option<String>,
    color: Option<String>,
}

impl LabelDto {
    fn validate(self) -> Result<RemoteLabel, RemoteError> {
        let id = self.id.ok_or_else(|| contract("label missing 'id'"))?;
        let name = self
            .name
            .ok_or_else(|| contract(format!("label {id} missing 'name'")))?;
        Ok(RemoteLabel {
            id,
            name,
            color: self.color,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadDto {
    url: Option<String>,
    markdown: Option<String>,
}

impl UploadDto {
    fn validate(self) -> Result<UploadedFile, RemoteError> {
        let url = self
            .url
            .ok_or_else(|| contract("upload response missing 'url'"))?;
        Ok(UploadedFile {
            url,
            markdown: self.markdown,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TimeStatsDto {
    #[serde(default)]
    time_estimate: i64,
    #[serde(default)]
    total_time_spent: i64,
}

impl TimeStatsDto {
    fn into_stats(self) -> TimeStats {
        TimeStats {
            time_estimate_secs: self.time_estimate,
            total_time_spent_secs: self.total_time_spent,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewIssueDto<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight: Option<i64>,
}

#[derive(Debug, Serialize)]
struct IssueUpdateDto<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_event: Option<super::StateEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight: Option<i64>,
}

#[derive(Debug, Serialize)]
struct NoteBodyDto<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct NewLabelDto<'a> {
    name: &'a str,
    color: &'a str,
}
