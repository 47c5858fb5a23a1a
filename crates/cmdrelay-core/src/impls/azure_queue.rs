//! AzureQueueClient - Azure Storage Queue の REST クライアント
//!
//! # 対応する認証
//! - SharedKey（`AccountName` + `AccountKey`、HMAC-SHA256 署名）
//! - SAS（`SharedAccessSignature` をクエリに付与）
//! - `UseDevelopmentStorage=true`（Azurite）
//!
//! # 使う API
//! - `GET {queue}?comp=metadata` → 到達確認
//! - `GET {queue}/messages?numofmessages=1&visibilitytimeout=N` → 受信
//! - `POST {queue}/messages` → 送信
//! - `DELETE {queue}/messages/{id}?popreceipt=...` → 削除

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::ports::{MessageQueue, QueueError, QueueMessage, QueueProperties};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-03-28";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

/// How message text is stored on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    #[default]
    Plain,
    Base64,
}

impl FromStr for MessageEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(MessageEncoding::Plain),
            "base64" => Ok(MessageEncoding::Base64),
            other => Err(format!("unknown message encoding '{other}' (expected plain or base64)")),
        }
    }
}

#[derive(Clone)]
enum Credentials {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

/// Parsed storage connection string.
#[derive(Clone)]
pub struct StorageAccount {
    name: Option<String>,
    queue_endpoint: Url,
    credentials: Credentials,
}

impl std::fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.credentials {
            Credentials::SharedKey { .. } => "shared-key",
            Credentials::Sas(_) => "sas",
        };
        f.debug_struct("StorageAccount")
            .field("name", &self.name)
            .field("queue_endpoint", &self.queue_endpoint.as_str())
            .field("auth", &auth)
            .finish()
    }
}

impl StorageAccount {
    pub fn from_connection_string(raw: &str) -> Result<Self, QueueError> {
        let mut pairs = BTreeMap::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| QueueError::Config(format!("malformed segment '{part}'")))?;
            pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                name: Some(DEV_ACCOUNT_NAME.to_string()),
                queue_endpoint: parse_url(DEV_QUEUE_ENDPOINT)?,
                credentials: Credentials::SharedKey {
                    account: DEV_ACCOUNT_NAME.to_string(),
                    key: decode_key(DEV_ACCOUNT_KEY)?,
                },
            });
        }

        let name = pairs.get("accountname").cloned();
        let queue_endpoint = match (pairs.get("queueendpoint"), &name) {
            (Some(endpoint), _) => parse_url(endpoint)?,
            (None, Some(account)) => {
                let protocol = pairs
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = pairs
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                parse_url(&format!("{protocol}://{account}.queue.{suffix}"))?
            }
            (None, None) => {
                return Err(QueueError::Config(
                    "connection string needs AccountName or QueueEndpoint".to_string(),
                ));
            }
        };

        let key = pairs.get("accountkey");
        let sas = pairs.get("sharedaccesssignature");
        let credentials = match (key, sas, &name) {
            (Some(key), _, Some(account)) => Credentials::SharedKey {
                account: account.clone(),
                key: decode_key(key)?,
            },
            (_, Some(sas), _) => Credentials::Sas(sas.trim_start_matches('?').to_string()),
            _ => {
                return Err(QueueError::Config(
                    "connection string needs AccountName+AccountKey or SharedAccessSignature"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            name,
            queue_endpoint,
            credentials,
        })
    }

    /// Account name for display; falls back to the endpoint's first host label.
    pub fn account_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            self.queue_endpoint
                .host_str()
                .and_then(|h| h.split('.').next())
                .map(str::to_string)
        })
    }

    pub fn queue_endpoint(&self) -> &Url {
        &self.queue_endpoint
    }
}

fn parse_url(raw: &str) -> Result<Url, QueueError> {
    Url::parse(raw).map_err(|e| QueueError::Config(format!("invalid endpoint '{raw}': {e}")))
}

fn decode_key(raw: &str) -> Result<Vec<u8>, QueueError> {
    general_purpose::STANDARD
        .decode(raw.as_bytes())
        .map_err(|e| QueueError::Config(format!("AccountKey is not valid base64: {e}")))
}

/// Builds the SharedKey string-to-sign for a queue service request.
///
/// Only `x-ms-date` and `x-ms-version` are sent as `x-ms-*` headers, so the
/// canonicalized header block is always exactly those two lines.
pub(crate) fn string_to_sign(
    method: &Method,
    url: &Url,
    account: &str,
    content_length: usize,
    content_type: &str,
    ms_date: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let fields = [
        method.as_str(),
        "",
        "",
        length.as_str(),
        "",
        content_type,
        "",
        "",
        "",
        "",
        "",
        "",
    ];
    let headers = format!("x-ms-date:{ms_date}\nx-ms-version:{API_VERSION}\n");

    let mut resource = format!("/{account}{}", url.path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (key, mut values) in params {
        values.sort();
        resource.push_str(&format!("\n{key}:{}", values.join(",")));
    }

    format!("{}\n{headers}{resource}", fields.join("\n"))
}

fn sign(key: &[u8], payload: &str) -> Result<String, QueueError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| QueueError::Config(format!("invalid account key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct QueueMessagesList {
    #[serde(rename = "QueueMessage", default)]
    messages: Vec<RawQueueMessage>,
}

#[derive(Debug, Deserialize)]
struct RawQueueMessage {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "PopReceipt")]
    pop_receipt: String,
    #[serde(rename = "DequeueCount", default)]
    dequeue_count: u32,
    #[serde(rename = "MessageText", default)]
    message_text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Client for one Azure Storage queue.
#[derive(Debug, Clone)]
pub struct AzureQueueClient {
    http: reqwest::Client,
    account: StorageAccount,
    queue_url: Url,
    name: String,
    encoding: MessageEncoding,
}

impl AzureQueueClient {
    pub fn new(
        account: StorageAccount,
        queue_name: impl Into<String>,
        encoding: MessageEncoding,
    ) -> Result<Self, QueueError> {
        let name = queue_name.into();
        let base = account.queue_endpoint.as_str().trim_end_matches('/');
        let queue_url = parse_url(&format!("{base}/{name}"))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| QueueError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            account,
            queue_url,
            name,
            encoding,
        })
    }

    pub fn from_connection_string(
        connection_string: &str,
        queue_name: impl Into<String>,
        encoding: MessageEncoding,
    ) -> Result<Self, QueueError> {
        let account = StorageAccount::from_connection_string(connection_string)?;
        Self::new(account, queue_name, encoding)
    }

    pub fn account(&self) -> &StorageAccount {
        &self.account
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, QueueError> {
        let mut url = self.queue_url.clone();
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| {
                    QueueError::Config(format!("cannot-be-a-base url {}", self.queue_url))
                })?
                .extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<reqwest::Response, QueueError> {
        let ms_date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_type = if body.is_some() {
            "application/xml; charset=utf-8"
        } else {
            ""
        };
        let content_length = body.as_ref().map_or(0, String::len);

        let (url, authorization) = match &self.account.credentials {
            Credentials::SharedKey { account, key } => {
                let payload =
                    string_to_sign(&method, &url, account, content_length, content_type, &ms_date);
                (url, Some(format!("SharedKey {account}:{}", sign(key, &payload)?)))
            }
            Credentials::Sas(sas) => {
                let mut url = url;
                let query = match url.query() {
                    Some(existing) if !existing.is_empty() => format!("{existing}&{sas}"),
                    _ => sas.clone(),
                };
                url.set_query(Some(&query));
                (url, None)
            }
        };

        debug!(queue = %self.name, %method, path = url.path(), "queue request");

        let mut request = self
            .http
            .request(method, url)
            .header("x-ms-date", ms_date)
            .header("x-ms-version", API_VERSION);
        if let Some(auth) = authorization {
            request = request.header("Authorization", auth);
        }
        if let Some(body) = body {
            request = request.header("Content-Type", content_type).body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    fn decode_text(&self, text: &str) -> Result<Vec<u8>, QueueError> {
        match self.encoding {
            MessageEncoding::Plain => Ok(text.as_bytes().to_vec()),
            MessageEncoding::Base64 => general_purpose::STANDARD
                .decode(text.trim().as_bytes())
                .map_err(|e| QueueError::Decode(format!("message text is not base64: {e}"))),
        }
    }

    fn encode_text(&self, text: &str) -> String {
        match self.encoding {
            MessageEncoding::Plain => quick_xml::escape::escape(text).into_owned(),
            MessageEncoding::Base64 => general_purpose::STANDARD.encode(text.as_bytes()),
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> QueueError {
    let status = response.status();
    let code_header = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = quick_xml::de::from_str(&text).unwrap_or_default();
    let code = body.code.or(code_header);
    let message = body
        .message
        .map(|m| m.lines().next().unwrap_or_default().to_string())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    if status == StatusCode::NOT_FOUND && code.as_deref() == Some("MessageNotFound") {
        return QueueError::NotFound(message);
    }
    QueueError::Status {
        status: status.as_u16(),
        code,
        message,
    }
}

#[async_trait]
impl MessageQueue for AzureQueueClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self) -> Result<QueueProperties, QueueError> {
        let url = self.url(&[], &[("comp", "metadata")])?;
        let response = self.call(Method::GET, url, None).await?;
        let approximate_message_count = response
            .headers()
            .get("x-ms-approximate-messages-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Ok(QueueProperties {
            name: self.name.clone(),
            approximate_message_count,
        })
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let timeout = visibility_timeout.as_secs().max(1).to_string();
        let url = self.url(
            &["messages"],
            &[("numofmessages", "1"), ("visibilitytimeout", &timeout)],
        )?;
        let response = self.call(Method::GET, url, None).await?;
        let text = response
            .text()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let list: QueueMessagesList =
            quick_xml::de::from_str(&text).map_err(|e| QueueError::Decode(e.to_string()))?;

        let Some(raw) = list.messages.into_iter().next() else {
            return Ok(None);
        };
        // 本文が壊れていても受信自体は成功。parse 失敗として処理・削除させる
        let body = match self.decode_text(&raw.message_text) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    queue = %self.name,
                    message_id = %raw.message_id,
                    error = %e,
                    "message text could not be decoded, passing it through raw"
                );
                raw.message_text.into_bytes()
            }
        };
        Ok(Some(QueueMessage {
            body,
            message_id: raw.message_id,
            pop_receipt: raw.pop_receipt,
            dequeue_count: raw.dequeue_count,
        }))
    }

    async fn send(&self, text: &str) -> Result<(), QueueError> {
        let url = self.url(&["messages"], &[])?;
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            self.encode_text(text)
        );
        self.call(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let url = self.url(
            &["messages", &message.message_id],
            &[("popreceipt", &message.pop_receipt)],
        )?;
        match self.call(Method::DELETE, url, None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    queue = %self.name,
                    message_id = %message.message_id,
                    error = %e,
                    "delete failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{
        body_string_contains, header, header_exists, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // base64("secret")
    const TEST_KEY: &str = "c2VjcmV0";

    fn client_for(server: &MockServer, queue: &str) -> AzureQueueClient {
        let conn = format!(
            "QueueEndpoint={}/devacct;AccountName=devacct;AccountKey={TEST_KEY}",
            server.uri()
        );
        AzureQueueClient::from_connection_string(&conn, queue, MessageEncoding::Plain).unwrap()
    }

    #[test]
    fn parses_account_key_connection_string() {
        let account = StorageAccount::from_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(account.account_name().as_deref(), Some("acme"));
        assert_eq!(
            account.queue_endpoint().as_str(),
            "https://acme.queue.core.windows.net/"
        );
    }

    #[test]
    fn parses_development_storage() {
        let account = StorageAccount::from_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(account.account_name().as_deref(), Some(DEV_ACCOUNT_NAME));
        assert_eq!(account.queue_endpoint().port(), Some(10001));
    }

    #[test]
    fn parses_sas_connection_string() {
        let account = StorageAccount::from_connection_string(
            "QueueEndpoint=https://acme.queue.core.windows.net;SharedAccessSignature=?sv=2020&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(account.account_name().as_deref(), Some("acme"));
        assert!(matches!(
            account.credentials,
            Credentials::Sas(ref s) if s == "sv=2020&sig=abc%3D"
        ));
    }

    #[test]
    fn rejects_connection_string_without_credentials() {
        let err = StorageAccount::from_connection_string("AccountName=acme").unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
        let err = StorageAccount::from_connection_string("garbage").unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn debug_output_hides_key() {
        let account =
            StorageAccount::from_connection_string("AccountName=acme;AccountKey=c2VjcmV0").unwrap();
        let rendered = format!("{account:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("shared-key"));
    }

    #[test]
    fn string_to_sign_canonicalizes_resource_and_query() {
        let url = Url::parse(
            "https://acme.queue.core.windows.net/commandqueue/messages?visibilitytimeout=30&numofmessages=1",
        )
        .unwrap();
        let signed = string_to_sign(
            &Method::GET,
            &url,
            "acme",
            0,
            "",
            "Mon, 01 Jan 2024 00:00:00 GMT",
        );
        assert_eq!(
            signed,
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-version:2018-03-28\n\
             /acme/commandqueue/messages\n\
             numofmessages:1\n\
             visibilitytimeout:30"
        );
    }

    #[test]
    fn encoding_parses_from_str() {
        assert_eq!("base64".parse::<MessageEncoding>(), Ok(MessageEncoding::Base64));
        assert_eq!("Plain".parse::<MessageEncoding>(), Ok(MessageEncoding::Plain));
        assert!("rot13".parse::<MessageEncoding>().is_err());
    }

    #[tokio::test]
    async fn properties_are_fetched_with_shared_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devacct/commandqueue"))
            .and(query_param("comp", "metadata"))
            .and(header_exists("authorization"))
            .and(header("x-ms-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(200).insert_header("x-ms-approximate-messages-count", "4"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let props = client_for(&server, "commandqueue").properties().await.unwrap();
        assert_eq!(props.name, "commandqueue");
        assert_eq!(props.approximate_message_count, Some(4));

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKey devacct:"));
    }

    #[tokio::test]
    async fn receive_decodes_xml_message() {
        let server = MockServer::start().await;
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><QueueMessagesList><QueueMessage><MessageId>abc-1</MessageId><InsertionTime>Mon, 01 Jan 2024 00:00:00 GMT</InsertionTime><ExpirationTime>Mon, 08 Jan 2024 00:00:00 GMT</ExpirationTime><PopReceipt>AgAAAA==</PopReceipt><TimeNextVisible>Mon, 01 Jan 2024 00:00:30 GMT</TimeNextVisible><DequeueCount>2</DequeueCount><MessageText>{&quot;command&quot;:&quot;echo a &amp;&amp; echo b&quot;,&quot;message_id&quot;:&quot;m1&quot;}</MessageText></QueueMessage></QueueMessagesList>"#;
        Mock::given(method("GET"))
            .and(path("/devacct/commandqueue/messages"))
            .and(query_param("numofmessages", "1"))
            .and(query_param("visibilitytimeout", "30"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml))
            .mount(&server)
            .await;

        let msg = client_for(&server, "commandqueue")
            .receive(Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message_id, "abc-1");
        assert_eq!(msg.pop_receipt, "AgAAAA==");
        assert_eq!(msg.dequeue_count, 2);
        assert_eq!(
            msg.body_text(),
            r#"{"command":"echo a && echo b","message_id":"m1"}"#
        );
    }

    #[tokio::test]
    async fn undecodable_base64_text_is_passed_through() {
        let server = MockServer::start().await;
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><QueueMessagesList><QueueMessage><MessageId>abc-2</MessageId><PopReceipt>AgAAAB==</PopReceipt><DequeueCount>1</DequeueCount><MessageText>{&quot;command&quot;:&quot;ls&quot;}</MessageText></QueueMessage></QueueMessagesList>"#;
        Mock::given(method("GET"))
            .and(path("/devacct/commandqueue/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml))
            .mount(&server)
            .await;

        let conn = format!(
            "QueueEndpoint={}/devacct;AccountName=devacct;AccountKey={TEST_KEY}",
            server.uri()
        );
        let client =
            AzureQueueClient::from_connection_string(&conn, "commandqueue", MessageEncoding::Base64)
                .unwrap();
        let msg = client
            .receive(Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message_id, "abc-2");
        assert_eq!(msg.body_text(), r#"{"command":"ls"}"#);
    }

    #[tokio::test]
    async fn receive_empty_list_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devacct/commandqueue/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="utf-8"?><QueueMessagesList />"#,
            ))
            .mount(&server)
            .await;

        let got = client_for(&server, "commandqueue")
            .receive(Duration::from_secs(30))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn send_escapes_message_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devacct/responsequeue/messages"))
            .and(body_string_contains("<MessageText>a &lt;b&gt; &amp; c</MessageText>"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server, "responsequeue")
            .send("a <b> & c")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn base64_encoding_roundtrips_through_the_wire() {
        let server = MockServer::start().await;
        let encoded = general_purpose::STANDARD.encode(r#"{"message_id":"m1"}"#);
        Mock::given(method("POST"))
            .and(path("/devacct/responsequeue/messages"))
            .and(body_string_contains(encoded.as_str()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let conn = format!(
            "QueueEndpoint={}/devacct;AccountName=devacct;AccountKey={TEST_KEY}",
            server.uri()
        );
        let client =
            AzureQueueClient::from_connection_string(&conn, "responsequeue", MessageEncoding::Base64)
                .unwrap();
        client.send(r#"{"message_id":"m1"}"#).await.unwrap();
        assert_eq!(
            client.decode_text(&encoded).unwrap(),
            br#"{"message_id":"m1"}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn delete_uses_pop_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/devacct/commandqueue/messages/abc-1"))
            .and(query_param("popreceipt", "AgAAAA=="))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let msg = QueueMessage {
            message_id: "abc-1".into(),
            pop_receipt: "AgAAAA==".into(),
            dequeue_count: 1,
            body: Vec::new(),
        };
        client_for(&server, "commandqueue").delete(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn service_errors_carry_status_and_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>AuthenticationFailed</Code><Message>Server failed to authenticate the request.\nRequestId:1</Message></Error>",
            ))
            .mount(&server)
            .await;

        let err = client_for(&server, "commandqueue").properties().await.unwrap_err();
        match err {
            QueueError::Status { status, code, message } => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("AuthenticationFailed"));
                assert_eq!(message, "Server failed to authenticate the request.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let client = AzureQueueClient::from_connection_string(
            "QueueEndpoint=http://127.0.0.1:1/devacct;AccountName=devacct;AccountKey=c2VjcmV0",
            "commandqueue",
            MessageEncoding::Plain,
        )
        .unwrap();
        let err = client.properties().await.unwrap_err();
        assert!(matches!(err, QueueError::Transport(_)));
    }
}
