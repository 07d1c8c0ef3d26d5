use super::types::*;
use crate::adapter::{
    AdapterRegistry, ByteStream, ChatRequest, ProviderAdapter, ProviderError, RateLimitInfo,
};
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use serde_json::Value;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Issues probe exchanges against provider endpoints.
///
/// Every call returns a [`ProbeResult`]: transport failures, deadline expiry
/// and unexpected payloads are folded into the result instead of being
/// raised.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    http: reqwest::Client,
    registry: AdapterRegistry,
    settings: ProbeSettings,
}

/// Successful JSON exchange, status already checked
struct JsonReply {
    status: u16,
    body: Value,
    raw: String,
    rate_limit: RateLimitInfo,
}

#[derive(Debug, Default)]
struct StreamSummary {
    ttft: Option<Duration>,
    text: String,
    finished: bool,
    errors: Vec<String>,
}

impl ProbeClient {
    pub fn new(registry: AdapterRegistry, settings: ProbeSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("modelprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            registry,
            settings,
        })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Build a request for `kind` using the configured timeout
    pub fn request(&self, provider: &Provider, model: &str, kind: ProbeKind) -> ProbeRequest {
        ProbeRequest::new(provider.clone(), model, kind, self.settings.timeout())
    }

    pub async fn run(&self, request: ProbeRequest) -> ProbeResult {
        let started = Instant::now();
        let kind = request.kind;

        let adapter = match self.registry.resolve(&request.provider.name) {
            Ok(adapter) => adapter,
            Err(err) => {
                return ProbeResult::failure(
                    kind,
                    None,
                    ProbeLatency::since(started),
                    ProviderError::NotFound {
                        message: err.to_string(),
                    },
                    "",
                );
            }
        };

        debug!(
            provider = %request.provider.name,
            model = %request.model,
            probe = %kind,
            "Running probe"
        );

        let exchange = self.exchange(adapter.as_ref(), &request, started);
        let result = match tokio::time::timeout(request.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = %request.provider.name,
                    model = %request.model,
                    probe = %kind,
                    "Probe deadline of {:?} exceeded",
                    request.timeout
                );
                ProbeResult::failure(
                    kind,
                    None,
                    ProbeLatency::since(started),
                    ProviderError::transport(format!(
                        "deadline of {}ms exceeded",
                        request.timeout.as_millis()
                    )),
                    "",
                )
            }
        };

        debug!(probe = %kind, passed = result.passed, "Probe finished in {:?}", result.latency.total);
        result
    }

    async fn exchange(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        match request.kind {
            ProbeKind::Existence => self.probe_existence(adapter, request, started).await,
            ProbeKind::Responsiveness => self.probe_responsiveness(adapter, request, started).await,
            ProbeKind::Streaming => self.probe_streaming(adapter, request, started).await,
            ProbeKind::Compression => self.probe_compression(adapter, request, started).await,
            ProbeKind::Feature(FeatureKind::FunctionCalling) => {
                self.probe_function_calling(adapter, request, started).await
            }
            ProbeKind::Feature(FeatureKind::Vision) => {
                self.probe_vision(adapter, request, started).await
            }
            ProbeKind::Feature(FeatureKind::Embeddings) => {
                self.probe_embeddings(adapter, request, started).await
            }
        }
    }

    fn authed(
        &self,
        builder: reqwest::RequestBuilder,
        adapter: &dyn ProviderAdapter,
        provider: &Provider,
    ) -> reqwest::RequestBuilder {
        adapter
            .auth_headers(provider.credential.expose())
            .into_iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
    }

    fn chat_post(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        payload: &ChatRequest,
    ) -> reqwest::RequestBuilder {
        let url = request.provider.endpoint(adapter.chat_path());
        self.authed(self.http.post(url), adapter, &request.provider)
            .json(&adapter.chat_body(payload))
    }

    /// Send, require a 2xx status and decode the body as JSON
    async fn send_json(
        &self,
        adapter: &dyn ProviderAdapter,
        kind: ProbeKind,
        builder: reqwest::RequestBuilder,
        started: Instant,
    ) -> Result<JsonReply, ProbeResult> {
        let response = builder
            .send()
            .await
            .map_err(|err| transport_failure(kind, &err, started))?;

        let status = response.status().as_u16();
        let rate_limit = adapter.rate_limit_info(response.headers());
        let raw = response
            .text()
            .await
            .map_err(|err| transport_failure(kind, &err, started))?;

        if !(200..300).contains(&status) {
            return Err(ProbeResult::failure(
                kind,
                Some(status),
                ProbeLatency::since(started),
                adapter.classify_error(status, &raw),
                &raw,
            )
            .with_rate_limit(rate_limit));
        }

        match serde_json::from_str(&raw) {
            Ok(body) => Ok(JsonReply {
                status,
                body,
                raw,
                rate_limit,
            }),
            Err(err) => Err(ProbeResult::failure(
                kind,
                Some(status),
                ProbeLatency::since(started),
                ProviderError::parse(format!("response is not valid JSON: {err}")),
                &raw,
            )
            .with_rate_limit(rate_limit)),
        }
    }

    async fn probe_existence(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let url = request.provider.endpoint(&adapter.model_path(&request.model));
        let response = match self
            .authed(self.http.get(url), adapter, &request.provider)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return transport_failure(kind, &err, started),
        };

        let status = response.status().as_u16();
        let rate_limit = adapter.rate_limit_info(response.headers());
        let body = response.text().await.unwrap_or_default();
        let latency = ProbeLatency::since(started);

        let result = if status == 200 {
            ProbeResult::success(kind, Some(status), latency, &body)
        } else {
            ProbeResult::failure(
                kind,
                Some(status),
                latency,
                adapter.classify_error(status, &body),
                &body,
            )
        };
        result.with_rate_limit(rate_limit)
    }

    async fn probe_responsiveness(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let payload = adapter.optimize(request.payload.clone());

        if !payload.stream {
            let reply = match self
                .send_json(adapter, kind, self.chat_post(adapter, request, &payload), started)
                .await
            {
                Ok(reply) => reply,
                Err(failed) => return failed,
            };
            let latency = ProbeLatency::since(started);
            let text = adapter.extract_text(&reply.body).unwrap_or_default();
            return self
                .judge_responsiveness(kind, reply.status, latency, &text)
                .with_rate_limit(reply.rate_limit);
        }

        let response = match self.chat_post(adapter, request, &payload).send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(kind, &err, started),
        };
        let status = response.status().as_u16();
        let rate_limit = adapter.rate_limit_info(response.headers());
        if !response.status().is_success() {
            return http_failure(adapter, kind, status, response, started)
                .await
                .with_rate_limit(rate_limit);
        }

        let summary = drain_stream(adapter, response, started).await;
        let latency = ProbeLatency {
            total: started.elapsed(),
            ttft: summary.ttft,
        };
        if summary.text.is_empty() {
            return stream_without_content(kind, status, latency, &summary)
                .with_rate_limit(rate_limit);
        }
        self.judge_responsiveness(kind, status, latency, &summary.text)
            .with_rate_limit(rate_limit)
    }

    fn judge_responsiveness(
        &self,
        kind: ProbeKind,
        status: u16,
        latency: ProbeLatency,
        text: &str,
    ) -> ProbeResult {
        match check_ceilings(&latency, &self.settings) {
            Ok(()) => ProbeResult::success(kind, Some(status), latency, text),
            Err(reason) => ProbeResult::rejected(kind, Some(status), latency, &reason),
        }
    }

    async fn probe_streaming(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let payload = adapter.optimize(request.payload.clone()).streaming(true);

        let response = match self.chat_post(adapter, request, &payload).send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(kind, &err, started),
        };
        let status = response.status().as_u16();
        let rate_limit = adapter.rate_limit_info(response.headers());
        if !response.status().is_success() {
            return http_failure(adapter, kind, status, response, started)
                .await
                .with_rate_limit(rate_limit);
        }

        let summary = drain_stream(adapter, response, started).await;
        let latency = ProbeLatency {
            total: started.elapsed(),
            ttft: summary.ttft,
        };

        if summary.text.is_empty() {
            return stream_without_content(kind, status, latency, &summary)
                .with_rate_limit(rate_limit);
        }

        let evidence = if summary.finished {
            summary.text
        } else {
            format!("{} (stream ended without terminal marker)", summary.text)
        };
        ProbeResult::success(kind, Some(status), latency, &evidence).with_rate_limit(rate_limit)
    }

    async fn probe_compression(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let payload = adapter.optimize(request.payload.clone()).streaming(false);
        let builder = self
            .chat_post(adapter, request, &payload)
            .header(ACCEPT_ENCODING, "br, gzip");

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(kind, &err, started),
        };
        let status = response.status().as_u16();
        let rate_limit = adapter.rate_limit_info(response.headers());
        if !response.status().is_success() {
            return http_failure(adapter, kind, status, response, started)
                .await
                .with_rate_limit(rate_limit);
        }

        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return transport_failure(kind, &err, started),
        };
        let latency = ProbeLatency::since(started);

        let result = if encoding.contains("gzip") {
            match gunzip_json(&body) {
                Ok(_) => ProbeResult::success(kind, Some(status), latency, "content-encoding: gzip"),
                Err(reason) => ProbeResult::failure(
                    kind,
                    Some(status),
                    latency,
                    ProviderError::parse(reason),
                    "content-encoding: gzip",
                ),
            }
        } else if encoding.contains("br") {
            ProbeResult::success(kind, Some(status), latency, "content-encoding: br")
        } else {
            ProbeResult::rejected(kind, Some(status), latency, "response was not compressed")
        };
        result.with_rate_limit(rate_limit)
    }

    async fn probe_function_calling(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let payload = adapter.optimize(request.payload.clone()).streaming(false);
        let reply = match self
            .send_json(adapter, kind, self.chat_post(adapter, request, &payload), started)
            .await
        {
            Ok(reply) => reply,
            Err(failed) => return failed,
        };
        let latency = ProbeLatency::since(started);

        let result = match adapter.extract_tool_call(&reply.body) {
            Some(call) if call.arguments.is_object() => {
                let evidence = format!("{}({})", call.name, call.arguments);
                ProbeResult::success(kind, Some(reply.status), latency, &evidence)
            }
            Some(call) => ProbeResult::failure(
                kind,
                Some(reply.status),
                latency,
                ProviderError::parse(format!("tool call '{}' has non-object arguments", call.name)),
                &reply.raw,
            ),
            None => ProbeResult::rejected(kind, Some(reply.status), latency, &reply.raw),
        };
        result.with_rate_limit(reply.rate_limit)
    }

    async fn probe_vision(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let payload = adapter.optimize(request.payload.clone()).streaming(false);
        let reply = match self
            .send_json(adapter, kind, self.chat_post(adapter, request, &payload), started)
            .await
        {
            Ok(reply) => reply,
            Err(failed) => return failed,
        };
        let latency = ProbeLatency::since(started);

        let result = match adapter.extract_text(&reply.body) {
            Some(text) if !text.trim().is_empty() => {
                ProbeResult::success(kind, Some(reply.status), latency, &text)
            }
            _ => ProbeResult::rejected(kind, Some(reply.status), latency, &reply.raw),
        };
        result.with_rate_limit(reply.rate_limit)
    }

    async fn probe_embeddings(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProbeRequest,
        started: Instant,
    ) -> ProbeResult {
        let kind = request.kind;
        let Some(path) = adapter.embeddings_path() else {
            return ProbeResult::failure(
                kind,
                None,
                ProbeLatency::since(started),
                ProviderError::NotFound {
                    message: format!("{} exposes no embeddings endpoint", adapter.name()),
                },
                "",
            );
        };

        let url = request.provider.endpoint(path);
        let input = request.payload.prompt_text();
        let builder = self
            .authed(self.http.post(url), adapter, &request.provider)
            .json(&adapter.embeddings_body(&request.model, &input));
        let reply = match self.send_json(adapter, kind, builder, started).await {
            Ok(reply) => reply,
            Err(failed) => return failed,
        };
        let latency = ProbeLatency::since(started);

        let result = match adapter.extract_embedding(&reply.body) {
            Some(vector) if vector.is_empty() => {
                ProbeResult::rejected(kind, Some(reply.status), latency, "empty embedding vector")
            }
            Some(vector) => match self.settings.embedding_dimensions {
                Some(expected) if expected != vector.len() => ProbeResult::rejected(
                    kind,
                    Some(reply.status),
                    latency,
                    &format!("expected {expected} dimensions, got {}", vector.len()),
                ),
                _ => ProbeResult::success(
                    kind,
                    Some(reply.status),
                    latency,
                    &format!("{} dimensions", vector.len()),
                ),
            },
            None => ProbeResult::failure(
                kind,
                Some(reply.status),
                latency,
                ProviderError::parse("response carries no numeric embedding vector"),
                &reply.raw,
            ),
        };
        result.with_rate_limit(reply.rate_limit)
    }

    /// List the models a provider exposes
    pub async fn discover_models(&self, provider: &Provider) -> Result<Vec<Model>, ProviderError> {
        let adapter = self
            .registry
            .resolve(&provider.name)
            .map_err(|err| ProviderError::NotFound {
                message: err.to_string(),
            })?;

        let url = provider.endpoint(adapter.models_path());
        let builder = self.authed(self.http.get(url), adapter.as_ref(), provider);
        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| ProviderError::transport(e.to_string()))?;
            let status = response.status().as_u16();
            let raw = response
                .text()
                .await
                .map_err(|e| ProviderError::transport(e.to_string()))?;
            if status != 200 {
                return Err(adapter.classify_error(status, &raw));
            }
            serde_json::from_str::<Value>(&raw).map_err(|e| ProviderError::parse(e.to_string()))
        };

        let body = tokio::time::timeout(self.settings.timeout(), exchange)
            .await
            .map_err(|_| ProviderError::transport("model discovery deadline exceeded"))??;

        let models: Vec<Model> = adapter
            .parse_model_list(&body)
            .into_iter()
            .map(|id| Model::new(id, provider.name.clone()))
            .collect();
        debug!("Discovered {} models for {}", models.len(), provider.name);
        Ok(models)
    }
}

/// Responsiveness passes only inside both ceilings
pub fn check_ceilings(latency: &ProbeLatency, settings: &ProbeSettings) -> Result<(), String> {
    if let Some(ttft) = latency.ttft
        && ttft > settings.ttft_ceiling()
    {
        return Err(format!(
            "time to first token {}ms exceeds ceiling {}ms",
            ttft.as_millis(),
            settings.ttft_ceiling_ms
        ));
    }
    if latency.total > settings.total_ceiling() {
        return Err(format!(
            "total duration {}ms exceeds ceiling {}ms",
            latency.total.as_millis(),
            settings.total_ceiling_ms
        ));
    }
    Ok(())
}

fn transport_failure(kind: ProbeKind, err: &reqwest::Error, started: Instant) -> ProbeResult {
    let message = if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    ProbeResult::failure(
        kind,
        err.status().map(|s| s.as_u16()),
        ProbeLatency::since(started),
        ProviderError::transport(message),
        "",
    )
}

async fn http_failure(
    adapter: &dyn ProviderAdapter,
    kind: ProbeKind,
    status: u16,
    response: reqwest::Response,
    started: Instant,
) -> ProbeResult {
    let body = response.text().await.unwrap_or_default();
    ProbeResult::failure(
        kind,
        Some(status),
        ProbeLatency::since(started),
        adapter.classify_error(status, &body),
        &body,
    )
}

async fn drain_stream(
    adapter: &dyn ProviderAdapter,
    response: reqwest::Response,
    started: Instant,
) -> StreamSummary {
    let body: ByteStream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed();
    let mut chunks = adapter.parse_stream(body);
    let mut summary = StreamSummary::default();

    while let Some(chunk) = chunks.next().await {
        if let Some(error) = chunk.error {
            summary.errors.push(error);
            continue;
        }
        if chunk.is_content_bearing() {
            summary.ttft.get_or_insert_with(|| started.elapsed());
            summary.text.push_str(&chunk.content);
        }
        if chunk.finish {
            summary.finished = true;
            break;
        }
    }
    summary
}

fn stream_without_content(
    kind: ProbeKind,
    status: u16,
    latency: ProbeLatency,
    summary: &StreamSummary,
) -> ProbeResult {
    match summary.errors.first() {
        Some(error) => ProbeResult::failure(
            kind,
            Some(status),
            latency,
            ProviderError::parse(error.clone()),
            &summary.errors.join("; "),
        ),
        None => ProbeResult::rejected(
            kind,
            Some(status),
            latency,
            "no content chunk arrived before the terminal marker",
        ),
    }
}

fn gunzip_json(body: &[u8]) -> Result<Value, String> {
    let mut decoded = String::new();
    GzDecoder::new(body)
        .read_to_string(&mut decoded)
        .map_err(|e| format!("gzip body failed to decompress: {e}"))?;
    serde_json::from_str(&decoded).map_err(|e| format!("decompressed body is not JSON: {e}"))
}
