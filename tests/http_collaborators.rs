//! HTTP collaborator tests against a local mock server.

use std::sync::Arc;

use futures_util::StreamExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use omni_bridge::collaborators::{
    AudioBytesFormat, AudioTokenDecoder, HttpAudioDecoder, HttpMediaFetcher, HttpUpstreamBackend,
    HttpVisionDecoder, MediaFetcher, UpstreamBackend, UpstreamResponse, VisionTokenDecoder,
};
use omni_bridge::media::MediaResolver;
use omni_bridge::{BridgeConfig, BridgeService};

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[tokio::test]
async fn audio_decoder_accepts_wav_and_pcm_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decode"))
        .and(body_partial_json(serde_json::json!({"speaker": "ava"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/wav")
                .set_body_bytes(vec![0u8; 44]),
        )
        .mount(&server)
        .await;

    let decoder = HttpAudioDecoder::new(reqwest::Client::new(), format!("{}/decode", server.uri()));
    let decoded = decoder.decode(&[1, 2, 3], "ava", 24_000).await.unwrap();
    assert_eq!(decoded.format, AudioBytesFormat::Wav);
    assert_eq!(decoded.bytes.len(), 44);
}

#[tokio::test]
async fn audio_decoder_defaults_to_pcm_without_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 0, 2, 0]))
        .mount(&server)
        .await;

    let decoder = HttpAudioDecoder::new(reqwest::Client::new(), server.uri());
    let decoded = decoder.decode(&[10], "default", 24_000).await.unwrap();
    assert_eq!(decoded.format, AudioBytesFormat::Pcm16);
}

#[tokio::test]
async fn audio_decoder_surfaces_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let decoder = HttpAudioDecoder::new(reqwest::Client::new(), server.uri());
    assert!(decoder.decode(&[1, 2, 3], "default", 24_000).await.is_err());
}

#[tokio::test]
async fn vision_decoder_extracts_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vision"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"url": "https://imgs/x.png"})),
        )
        .mount(&server)
        .await;

    let decoder = HttpVisionDecoder::new(reqwest::Client::new(), format!("{}/vision", server.uri()));
    assert_eq!(
        decoder.decode("<|vision_abc|>").await.unwrap(),
        "https://imgs/x.png"
    );
}

#[tokio::test]
async fn media_fetcher_maps_object_store_uris() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/renders/cat.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(PNG_MAGIC.to_vec()),
        )
        .mount(&server)
        .await;

    let fetcher = HttpMediaFetcher::new(reqwest::Client::new(), server.uri());
    let media = fetcher.fetch("s3://renders/cat.png").await.unwrap();
    assert_eq!(media.content_type.as_deref(), Some("image/png"));
    assert_eq!(&media.bytes[..], PNG_MAGIC);
}

#[tokio::test]
async fn upstream_sse_response_is_streamed() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: [DONE]\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let backend = HttpUpstreamBackend::new(reqwest::Client::new(), server.uri());
    let request = serde_json::json!({"model": "omni-7b", "stream": true, "messages": []});
    match backend.chat_completion(request).await.unwrap() {
        UpstreamResponse::Sse(mut stream) => {
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(String::from_utf8(collected).unwrap(), body);
        }
        UpstreamResponse::Buffered(_) => panic!("expected an SSE response"),
    }
}

#[tokio::test]
async fn upstream_json_response_takes_the_buffered_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"},
                         "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let backend = HttpUpstreamBackend::new(reqwest::Client::new(), server.uri());
    let request = serde_json::json!({"model": "omni-7b", "messages": []});
    match backend.chat_completion(request).await.unwrap() {
        UpstreamResponse::Buffered(body) => assert!(body.contains("chatcmpl-1")),
        UpstreamResponse::Sse(_) => panic!("expected a buffered response"),
    }
}

#[tokio::test]
async fn upstream_failure_maps_to_gateway_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
        .mount(&server)
        .await;

    let backend = HttpUpstreamBackend::new(reqwest::Client::new(), server.uri());
    let err = backend
        .chat_completion(serde_json::json!({"messages": []}))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
    let body = err.to_error_body();
    assert_eq!(body["error"]["code"], 502);
}

#[tokio::test]
async fn service_transcodes_an_upstream_sse_stream_end_to_end() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"chatcmpl-7\",\"created\":3,\"model\":\"omni-7b\",",
        "\"choices\":[{\"index\":0,\"delta\":{\"content\":\"plain answer\"}}]}\n\n",
        "data: [DONE]\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let config = BridgeConfig::new(server.uri());
    let client = reqwest::Client::new();
    let service = BridgeService::new(
        config.clone(),
        Arc::new(HttpUpstreamBackend::new(client.clone(), server.uri())),
        Arc::new(HttpAudioDecoder::new(
            client.clone(),
            config.audio_decoder_url.clone(),
        )),
        MediaResolver::new(
            Arc::new(HttpMediaFetcher::new(
                client.clone(),
                config.object_store_endpoint.clone(),
            )),
            Arc::new(HttpVisionDecoder::new(
                client,
                config.vision_decoder_url.clone(),
            )),
        ),
    );

    let request = serde_json::json!({"model": "omni-7b", "stream": true,
        "messages": [{"role": "user", "content": "hi"}]});
    let mut stream = service.chat_stream(request).await.unwrap();

    let mut out = String::new();
    while let Some(frame) = stream.next().await {
        out.push_str(&String::from_utf8_lossy(&frame));
    }
    assert!(out.contains("plain answer"));
    assert!(out.ends_with("data: [DONE]\n\n"));
    assert!(out.contains("\"id\":\"chatcmpl-7\""));
}

#[tokio::test]
async fn service_rejects_invalid_media_before_calling_upstream() {
    // No mock server mounted at all: validation must fail first.
    let config = BridgeConfig::new("http://127.0.0.1:1");
    let service = BridgeService::from_config(config);
    let request = serde_json::json!({
        "messages": [{"role": "user", "content": [
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,!!bad!!"}}
        ]}]
    });
    let err = service
        .chat_stream(request)
        .await
        .err()
        .expect("expected an error");
    assert_eq!(err.status_code(), 400);
}
