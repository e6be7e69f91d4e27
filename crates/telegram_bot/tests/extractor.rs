use engine::Money;
use serde_json::json;
use telegram_bot::extractor::{
    ExtractError, ExtractRequest, Extractor, FallbackExtractor, HttpExtractor,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}

fn text_request(text: &str) -> ExtractRequest {
    ExtractRequest {
        text: Some(text.to_string()),
        image: None,
        known_methods: vec!["Cash".to_string(), "GoPay".to_string()],
    }
}

#[tokio::test]
async fn reads_items_from_a_fenced_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "```json\n{\"items\": [\
             {\"description\": \"nasi goreng\", \"amount\": 15000, \"merchant\": \"Warteg\", \"method\": \"GoPay\"},\
             {\"description\": \"es teh\", \"amount\": \"5rb\"}\
             ]}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let extractor = HttpExtractor::new(&format!("{}/v1/", server.uri()), "key-1", "gpt-test");
    let found = extractor
        .extract(&text_request("nasi goreng 15k es teh 5rb di warteg pakai gopay"))
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].description.as_deref(), Some("nasi goreng"));
    assert_eq!(found[0].amount, Some(Money::new(15_000)));
    assert_eq!(found[0].merchant.as_deref(), Some("Warteg"));
    assert_eq!(found[0].method.as_deref(), Some("GoPay"));
    assert_eq!(found[1].amount, Some(Money::new(5_000)));
    assert_eq!(found[1].merchant, None);
}

#[tokio::test]
async fn sends_photos_as_data_urls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "{\"description\": \"Belanja\", \"harga\": 42000, \"namaToko\": \"Indomaret\"}",
        )))
        .mount(&server)
        .await;

    let extractor = HttpExtractor::new(&server.uri(), "key-1", "vision-test");
    let request = ExtractRequest {
        text: None,
        image: Some(vec![0xff, 0xd8, 0xff]),
        known_methods: Vec::new(),
    };
    let found = extractor.extract(&request).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].amount, Some(Money::new(42_000)));
    assert_eq!(found[0].merchant.as_deref(), Some("Indomaret"));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "vision-test");
    let url = body["messages"][1]["content"][1]["image_url"]["url"]
        .as_str()
        .unwrap();
    assert!(url.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn server_errors_surface() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let extractor = HttpExtractor::new(&server.uri(), "key-1", "gpt-test");
    let err = extractor
        .extract(&text_request("kopi 20k"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Server { .. }));
}

#[tokio::test]
async fn fallback_reads_text_when_the_remote_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let extractor = FallbackExtractor::new(HttpExtractor::new(&server.uri(), "k", "m"));
    let found = extractor
        .extract(&text_request("kopi susu 20k gopay"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].description.as_deref(), Some("kopi susu"));
    assert_eq!(found[0].amount, Some(Money::new(20_000)));
    assert_eq!(found[0].method.as_deref(), Some("GoPay"));

    // Nothing to fall back on for a photo.
    let photo = ExtractRequest {
        image: Some(vec![1, 2, 3]),
        ..ExtractRequest::default()
    };
    assert!(extractor.extract(&photo).await.is_err());
}
