use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request},
    response::Response,
};
use serde_json::Value;

use crate::services::notifications::{HttpResponse, MockNotificationSink};

/// Mock sink that accepts every side effect.
pub fn permissive_sink() -> MockNotificationSink {
    let mut sink = MockNotificationSink::new();
    sink.expect_send_email().returning(|_, _, _| Ok(()));
    sink.expect_notify().returning(|_| Ok(()));
    sink.expect_schedule_event().returning(|_| Ok("evt_test".to_string()));
    sink.expect_http_request().returning(|_| {
        Ok(HttpResponse {
            status: 200,
            body: serde_json::json!({"ok": true}),
        })
    });
    sink.expect_check_status().returning(|_| Ok(200));
    sink.expect_generate_text().returning(|prompt| Ok(format!("summary of: {}", prompt)));
    sink
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn read_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
