//! Telegram transport against a mock Bot API server.

use std::time::Duration;

use advent_core::{
    CalendarDefinition, ChatId, Config, FixedClock, InboundRequest, Ledger, Outcome, Payload,
    RequesterId, Router, TelegramTransport, Transport, TransportError, UpdatePoller,
};
use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const TOKEN: &str = "TEST";

fn ok_message() -> String {
    json!({
        "ok": true,
        "result": { "message_id": 1, "chat": { "id": 42 }, "date": 0 }
    })
    .to_string()
}

#[tokio::test]
async fn test_sends_text_and_markdown_parts_in_order() {
    let mut server = Server::new_async().await;
    let text = server
        .mock("POST", "/botTEST/sendMessage")
        .match_body(Matcher::Json(json!({ "chat_id": 42, "text": "Here is your door:" })))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .expect(1)
        .create_async()
        .await;
    let markdown = server
        .mock("POST", "/botTEST/sendMessage")
        .match_body(Matcher::Json(json!({
            "chat_id": 42,
            "text": "*bold*",
            "parse_mode": "MarkdownV2"
        })))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .expect(1)
        .create_async()
        .await;

    let transport = TelegramTransport::new(&server.url(), TOKEN).unwrap();
    let payload = Payload::from_lines(["Here is your door:", "MARKDOWN:*bold*"]);
    transport.send_message(ChatId(42), &payload).await.unwrap();

    text.assert_async().await;
    markdown.assert_async().await;
}

#[tokio::test]
async fn test_photo_url_is_sent_by_reference() {
    let mut server = Server::new_async().await;
    let photo = server
        .mock("POST", "/botTEST/sendPhoto")
        .match_body(Matcher::PartialJson(json!({
            "chat_id": 7,
            "photo": "https://example.com/door.jpg"
        })))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .create_async()
        .await;

    let transport = TelegramTransport::new(&server.url(), TOKEN).unwrap();
    let payload = Payload::from_lines(["IMAGE: https://example.com/door.jpg"]);
    transport.send_message(ChatId(7), &payload).await.unwrap();

    photo.assert_async().await;
}

#[tokio::test]
async fn test_local_photo_is_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("door1.jpg"), b"not really a jpeg").unwrap();

    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/botTEST/sendPhoto")
        .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
        .match_body(Matcher::Regex("filename=\"door1.jpg\"".into()))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .create_async()
        .await;

    let transport = TelegramTransport::new(&server.url(), TOKEN)
        .unwrap()
        .with_media_root(dir.path());
    let payload = Payload::from_lines(["IMAGE:door1.jpg"]);
    transport.send_message(ChatId(7), &payload).await.unwrap();

    upload.assert_async().await;
}

#[tokio::test]
async fn test_missing_local_photo_is_an_attachment_error() {
    let dir = tempfile::tempdir().unwrap();
    let transport = TelegramTransport::new("http://127.0.0.1:9", TOKEN)
        .unwrap()
        .with_media_root(dir.path());

    let err = transport
        .send_message(ChatId(7), &Payload::from_lines(["IMAGE:missing.jpg"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Attachment { .. }));
}

#[tokio::test]
async fn test_api_rejection_carries_description() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/botTEST/sendMessage")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let transport = TelegramTransport::new(&server.url(), TOKEN).unwrap();
    let err = transport
        .send_message(ChatId(42), &Payload::text("hello"))
        .await
        .unwrap_err();
    match err {
        TransportError::Rejected {
            status,
            description,
        } => {
            assert_eq!(status, 403);
            assert!(description.contains("blocked"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_network_errors_do_not_leak_token() {
    let transport = TelegramTransport::new("http://127.0.0.1:9", "SECRET-TOKEN").unwrap();
    let err = transport
        .send_message(ChatId(1), &Payload::text("hello"))
        .await
        .unwrap_err();
    assert!(!err.to_string().contains("SECRET-TOKEN"));
}

#[tokio::test]
async fn test_get_updates_and_get_me() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/botTEST/getMe")
        .with_header("content-type", "application/json")
        .with_body(json!({ "ok": true, "result": { "id": 5, "first_name": "Advent", "username": "advent_bot" } }).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/botTEST/getUpdates")
        .match_body(Matcher::PartialJson(json!({ "offset": 0, "timeout": 0 })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ok": true,
                "result": [
                    { "update_id": 100, "message": {
                        "message_id": 1, "date": 0,
                        "from": { "id": 1001, "first_name": "Alice" },
                        "chat": { "id": 1001 }, "text": "/open 3" } },
                    { "update_id": 101 }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let transport = TelegramTransport::new(&server.url(), TOKEN).unwrap();
    assert_eq!(transport.get_me().await.unwrap(), "advent_bot");

    let updates = transport.get_updates(0, 0).await.unwrap();
    assert_eq!(updates.len(), 2);
    let requests: Vec<InboundRequest> = updates.into_iter().filter_map(|u| u.into_request()).collect();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].requester, RequesterId(1001));
    assert_eq!(requests[0].display_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_poller_forwards_and_stops_on_shutdown() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/botTEST/getUpdates")
        .match_body(Matcher::PartialJson(json!({ "offset": 0 })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ok": true,
                "result": [
                    { "update_id": 7, "message": {
                        "message_id": 1, "date": 0,
                        "from": { "id": 1001, "first_name": "Alice" },
                        "chat": { "id": 1001 }, "text": "/opened" } }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let acknowledged = server
        .mock("POST", "/botTEST/getUpdates")
        .match_body(Matcher::PartialJson(json!({ "offset": 8 })))
        .with_header("content-type", "application/json")
        .with_body(json!({ "ok": true, "result": [] }).to_string())
        .expect_at_least(1)
        .create_async()
        .await;

    let transport = Arc::new(TelegramTransport::new(&server.url(), TOKEN).unwrap());
    let poller = UpdatePoller::new(transport, 0).with_error_backoff(Duration::from_millis(10));
    let (tx, mut rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(tx, shutdown_rx));

    let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.text, "/opened");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(rx.recv().await.is_none());
    acknowledged.assert_async().await;
}

#[tokio::test]
async fn test_poller_does_not_acknowledge_unforwarded_updates() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/botTEST/getUpdates")
        .match_body(Matcher::PartialJson(json!({ "offset": 0 })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ok": true,
                "result": [
                    { "update_id": 7, "message": {
                        "message_id": 1, "date": 0,
                        "from": { "id": 1001, "first_name": "Alice" },
                        "chat": { "id": 1001 }, "text": "/open 1" } }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let acknowledged = server
        .mock("POST", "/botTEST/getUpdates")
        .match_body(Matcher::PartialJson(json!({ "offset": 8 })))
        .with_header("content-type", "application/json")
        .with_body(json!({ "ok": true, "result": [] }).to_string())
        .expect(0)
        .create_async()
        .await;

    let transport = Arc::new(TelegramTransport::new(&server.url(), TOKEN).unwrap());
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::time::timeout(
        Duration::from_secs(5),
        UpdatePoller::new(transport, 0).run(tx, shutdown_rx),
    )
    .await
    .unwrap();

    first.assert_async().await;
    acknowledged.assert_async().await;
}

#[tokio::test]
async fn test_markdown_rejection_is_sent_once() {
    let mut server = Server::new_async().await;
    let prelude = server
        .mock("POST", "/botTEST/sendMessage")
        .match_body(Matcher::Json(json!({ "chat_id": 1001, "text": "Here is your door:" })))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .expect(1)
        .create_async()
        .await;
    let markdown = server
        .mock("POST", "/botTEST/sendMessage")
        .match_body(Matcher::PartialJson(json!({ "parse_mode": "MarkdownV2" })))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: can't parse entities"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let failure_reply = server
        .mock("POST", "/botTEST/sendMessage")
        .match_body(Matcher::PartialJson(json!({
            "text": "Door 1 could not be delivered right now. Please try again later."
        })))
        .with_header("content-type", "application/json")
        .with_body(ok_message())
        .expect(1)
        .create_async()
        .await;

    let config = Config::from_toml_str(
        "[calendar]\ndays = 1\nyear = 2024\nrequesters = [1001]\n\
         [[calendar.day]]\nday = 1\npayload = 'MARKDOWN:Merry Xmas.'\n\
         [delivery]\ninitial_backoff_ms = 1\nmax_backoff_ms = 2\n",
    )
    .unwrap();
    let calendar = Arc::new(CalendarDefinition::load(&config.calendar).unwrap());
    let ledger = Arc::new(Ledger::open_memory().unwrap());
    let transport = Arc::new(TelegramTransport::new(&server.url(), TOKEN).unwrap());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 12, 1, 12, 0, 0).unwrap()));
    let router = Router::new(&config, calendar, ledger.clone(), transport, clock);

    let outcome = router
        .handle(&InboundRequest::new(RequesterId(1001), ChatId(1001), "/open 1"))
        .await;
    assert_eq!(outcome, Outcome::DeliveryFailed { day: 1 });
    assert_eq!(ledger.count().unwrap(), 0);

    prelude.assert_async().await;
    markdown.assert_async().await;
    failure_reply.assert_async().await;
}
