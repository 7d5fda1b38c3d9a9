use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use confab_agents::tools::{Tool, ToolContext, WeatherTool};
use confab_common::Result;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::oneshot;

async fn start_mock_server() -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let app = Router::new().route("/current", get(mock_current));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, tx)
}

async fn mock_current(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    if params.get("access_key").map(String::as_str) != Some("good-key") {
        // Weatherstack reports auth failures with HTTP 200 and an error body.
        return Json(json!({
            "success": false,
            "error": {"code": 101, "type": "invalid_access_key", "info": "invalid access key"}
        }));
    }

    Json(json!({
        "location": {"name": "Lisbon", "country": "Portugal"},
        "current": {
            "temperature": 21,
            "humidity": 60,
            "weather_descriptions": ["Partly cloudy"]
        }
    }))
}

fn context() -> ToolContext {
    ToolContext {
        thread_id: "t1".to_string(),
    }
}

#[tokio::test]
async fn maps_weatherstack_fields() -> Result<()> {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let tool = WeatherTool::new(Some("good-key".to_string()))
        .with_base_url(format!("http://{addr}"));

    let output = tool
        .execute(&context(), json!({"place": "Lisbon"}))
        .await?;

    assert!(!output.is_error());
    assert_eq!(output.content["location"], "Lisbon");
    assert_eq!(output.content["country"], "Portugal");
    assert_eq!(output.content["temperature"], 21.0);
    assert_eq!(output.content["humidity"], 60.0);
    assert_eq!(output.content["description"][0], "Partly cloudy");

    Ok(())
}

#[tokio::test]
async fn backend_error_body_becomes_error_result() -> Result<()> {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let tool = WeatherTool::new(Some("bad-key".to_string()))
        .with_base_url(format!("http://{addr}"));

    let output = tool
        .execute(&context(), json!({"place": "Lisbon"}))
        .await?;

    assert!(output.is_error());
    assert_eq!(output.content["error"], "invalid access key");

    Ok(())
}

#[tokio::test]
async fn missing_place_becomes_error_result() -> Result<()> {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let tool = WeatherTool::new(Some("good-key".to_string()))
        .with_base_url(format!("http://{addr}"));

    let output = tool.execute(&context(), json!({})).await?;

    assert!(output.is_error());

    Ok(())
}
