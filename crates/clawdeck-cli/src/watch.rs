//! `watch` command: connect to the gateway WebSocket and print events.

use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub async fn run_watch(url: String, token: Option<String>) -> anyhow::Result<()> {
    let url = match token {
        Some(token) => format!("{url}?token={token}"),
        None => url,
    };

    let (ws, _) = connect_async(url.as_str()).await?;
    println!("Connected to {url}");

    let (_, mut read) = ws.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(frame) => {
                    let event = frame["event"].as_str().unwrap_or("?");
                    println!("[{event}] {}", frame["payload"]);
                }
                Err(_) => println!("{text}"),
            },
            Message::Close(_) => {
                println!("Connection closed by server");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
