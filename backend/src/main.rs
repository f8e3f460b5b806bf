use backend::{app, ServerState};
use std::env;

#[tokio::main]
async fn main() {
    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let app = app(ServerState::default());
    println!("Starting server on {addr}");
    axum::serve(
        tokio::net::TcpListener::bind(&addr).await.expect("bind"),
        app,
    )
    .await
    .expect("server error");
}
