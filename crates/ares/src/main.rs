use std::io::Read as _;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ares", about = "Ares: one-time secret sharing", version)]
struct Cli {
    /// Ares server URL (default: http://localhost:8080 or $ARES_SERVER)
    #[arg(long, env = "ARES_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Ares HTTP server
    Serve {
        /// Port to listen on (default: $SERVER_PORT or 8080)
        #[arg(long, env = "SERVER_PORT")]
        port: Option<u16>,
        /// Host to bind (default: $SERVER_HOST or 0.0.0.0)
        #[arg(long, env = "SERVER_HOST")]
        host: Option<String>,
    },
    /// Store a secret and print its one-time URL
    Create {
        /// Secret content, or `-` to read it from stdin
        content: String,
        /// Lifetime in hours: 24, 48 or 72
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Read (and burn) a secret by id or share URL
    Read {
        /// Secret id or the URL returned by `create`
        id: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ARES_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Create { content, hours } => {
            let content = if content == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("read secret from stdin")?;
                buf.trim_end_matches(['\r', '\n']).to_owned()
            } else {
                content
            };
            let created = create_secret(&Client::new(), &cli.server, &content, hours).await?;
            println!("{}", created.url);
            eprintln!("id {} expires at {}", created.id, created.expires_at);
            Ok(())
        }

        Commands::Read { id } => {
            let revealed = read_secret(&Client::new(), &cli.server, secret_id(&id)).await?;
            println!("{}", revealed.content);
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut cfg = ares_server::ServerConfig::from_env()?;
    if let Some(host) = host {
        cfg.host = host;
    }
    if let Some(port) = port {
        cfg.port = port;
    }
    ares_server::run(cfg).await
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
    url: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct Revealed {
    content: String,
}

async fn create_secret(
    client: &Client,
    server: &str,
    content: &str,
    hours: i64,
) -> Result<Created> {
    let resp = client
        .post(format!("{}/api/secrets", server.trim_end_matches('/')))
        .json(&json!({ "content": content, "expiration_hours": hours }))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    resp.json().await.context("parse create response")
}

async fn read_secret(client: &Client, server: &str, id: &str) -> Result<Revealed> {
    let resp = client
        .get(format!("{}/api/secrets/{}", server.trim_end_matches('/'), id))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    resp.json().await.context("parse secret response")
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Accept either a bare id or a share URL ending in one.
fn secret_id(input: &str) -> &str {
    input
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(input)
}

async fn server_error(resp: Response) -> anyhow::Error {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    match json["error"].as_str() {
        Some(error) => anyhow::anyhow!("server returned {status}: {error}"),
        None => anyhow::anyhow!("server returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn extracts_id_from_share_url() {
        assert_eq!(secret_id(ID), ID);
        assert_eq!(secret_id(&format!("https://share.example.com/secret/{ID}")), ID);
        assert_eq!(secret_id(&format!("https://share.example.com/secret/{ID}/")), ID);
    }

    #[tokio::test]
    async fn create_posts_content_and_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/secrets"))
            .and(body_json(json!({"content": "hunter2", "expiration_hours": 48})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": ID,
                "url": format!("https://share.example.com/secret/{ID}"),
                "expires_at": "2023-11-16T22:13:20Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = create_secret(&Client::new(), &server.uri(), "hunter2", 48)
            .await
            .unwrap();
        assert_eq!(created.id, ID);
        assert!(created.url.ends_with(ID));
        assert_eq!(created.expires_at, "2023-11-16T22:13:20Z");
    }

    #[tokio::test]
    async fn create_surfaces_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/secrets"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "expiration hours must be 24, 48, or 72"})),
            )
            .mount(&server)
            .await;

        let err = create_secret(&Client::new(), &server.uri(), "x", 12)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("400"), "{msg}");
        assert!(msg.contains("24, 48, or 72"), "{msg}");
    }

    #[tokio::test]
    async fn read_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/secrets/{ID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "hello",
                "created_at": "2023-11-14T22:13:20Z",
                "expires_at": "2023-11-15T22:13:20Z",
            })))
            .mount(&server)
            .await;

        let revealed = read_secret(&Client::new(), &format!("{}/", server.uri()), ID)
            .await
            .unwrap();
        assert_eq!(revealed.content, "hello");
    }

    #[tokio::test]
    async fn read_of_burned_secret_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/secrets/{ID}")))
            .respond_with(
                ResponseTemplate::new(410)
                    .set_body_json(json!({"error": "secret has already been accessed"})),
            )
            .mount(&server)
            .await;

        let err = read_secret(&Client::new(), &server.uri(), ID)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already been accessed"));
    }
}
