//! Operator CLI for the gateway HTTP API
//!
//! Usage:
//!   cargo run --bin cityctl -- list --kind CAMERA
//!   cargo run --bin cityctl -- command SL001 SetIntensity --params '{"intensity":40}'
//!   cargo run --bin cityctl -- discover

use city_gateway::domain::types::DeviceKind;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cityctl")]
#[command(about = "Query and command devices through the city gateway")]
struct Args {
    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:5000", env = "CITY_GATEWAY_URL")]
    gateway: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List registered devices
    List {
        /// Only show devices of this kind
        #[arg(long)]
        kind: Option<DeviceKind>,
    },
    /// Show one registry record
    Show { id: String },
    /// Fetch a device's live status
    Status { id: String },
    /// Send a command to an actuator
    Command {
        id: String,
        name: String,
        /// Command parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Register a device by hand
    Register {
        id: String,
        kind: DeviceKind,
        #[arg(long)]
        address: Option<String>,
    },
    /// Run a discovery round now
    Discover,
    /// Show recent sensor readings
    Telemetry {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    async fn get(&self, path: &str) -> Result<(u16, Value), String> {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        Self::decode(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(u16, Value), String> {
        let payload = serde_json::to_vec(body).map_err(|e| e.to_string())?;
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        Self::decode(resp).await
    }

    async fn decode(resp: reqwest::Response) -> Result<(u16, Value), String> {
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| format!("failed to read body: {e}"))?;
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        Ok((status, value))
    }
}

async fn run(args: Args) -> Result<(u16, Value), String> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
        .map_err(|e| e.to_string())?;
    let client = Client { base: args.gateway.trim_end_matches('/').to_string(), http };

    match args.action {
        Action::List { kind } => {
            let (status, mut body) = client.get("/devices").await?;
            if let (Some(kind), Some(devices)) = (kind, body.get_mut("devices").and_then(Value::as_array_mut)) {
                devices.retain(|d| d["kind"] == kind.as_str());
            }
            Ok((status, body))
        }
        Action::Show { id } => client.get(&format!("/devices/{id}")).await,
        Action::Status { id } => client.get(&format!("/devices/{id}/status")).await,
        Action::Command { id, name, params } => {
            let params: Value = match params {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("invalid --params: {e}"))?,
                None => Value::Null,
            };
            let body = if params.is_null() {
                json!({ "command": name })
            } else {
                json!({ "command": name, "params": params })
            };
            client.post(&format!("/devices/{id}/command"), &body).await
        }
        Action::Register { id, kind, address } => {
            let mut body = json!({ "deviceId": id, "kind": kind });
            if let Some(address) = address {
                body["address"] = json!(address);
            }
            client.post("/registry", &body).await
        }
        Action::Discover => client.post("/discovery", &Value::Null).await,
        Action::Telemetry { limit } => client.get(&format!("/telemetry?limit={limit}")).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok((status, body)) => {
            let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            if (200..300).contains(&status) {
                println!("{text}");
                ExitCode::SUCCESS
            } else {
                eprintln!("HTTP {status}");
                eprintln!("{text}");
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
