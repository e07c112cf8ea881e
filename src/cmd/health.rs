//! `switchyard health`: check the health of a running instance.
//!
//! Sends a `GET /healthz` request to the admin URL and displays the
//! response as formatted text or raw JSON.

use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::cli::HealthArgs;
use crate::error::SwitchyardError;
use crate::health::HealthResponse;

pub async fn execute(args: HealthArgs) -> Result<(), SwitchyardError> {
    let url = format!("{}/healthz", args.url.trim_end_matches('/'));
    let uri: hyper::Uri =
        url.parse()
            .map_err(|e: hyper::http::uri::InvalidUri| SwitchyardError::UriParse {
                source: Box::new(e),
            })?;

    let connector = hyper_util::client::legacy::connect::HttpConnector::new();
    let client = Client::builder(TokioExecutor::new()).build(connector);

    let req = hyper::Request::builder()
        .uri(uri)
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| SwitchyardError::HttpRequest {
            source: Box::new(e),
        })?;

    let response = tokio::time::timeout(std::time::Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| SwitchyardError::HttpRequest {
            source: "health check timed out after 10s".into(),
        })?
        .map_err(|e| SwitchyardError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| SwitchyardError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    if !status.is_success() {
        return Err(SwitchyardError::HealthCheckFailed(status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&body) {
        Ok(health) => {
            println!("\u{2713} switchyard is healthy ({})", args.url);
            println!("  version:   {} ({})", health.version, health.commit);
            println!("  uptime:    {}", format_uptime(health.uptime_seconds));
            println!("  resolver:  {}", health.resolver);
            println!(
                "  routing:   {} routes from {} ingresses, {} events applied, {} rules rejected",
                health.routing.routes,
                health.routing.resources,
                health.routing.events_applied,
                health.routing.rejected_rules
            );
            println!(
                "  requests:  {} forwarded, {} failed, {} unrouted",
                health.stats.requests_forwarded,
                health.stats.requests_failed,
                health.stats.requests_unrouted
            );
        }
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", String::from_utf8_lossy(&body));
        }
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::format_uptime;

    #[test]
    fn uptime_units() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3_725), "1h 2m 5s");
    }
}
