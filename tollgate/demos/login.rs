//! Run with:
//!
//! ```no_rust
//! RUST_LOG=tollgate=trace cargo run -p tollgate --example login
//! ```

use std::time::Duration;
use http::Request;
use serde_json::json;
use tollgate::{
    by,
    presets::Preset,
    sweeper::SweeperConfig,
    Outcome,
    Policy,
    RateLimiting,
    RequestContext
};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=debug")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut limiting = RateLimiting::builder()
        .with_preset(Preset::Auth)
        .with_preset(Preset::PasswordReset)
        .with_policy(Policy::new(2, Duration::from_secs(10))
            .with_name("search")
            .with_key(by::user().or(by::ip()))
            .with_skip(|ctx| ctx.identity() == Some("admin")))
        .with_sweeper(SweeperConfig::default().with_interval(Duration::from_secs(5)))
        .build()?;
    limiting.start()?;

    let login = limiting.filter("auth")?;
    for attempt in 1..=7 {
        let ctx = RequestContext::from(Request::post("/login").body(())?)
            .with_peer_addr("203.0.113.7:51234".parse()?)
            .with_body(json!({ "email": "jane@example.com", "password": "wrong" }));

        match login.check(&ctx)? {
            Outcome::Continue(headers) => {
                println!("attempt {attempt}: 401 Unauthorized, remaining {:?}", headers.get("x-ratelimit-remaining"));
            }
            Outcome::Reject(rejection) => {
                let response = rejection.into_response();
                println!(
                    "attempt {attempt}: {} retry after {:?}: {}",
                    response.status(),
                    response.headers().get("retry-after"),
                    String::from_utf8_lossy(response.body())
                );
            }
        }
    }

    let search = limiting.filter("search")?;
    for identity in ["jane", "jane", "jane", "admin", "admin", "admin"] {
        let ctx = RequestContext::from(Request::get("/search?q=rust").body(())?)
            .with_peer_addr("203.0.113.7:51234".parse()?)
            .with_identity(identity);

        let verdict = if search.check(&ctx)?.is_continue() { "allowed" } else { "rejected" };
        println!("search as {identity}: {verdict}");
    }

    println!("tracked keys: {}", limiting.size());
    limiting.shutdown(true).await;
    Ok(())
}
