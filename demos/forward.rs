use std::sync::Arc;

use tunnel_proxy::net::{HttpTransport, InterceptedRequest};
use tunnel_proxy::storage::InMemoryStore;
use tunnel_proxy::{FetchOutcome, ProxyConfig, ProxyEngine, UrlCodec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Usage: forward <url or search words> [config.json]
    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| "example.com".to_string());
    let config = match args.next() {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            ProxyConfig::from_json(&raw)?
        }
        None => ProxyConfig::default(),
    };

    let Some(target) = UrlCodec::from_user_input(&input) else {
        eprintln!("nothing to fetch");
        return Ok(());
    };

    let engine = ProxyEngine::new(
        config,
        Arc::new(HttpTransport::new()?),
        Arc::new(InMemoryStore::new()),
    )?;
    engine.init().await?;
    engine.start();

    // Page messages would normally be routed to the open pages by the host
    let mut messages = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(out) = messages.recv().await {
            println!("-> {:?}: {:?}", out.to, out.message);
        }
    });

    let url = engine.codec().encode(&target);
    println!("GET {}", url);

    match engine.handle_fetch(InterceptedRequest::get(url)).await {
        FetchOutcome::PassThrough => println!("passed through to the host"),
        FetchOutcome::Respond(res) => {
            println!("status: {}", res.status);
            for (name, value) in res.headers.iter() {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            let body = res.body.collect().await?;
            println!("body: {} bytes", body.len());
        }
    }

    engine.shutdown().await;
    Ok(())
}
