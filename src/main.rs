use anyhow::{anyhow, Result};
use is_terminal::IsTerminal;
use proxycrab::certs::{AcmeIssuer, CertificateManager, Http01Webroot, HttpDomainCheck};
use proxycrab::dns::{HttpPublicIpResolver, NamecheapClient, Providers, UpdateEngine};
use proxycrab::nginx::{NginxCommand, Reconciler};
use proxycrab::{Config, ControlPlane, Scheduler, SharedConfig};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("proxycrab".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let store = config.store().await?;

    if std::io::stdout().is_terminal() {
        println!("{}", proxycrab::crab::CRAB);
    }

    let issuer = AcmeIssuer::new(
        config.acme.directory_url.clone(),
        &config.acme.cert_root,
        Http01Webroot::new(&config.acme.webroot),
        config.acme.timeout,
    );
    let domain_check = HttpDomainCheck::new(config.acme.timeout)?;
    let certs = CertificateManager::new(config.clone(), Arc::new(issuer), store.clone())
        .with_domain_check(Arc::new(domain_check));
    let nginx = NginxCommand::new(
        config.nginx.test_command.clone(),
        config.nginx.reload_command.clone(),
    );
    let reconciler = Reconciler::new(config.clone(), store.clone(), Arc::new(nginx));

    let resolver = HttpPublicIpResolver::new(&config.dns)?;
    let namecheap = NamecheapClient::new(
        config.dns.namecheap_endpoint.clone(),
        config.dns.request_timeout,
    )?;
    let engine = Arc::new(UpdateEngine::new(
        store.clone(),
        Arc::new(resolver),
        Providers::new(Arc::new(namecheap)),
    ));
    let scheduler = Arc::new(Scheduler::new(engine.clone()));

    let started = scheduler.load_and_start(&store).await?;
    tracing::info!("scheduled {started} dynamic DNS record(s)");
    let sweep = scheduler.spawn_sweep(config.dns.sweep_interval);

    let control = Arc::new(ControlPlane::new(
        store,
        certs,
        reconciler,
        engine,
        scheduler.clone(),
    ));

    tracing::info!("API listening on {}", &config.api_bind_addr);
    let api_server = proxycrab::api::new(config.clone(), control);
    let api_handle = tokio::spawn(api_server);

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        Ok(api_res) = api_handle => {
            if let Err(err) = api_res {
                return Err(err.into())
            }
        }
    }

    scheduler.stop_all().await;
    if let Some(sweep) = sweep {
        sweep.abort();
    }
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxycrab=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            tracing::debug!("loaded config from {config_file}");
            let config = Config::try_from_file(&config_file)?;
            Ok(Arc::new(config))
        }
    }
}
