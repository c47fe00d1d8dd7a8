use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Report, WrapErr, eyre};
use ksef_client::{
    auth::{AuthSession, SessionRefresher},
    cache::{InvoiceStore, MemoryStore, RedisStore},
    config::Config,
    credential::CredentialStore,
    document::InvoiceDocument,
    gateway::{InvoiceGateway, PageSource},
    invoice::Direction,
    ksef::{InvoicePayload, KsefClient},
    render::render_html,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "ksef-client", about = "KSeF e-invoice client", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Authenticate with the configured token and report the session
    Auth,
    /// List received or sent invoices
    List(ListArgs),
    /// Download one invoice
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct ListArgs {
    /// `received` or `sent`
    #[arg(long, default_value = "received")]
    direction: Direction,

    #[arg(long, default_value_t = 20)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// KSeF number of the invoice
    ksef_id: String,

    /// Write a print-ready HTML rendering to this file
    #[arg(long)]
    html: Option<PathBuf>,

    /// Write the unwrapped invoice content to this file
    #[arg(long)]
    raw: Option<PathBuf>,
}

impl Cli {
    pub(crate) async fn run(self, config: Config) -> color_eyre::Result<()> {
        let gateway = build_gateway(&config).await?;
        let refresher = SessionRefresher::new(
            Arc::clone(gateway.session()),
            config.refresh_config(),
        );
        refresher.start();

        let result = match self.command {
            Commands::Auth => auth(&gateway).await,
            Commands::List(args) => list(&gateway, args).await,
            Commands::Show(args) => show(&gateway, args).await,
        };

        refresher.stop();
        result
    }
}

async fn build_gateway(config: &Config) -> color_eyre::Result<InvoiceGateway> {
    let client = KsefClient::new(&config.api.base_url, config.api.request_timeout())
        .wrap_err("failed to build HTTP client")?;
    let credentials = CredentialStore::new(config.api.credential());
    let session = Arc::new(AuthSession::new(
        client.clone(),
        credentials,
        config.auth_config(),
    ));

    let store: Arc<dyn InvoiceStore> = match &config.cache.redis {
        Some(redis) => {
            let conn = redis
                .start()
                .await
                .wrap_err("failed to connect to Redis")?;
            info!("Using Redis invoice cache");
            Arc::new(RedisStore::new(conn))
        }
        None => Arc::new(MemoryStore::new()),
    };

    Ok(InvoiceGateway::new(
        client,
        session,
        store,
        config.gateway_config(),
    ))
}

async fn auth(gateway: &InvoiceGateway) -> color_eyre::Result<()> {
    let session = gateway.session();
    let access = session.authenticate().await.map_err(|e| {
        if e.is_retriable() {
            Report::new(e).wrap_err("KSeF is temporarily unreachable, try again later")
        } else {
            Report::new(e).wrap_err("authentication rejected, check the configured token")
        }
    })?;

    println!(
        "authenticated: nip {}",
        session
            .credentials()
            .tax_id()
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "valid_until: {}",
        access
            .expires_at()
            .map_or_else(|| "unknown".to_string(), |value| value.to_rfc3339())
    );
    Ok(())
}

async fn list(gateway: &InvoiceGateway, args: ListArgs) -> color_eyre::Result<()> {
    let page = gateway
        .list_invoices(args.direction, args.limit, args.offset)
        .await;

    if let Some(reason) = page.error() {
        return Err(eyre!("failed to list invoices: {reason}"));
    }
    match &page.source {
        PageSource::Cache => eprintln!("(served from cache)"),
        PageSource::Fallback { reason } => {
            eprintln!("(KSeF unavailable, showing cached invoices: {reason})")
        }
        PageSource::Remote => {}
    }

    if page.invoices.is_empty() {
        println!("no {} invoices found", args.direction);
        return Ok(());
    }

    for invoice in &page.invoices {
        println!(
            "{}  {:<20}  {:>12.2} {}  {}  {}",
            invoice.id,
            invoice.invoice_number.as_deref().unwrap_or("-"),
            invoice.amount,
            invoice.currency,
            invoice.issue_date.as_deref().unwrap_or("-"),
            invoice.counterpart_name,
        );
    }
    Ok(())
}

async fn show(gateway: &InvoiceGateway, args: ShowArgs) -> color_eyre::Result<()> {
    let payload = gateway.fetch_invoice_details(&args.ksef_id).await?;

    if let Some(path) = &args.raw {
        tokio::fs::write(path, payload.to_bytes())
            .await
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    if let Some(path) = &args.html {
        let document = InvoiceDocument::from_payload(&payload)?;
        tokio::fs::write(path, render_html(&document, &args.ksef_id))
            .await
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    if args.raw.is_none() && args.html.is_none() {
        print_payload(&payload);
    }
    Ok(())
}

fn print_payload(payload: &InvoicePayload) {
    match InvoiceDocument::from_payload(payload) {
        Ok(document) => {
            println!(
                "invoice_number: {}",
                document.invoice_number.as_deref().unwrap_or("-")
            );
            println!("issue_date: {}", document.issue_date.as_deref().unwrap_or("-"));
            println!("seller: {}", document.seller.name.as_deref().unwrap_or("-"));
            println!("buyer: {}", document.buyer.name.as_deref().unwrap_or("-"));
            println!("net: {:.2} {}", document.net_total, document.currency);
            println!("vat: {:.2} {}", document.vat_total, document.currency);
            println!("gross: {:.2} {}", document.gross_total, document.currency);
            println!("line_items: {}", document.line_items.len());
        }
        Err(_) => println!("{}", String::from_utf8_lossy(&payload.to_bytes())),
    }
}
