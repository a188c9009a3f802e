use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use incubator::approval::ApprovalEngine;
use incubator::metrics::WorkflowMetrics;
use incubator::models::approval::ApprovalStatus;
use incubator::notification::email::HttpMailer;
use incubator::notification::invitation::InvitationLinks;
use incubator::store::postgres::PgStore;
use incubator::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // `--help` and argument errors must not depend on the environment.
    let args = cli::Cli::parse();
    // Before the subscriber, so RUST_LOG from .env applies.
    dotenvy::dotenv().ok();

    // OTLP export only when an endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "incubator"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "incubator=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Invite {
            project_id,
            relation,
            emails,
        }) => {
            let engine = build_engine(&cfg).await?;
            handle_invite(&engine, &project_id, &relation, &emails).await
        }
        Some(cli::Commands::Approval { command }) => {
            let engine = build_engine(&cfg).await?;
            handle_approval_command(&engine, command).await
        }
        Some(cli::Commands::Relation { command }) => {
            let engine = build_engine(&cfg).await?;
            handle_relation_command(&engine, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Connect to Postgres and assemble the engine with the configured mailer.
async fn build_engine(cfg: &config::Config) -> anyhow::Result<ApprovalEngine> {
    tracing::info!("Connecting to database...");
    let db = Arc::new(PgStore::connect(&cfg.database_url).await?);

    tracing::info!("Running migrations...");
    db.migrate().await?;

    if cfg.mail.is_none() {
        tracing::warn!("MAIL_API_KEY / MAIL_SENDER_EMAIL not set; invitation emails will be skipped");
    }
    let mailer = Arc::new(HttpMailer::new(cfg.mail.clone())?);
    let links = InvitationLinks::new(&cfg.public_base_url)?;

    Ok(ApprovalEngine::new(
        db.clone(),
        db.clone(),
        db,
        mailer,
        links,
        WorkflowMetrics::new()?,
    ))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let engine = build_engine(&cfg).await?;

    if cfg.redelivery_interval_secs > 0 {
        jobs::redelivery::spawn(
            engine.clone(),
            Duration::from_secs(cfg.redelivery_interval_secs),
        );
        tracing::info!(
            every_secs = cfg.redelivery_interval_secs,
            "Background invitation redelivery job started"
        );
    }

    let state = Arc::new(AppState {
        engine,
        config: cfg,
    });
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Incubator listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_project_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).context("Invalid project_id")
}

async fn handle_invite(
    engine: &ApprovalEngine,
    project_id: &str,
    relation: &str,
    emails: &[String],
) -> anyhow::Result<()> {
    let project = parse_project_id(project_id)?;
    let created = engine
        .generate_approval_requests(emails, project, relation)
        .await?;

    println!("{:<38} {:<38} {:<14} NOTIFIED", "ID", "USER", "RELATION");
    for r in created {
        println!(
            "{:<38} {:<38} {:<14} {}",
            r.id,
            r.invited_user_id,
            r.relation,
            if r.notified_at.is_some() { "yes" } else { "no" }
        );
    }
    Ok(())
}

async fn handle_approval_command(
    engine: &ApprovalEngine,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::List { project_id, status } => {
            let project = parse_project_id(&project_id)?;
            let status = status
                .as_deref()
                .map(str::parse::<ApprovalStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let approvals = engine.list_approvals(project, status).await?;

            if approvals.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }

            println!("{:<38} {:<14} {:<10} CREATED", "ID", "RELATION", "STATUS");
            for r in approvals {
                println!(
                    "{:<38} {:<14} {:<10} {}",
                    r.id,
                    r.relation,
                    r.status.as_str(),
                    r.created_at
                );
            }
        }
        cli::ApprovalCommands::Details { token } => {
            let d = engine.approval_details(&token).await?;
            println!("Project:  {}", d.project_name);
            println!("Invitee:  {} <{}>", d.user_name, d.user_email);
            println!("Relation: {}", d.relation);
            println!("Status:   {}", d.status.as_str());
        }
        cli::ApprovalCommands::Approve { token, relation } => {
            let message = engine.approve_request(&token, relation.as_deref()).await?;
            println!("{}", message);
        }
        cli::ApprovalCommands::Reject { token } => {
            let message = engine.reject_request(&token).await?;
            println!("{}", message);
        }
    }
    Ok(())
}

async fn handle_relation_command(
    engine: &ApprovalEngine,
    cmd: cli::RelationCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::RelationCommands::List {
            project_id,
            relation,
        } => {
            let project = parse_project_id(&project_id)?;
            let users = engine.relation_members(project, &relation).await?;
            if users.is_empty() {
                println!("No users in {}.", relation);
                return Ok(());
            }
            println!("{:<38} {:<32} NAME", "ID", "EMAIL");
            for u in users {
                println!("{:<38} {:<32} {}", u.id, u.email, u.display_name());
            }
        }
    }
    Ok(())
}
