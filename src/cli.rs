//! # VACTL CLI
//!
//! Command-line interface for the Vault Access Controller.
//!
//! ## Usage
//!
//! ```bash
//! # Print the AccessRequest CRD
//! vactl crd | kubectl apply -f -
//!
//! # List AccessRequests in all namespaces
//! vactl list
//!
//! # Show status of an AccessRequest
//! vactl status pg-req --namespace pg
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::{
    api::{Api, ListParams},
    Client, CustomResourceExt, ResourceExt,
};
use vault_access_controller::controller::reconciler::conditions::phase;
use vault_access_controller::crd::AccessRequest;

/// Vault Access Controller CLI
#[derive(Parser)]
#[command(name = "vactl")]
#[command(
    about = "Vault Access Controller CLI",
    long_about = None,
    after_help = "\
Examples:
  vactl crd
  vactl list --namespace pg
  vactl status pg-req --namespace pg
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to all namespaces for list, 'default' otherwise)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the AccessRequest CustomResourceDefinition as YAML
    Crd,
    /// List AccessRequest resources
    List,
    /// Show detailed status of an AccessRequest
    Status {
        /// Name of the AccessRequest resource
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Crd = cli.command {
        return crd_command();
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vactl=info".into()),
        )
        .init();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::Crd => crd_command(),
        Commands::List => list_command(client, cli.namespace).await,
        Commands::Status { name } => status_command(client, name, cli.namespace).await,
    }
}

fn crd_command() -> Result<()> {
    let yaml = serde_yaml::to_string(&AccessRequest::crd())
        .context("Failed to serialize AccessRequest CRD")?;
    print!("{yaml}");
    Ok(())
}

async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<AccessRequest> = if let Some(ns) = &namespace {
        Api::namespaced(client, ns)
    } else {
        Api::all(client)
    };

    let requests = api
        .list(&ListParams::default())
        .await
        .context("Failed to list AccessRequest resources")?;

    if requests.items.is_empty() {
        println!("No AccessRequest resources found.");
        return Ok(());
    }

    println!(
        "{:<30} {:<20} {:<10} {:<30} {:<30} {:<20}",
        "NAME", "NAMESPACE", "PHASE", "ROLE", "SECRET", "LEASE"
    );

    for request in &requests.items {
        let status = request.status.as_ref();
        let secret = status
            .and_then(|s| s.secret_ref.as_ref())
            .map_or("-", |r| r.name.as_str());
        let lease = status
            .and_then(|s| s.lease.as_ref())
            .map_or("-", |l| l.id.as_str());
        let role = format!(
            "{}/{}",
            request.spec.role_ref.kind, request.spec.role_ref.name
        );
        println!(
            "{:<30} {:<20} {:<10} {:<30} {:<30} {:<20}",
            request.name_any(),
            request.namespace_or_default(),
            phase(request).as_str(),
            role,
            secret,
            lease
        );
    }

    Ok(())
}

async fn status_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<AccessRequest> = Api::namespaced(client, ns);

    let request = api
        .get(&name)
        .await
        .with_context(|| format!("Failed to get AccessRequest '{ns}/{name}'"))?;

    println!("AccessRequest '{ns}/{name}'");
    println!("  Phase: {}", phase(&request));
    if let Some(generation) = request.metadata.generation {
        println!("  Generation: {generation}");
    }

    println!();
    println!("Spec:");
    println!(
        "  Role: {} {} (namespace {})",
        request.spec.role_ref.kind,
        request.spec.role_ref.name,
        request.role_namespace()
    );
    for subject in &request.spec.subjects {
        match &subject.namespace {
            Some(subject_ns) => println!("  Subject: {} {subject_ns}/{}", subject.kind, subject.name),
            None => println!("  Subject: {} {}", subject.kind, subject.name),
        }
    }

    let Some(status) = &request.status else {
        println!();
        println!("Status: No status available (resource may not have been reconciled yet)");
        return Ok(());
    };

    println!();
    println!("Status:");
    if let Some(observed) = status.observed_generation {
        println!("  Observed Generation: {observed}");
    }
    if let Some(secret_ref) = &status.secret_ref {
        println!("  Secret: {}", secret_ref.name);
    }
    if let Some(lease) = &status.lease {
        println!("  Lease: {}", lease.id);
        println!("    Duration: {}s", lease.duration);
        println!("    Issued: {}", lease.issue_time);
        if let Some(expiry) = lease.expiry_time() {
            println!("    Expires: {}", expiry.to_rfc3339());
        }
    }

    if !status.conditions.is_empty() {
        println!();
        println!("Conditions:");
        for condition in &status.conditions {
            println!(
                "  {} {}={} ({})",
                condition.last_update_time, condition.r#type, condition.status, condition.reason
            );
            if !condition.message.is_empty() {
                println!("    {}", condition.message);
            }
        }
    }

    Ok(())
}
