//! Discovery commands - contexts, namespaces and services.

use anyhow::Result;
use kubetunnel_core::kubernetes::with_context;
use kubetunnel_core::{ClusterApi, KubernetesDiscovery};

use super::truncate;

pub async fn contexts(discovery: &KubernetesDiscovery, json: bool) -> Result<()> {
    let contexts = discovery.list_contexts().await?;
    let current = discovery.current_context().await.ok();

    if json {
        println!("{}", serde_json::to_string_pretty(&contexts)?);
        return Ok(());
    }

    if contexts.is_empty() {
        println!("No contexts found.");
        return Ok(());
    }

    println!("{:<2} {:<30} CLUSTER", "", "NAME");
    for ctx in &contexts {
        let marker = if current.as_deref() == Some(ctx.name.as_str()) {
            "*"
        } else {
            ""
        };
        println!("{:<2} {:<30} {}", marker, truncate(&ctx.name, 30), ctx.cluster);
    }
    Ok(())
}

pub async fn namespaces(
    discovery: &KubernetesDiscovery,
    context: Option<String>,
    json: bool,
) -> Result<()> {
    let namespaces = match context {
        Some(ctx) => with_context(discovery, &ctx, || discovery.list_namespaces()).await?,
        None => discovery.list_namespaces().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&namespaces)?);
        return Ok(());
    }

    for ns in &namespaces {
        println!("{}", ns.name);
    }
    Ok(())
}

pub async fn services(
    discovery: &KubernetesDiscovery,
    context: Option<String>,
    namespace: &str,
    json: bool,
) -> Result<()> {
    let services = match context {
        Some(ctx) => {
            with_context(discovery, &ctx, || discovery.list_services(namespace)).await?
        }
        None => discovery.list_services(namespace).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        println!("No services found in namespace {}.", namespace);
        return Ok(());
    }

    println!("{:<30} {:<12} {:<16} PORTS", "NAME", "TYPE", "CLUSTER-IP");
    println!("{}", "-".repeat(80));
    for svc in &services {
        let ports: Vec<String> = svc.ports.iter().map(|p| p.display_name()).collect();
        println!(
            "{:<30} {:<12} {:<16} {}",
            truncate(&svc.name, 30),
            svc.service_type,
            svc.cluster_ip.as_deref().unwrap_or("-"),
            ports.join(", ")
        );
    }

    println!("\nTotal: {} services", services.len());
    Ok(())
}
