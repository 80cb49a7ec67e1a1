/// Common output helpers for CLI.
use crossterm::style::Stylize;

use crate::{orchestrator::NodeStatus, registry::NodeRecord};

fn inbounds_label(record: &NodeRecord) -> String {
    if record.inbounds.is_empty() {
        String::from("all")
    } else {
        record.inbounds.join(", ")
    }
}

fn state_label(status: &NodeStatus, width: usize) -> String {
    // pad before colouring so escape codes don't break alignment
    let pad = |label: &str| format!("{:<width$}", label);
    match (&status.fault, status.running) {
        (Some(_), _) => pad("unknown").yellow().to_string(),
        (None, true) => pad("running").green().to_string(),
        (None, false) => pad("stopped").red().to_string(),
    }
}

/// Show a node's registry entry.
pub fn print_record(record: &NodeRecord) {
    println!("{}", "─".repeat(50));
    println!("  Name:          {}", record.name);
    println!("  Method:        {}", record.method);
    println!("  Service port:  {}", record.ports.service);
    println!("  Xray API port: {}", record.ports.xray_api);
    println!("  Inbounds:      {}", inbounds_label(record));
    println!("  Install dir:   {}", record.install_dir.display());
    println!("  Data dir:      {}", record.data_dir.display());
    println!("  Certificate:   {}", record.cert_file.display());
    println!("{}", "─".repeat(50));
}

/// Show one node's live status.
pub fn print_status(status: &NodeStatus) {
    let record = &status.record;
    println!("\n🛰️  Node {}", record.name);
    println!("{}", "─".repeat(50));
    println!("  State:         {}", state_label(status, 0));
    if let Some(id) = &status.identifier {
        let kind = match record.method {
            crate::registry::Method::Container => "Container ID",
            crate::registry::Method::Process => "PID",
        };
        println!("  {:<14} {}", format!("{}:", kind), id);
    }
    println!("  Method:        {}", record.method);
    println!("  Ports:         {}", record.ports);
    println!("  Inbounds:      {}", inbounds_label(record));
    println!("  Created:       {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:       {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", "─".repeat(50));
}

/// Show all nodes as a table, in registry order.
pub fn print_status_table(statuses: &[NodeStatus]) {
    if statuses.is_empty() {
        println!("📝 No nodes installed");
        return;
    }

    println!("\n🛰️  Nodes ({})", statuses.len());
    println!("{}", "─".repeat(78));
    println!(
        "  {:<20} {:<10} {:<8} {:<8} {:<10} {}",
        "NAME", "METHOD", "SERVICE", "XRAY", "STATE", "ID"
    );
    for status in statuses {
        let record = &status.record;
        let state = state_label(status, 10);
        println!(
            "  {:<20} {:<10} {:<8} {:<8} {} {}",
            record.name,
            record.method.as_str(),
            record.ports.service,
            record.ports.xray_api,
            state,
            status.identifier.as_deref().unwrap_or("-")
        );
    }
    println!("{}", "─".repeat(78));

    for status in statuses {
        if let Some(fault) = &status.fault {
            println!("⚠️  {}: {}", status.record.name, fault);
        }
    }
}
