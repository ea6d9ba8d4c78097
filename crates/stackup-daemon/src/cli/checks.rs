use super::utils::{FAIL, OK, WARN};
use stackup_daemon::{port_is_free, PortReconciler, StackConfig};
use stackup_release::{find_tool, install_hint, KNOWN_TOOLS};
use stackup_types::{PortBinding, StackError, StackResult};
use std::collections::BTreeSet;

pub fn run_checks(config: &StackConfig) -> StackResult<()> {
    println!("\x1b[38;5;46mstackup diagnostics\x1b[0m");
    println!("\x1b[38;5;245m{}\x1b[0m", "═".repeat(50));
    println!();

    let mut missing_required = Vec::new();
    let mut warnings = 0;

    println!("Tools");
    for tool in KNOWN_TOOLS {
        match find_tool(tool.name) {
            Some(path) => println!("  {} {:<10} {}", OK, tool.name, path.display()),
            None if tool.required => {
                println!("  {} {:<10} missing ({})", FAIL, tool.name, tool.purpose);
                println!("      {}", tool.hint);
                missing_required.push(tool.name);
            }
            None => {
                println!("  {} {:<10} missing, optional ({})", WARN, tool.name, tool.purpose);
                println!("      {}", tool.hint);
                warnings += 1;
            }
        }
    }

    println!();
    println!("Ports");
    for (binding, owner) in declared_ports(config) {
        if port_is_free(&binding) {
            println!("  {} {:<10} free ({})", OK, binding.to_string(), owner);
        } else {
            println!(
                "  {} {:<10} in use ({}, reclaimed on `stackup up`)",
                WARN,
                binding.to_string(),
                owner
            );
            warnings += 1;
        }
    }

    println!();
    println!("\x1b[38;5;245m{}\x1b[0m", "═".repeat(50));

    match missing_required.first() {
        Some(&tool) => {
            println!(
                "{} required tool(s) missing: {}",
                missing_required.len(),
                missing_required.join(", ")
            );
            Err(StackError::tool_missing(tool, install_hint(tool)))
        }
        None => {
            if warnings > 0 {
                println!("All required tools found, {} warning(s)", warnings);
            } else {
                println!("All checks passed");
            }
            Ok(())
        }
    }
}

/// Process ports plus the forwarder's own listeners, each with its owner.
fn declared_ports(config: &StackConfig) -> Vec<(PortBinding, String)> {
    let mut seen = BTreeSet::new();
    let mut ports = Vec::new();

    for spec in &config.processes {
        for binding in &spec.ports {
            if seen.insert(*binding) {
                ports.push((*binding, spec.name.clone()));
            }
        }
    }

    if config.telemetry.enabled {
        for binding in config.telemetry.listen_ports() {
            if seen.insert(binding) {
                ports.push((binding, "telemetry forwarder".to_string()));
            }
        }
    }

    ports
}

pub async fn reclaim_ports(config: &StackConfig, ports: Vec<u16>, udp: bool) -> StackResult<()> {
    if find_tool("lsof").is_none() {
        return Err(StackError::tool_missing("lsof", install_hint("lsof")));
    }

    let bindings: Vec<PortBinding> = ports
        .into_iter()
        .map(|port| if udp { PortBinding::udp(port) } else { PortBinding::tcp(port) })
        .collect();

    let report = PortReconciler::lsof()
        .with_settle(config.supervisor.port_settle())
        .reclaim(&bindings)
        .await?;

    println!("{}", report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackup_daemon::TelemetryConfig;

    #[test]
    fn test_declared_ports() {
        let config = StackConfig::default();
        let ports: Vec<String> = declared_ports(&config)
            .into_iter()
            .map(|(binding, owner)| format!("{} {}", binding, owner))
            .collect();

        assert_eq!(
            ports,
            vec![
                "7007/tcp backend",
                "3000/tcp frontend",
                "4317/tcp telemetry forwarder",
                "4318/tcp telemetry forwarder",
            ]
        );

        let quiet = StackConfig {
            telemetry: TelemetryConfig {
                enabled: false,
                ..TelemetryConfig::default()
            },
            ..StackConfig::default()
        };
        assert_eq!(declared_ports(&quiet).len(), 2);
    }
}
