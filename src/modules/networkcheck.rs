//! Network check module: pings the default gateway to confirm the network
//! is up.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::run_command;

const DEFAULT_PING_COUNT: u32 = 3;
const PING_PAYLOAD_SIZE: u32 = 56;

/// Configuration of a network check module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkCheckModule {
    /// Number of pings; 0 means the default of 3.
    #[serde(rename = "PingCount", default)]
    pub ping_count: u32,
}

#[async_trait]
impl ModuleAction for NetworkCheckModule {
    async fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        let route: Vec<String> = ["/bin/zsh", "-c", "route -n get default | grep gateway"]
            .into_iter()
            .map(String::from)
            .collect();
        let out = run_command(&route, None, &[]).await?;
        let gateway = parse_gateway(&out.stdout)?;

        let count = if self.ping_count == 0 {
            DEFAULT_PING_COUNT
        } else {
            self.ping_count
        };
        let ping: Vec<String> = [
            "ping".to_string(),
            "-c".to_string(),
            count.to_string(),
            "-s".to_string(),
            PING_PAYLOAD_SIZE.to_string(),
            gateway.clone(),
        ]
        .into();
        // A down network surfaces as ping exiting nonzero on i/o timeout.
        run_command(&ping, None, &[]).await?;

        Ok(format!(
            "successfully pinged default gateway {gateway} {count} times"
        ))
    }
}

/// Extracts the gateway host from `route -n get default` output, which
/// renders as a single `gateway: <host>` line once grepped.
fn parse_gateway(stdout: &str) -> Result<String, ModuleError> {
    let fields: Vec<&str> = stdout.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(ModuleError::Invalid {
            reason: format!("unexpected output from route command: {stdout}"),
        });
    }
    Ok(fields[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_line() {
        assert_eq!(parse_gateway("    gateway: 10.0.0.1\n").unwrap(), "10.0.0.1");
    }

    #[test]
    fn rejects_unexpected_route_output() {
        assert!(parse_gateway("").is_err());
        assert!(parse_gateway("gateway: 10.0.0.1 extra").is_err());
    }
}
