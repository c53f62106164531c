//! Linux kernel tunnel applier.
//!
//! Link lookups go through `getifaddrs(3)`; every mutation shells out to
//! `ip(8)` and `wg(8)`. The device configuration, private key included, is
//! streamed to `wg setconf` on stdin and never appears in argv or on disk.
//! Requires CAP_NET_ADMIN and the wireguard kernel module.

use std::process::Stdio;

use async_trait::async_trait;
use ipnet::IpNet;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tunnel::{LinkState, TunnelApplier, TunnelConfig, TunnelError};

/// Link type passed to `ip link add`.
pub const LINK_TYPE: &str = "wireguard";

#[derive(Debug, Clone)]
pub struct KernelApplier {
    ip: String,
    wg: String,
}

impl Default for KernelApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelApplier {
    pub fn new() -> Self {
        Self {
            ip: "ip".to_string(),
            wg: "wg".to_string(),
        }
    }

    /// Use explicit tool paths instead of `$PATH` lookup.
    pub fn with_tools(ip: impl Into<String>, wg: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            wg: wg.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<(), TunnelError> {
        let command = format!("{program} {}", args.join(" "));
        tracing::trace!(command = %command, "running");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|source| TunnelError::Spawn {
                    command: command.clone(),
                    source,
                })?;
            // Close stdin so the tool sees EOF.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| TunnelError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TunnelError::Command {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl TunnelApplier for KernelApplier {
    async fn link_state(&self, name: &str) -> Result<Option<LinkState>, TunnelError> {
        if if_nametoindex(name).is_err() {
            return Ok(None);
        }
        let addrs = getifaddrs().map_err(|e| TunnelError::Lookup(e.to_string()))?;
        let up = addrs
            .filter(|a| a.interface_name == name)
            .any(|a| a.flags.contains(InterfaceFlags::IFF_UP));
        Ok(Some(LinkState { up }))
    }

    async fn delete_link(&self, name: &str) -> Result<(), TunnelError> {
        if self.link_state(name).await?.is_none() {
            return Ok(());
        }
        self.run(&self.ip, &["link", "del", "dev", name], None).await
    }

    async fn create_link(&self, name: &str) -> Result<(), TunnelError> {
        self.run(&self.ip, &["link", "add", "dev", name, "type", LINK_TYPE], None)
            .await
    }

    async fn configure(&self, name: &str, config: &TunnelConfig) -> Result<(), TunnelError> {
        let text = config.render();
        self.run(&self.wg, &["setconf", name, "/dev/stdin"], Some(text.as_bytes()))
            .await
    }

    async fn assign_address(&self, name: &str, address: IpNet) -> Result<(), TunnelError> {
        let cidr = address.to_string();
        self.run(&self.ip, &["address", "add", &cidr, "dev", name], None)
            .await
    }

    async fn set_up(&self, name: &str) -> Result<(), TunnelError> {
        self.run(&self.ip, &["link", "set", "up", "dev", name], None).await
    }

    async fn set_down(&self, name: &str) -> Result<(), TunnelError> {
        self.run(&self.ip, &["link", "set", "down", "dev", name], None).await
    }
}
