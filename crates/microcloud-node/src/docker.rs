use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::runtime::{ContainerRuntime, NetworkAttachment, RunSpec, RuntimeError, StatsSnapshot};

/// `docker inspect` template: one `name=address` line per attached network.
const NETWORKS_FORMAT: &str =
    "{{range $name, $net := .NetworkSettings.Networks}}{{$name}}={{$net.IPAddress}}\n{{end}}";

/// Talks to the local Docker daemon through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn exec(&self, args: &[String]) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.bin, args.first().map(String::as_str).unwrap_or(""));
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Arguments for `docker run` in the order the daemon expects them.
pub(crate) fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--cpus".to_string(),
        spec.vcpu.to_string(),
        "--memory".to_string(),
        format!("{}m", spec.memory_mib),
    ];
    for (external, internal) in spec.port_plan.pairs() {
        args.push("-p".to_string());
        args.push(format!("{external}:{internal}/tcp"));
    }
    args.push(spec.image.clone());
    args
}

pub(crate) fn parse_attachments(stdout: &str) -> Vec<NetworkAttachment> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, addr) = line.trim().split_once('=')?;
            if name.is_empty() {
                return None;
            }
            let addr = addr.trim();
            Some(NetworkAttachment {
                network: name.to_string(),
                address: (!addr.is_empty()).then(|| addr.to_string()),
            })
        })
        .collect()
}

pub(crate) fn parse_stats(stdout: &str) -> Result<Vec<StatsSnapshot>, RuntimeError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            serde_json::from_str::<StatsSnapshot>(line)
                .map_err(|e| RuntimeError::Decode(format!("stats line {line:?}: {e}")))
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        tracing::info!(%tag, context = %context_dir.display(), "building workload image");
        self.exec(&[
            "build".to_string(),
            "--rm".to_string(),
            "-q".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context_dir.display().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        tracing::info!(image=%spec.image, vcpu=%spec.vcpu, memory_mib=spec.memory_mib, "starting workload container");
        let stdout = self.exec(&run_args(spec)).await?;
        let handle = stdout.lines().last().unwrap_or("").trim().to_string();
        if handle.is_empty() {
            return Err(RuntimeError::Decode("docker run printed no container id".into()));
        }
        Ok(handle)
    }

    async fn network_attachments(
        &self,
        handle: &str,
    ) -> Result<Vec<NetworkAttachment>, RuntimeError> {
        let stdout = self
            .exec(&[
                "inspect".to_string(),
                "-f".to_string(),
                NETWORKS_FORMAT.to_string(),
                handle.to_string(),
            ])
            .await?;
        Ok(parse_attachments(&stdout))
    }

    async fn remove(&self, handle: &str) -> Result<(), RuntimeError> {
        tracing::info!(%handle, "removing workload container");
        self.exec(&["rm".to_string(), "-f".to_string(), handle.to_string()])
            .await?;
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        tracing::info!(%tag, "removing workload image");
        self.exec(&["rmi".to_string(), tag.to_string()]).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsSnapshot>, RuntimeError> {
        let stdout = self
            .exec(&[
                "stats".to_string(),
                "--no-stream".to_string(),
                "--format".to_string(),
                "{{json .}}".to_string(),
            ])
            .await?;
        parse_stats(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_common::{PortPlan, Vcpu};

    #[test]
    fn test_run_args_bind_ports_in_fixed_order() {
        let spec = RunSpec {
            name: "microcloud-workload-abc".into(),
            image: "microcloud-workload:abc".into(),
            vcpu: Vcpu::from_millis(1500),
            memory_mib: 2048,
            port_plan: PortPlan::new([10001, 10002, 10003, 10004, 10005]).unwrap(),
        };
        assert_eq!(
            run_args(&spec),
            vec![
                "run", "-d", "--name", "microcloud-workload-abc", "--cpus", "1.5", "--memory", "2048m",
                "-p", "10001:80/tcp",
                "-p", "10002:443/tcp",
                "-p", "10003:22/tcp",
                "-p", "10004:23/tcp",
                "-p", "10005:8083/tcp",
                "microcloud-workload:abc",
            ]
        );
    }

    #[test]
    fn test_parse_attachments() {
        let out = "bridge=172.17.0.4\nhost=\n\n";
        assert_eq!(
            parse_attachments(out),
            vec![
                NetworkAttachment {
                    network: "bridge".into(),
                    address: Some("172.17.0.4".into()),
                },
                NetworkAttachment {
                    network: "host".into(),
                    address: None,
                },
            ]
        );
        assert!(parse_attachments("").is_empty());
    }

    #[test]
    fn test_parse_stats_lines() {
        let out = concat!(
            r#"{"BlockIO":"0B / 0B","CPUPerc":"0.02%","Container":"3f2a9c1b7d4e","ID":"3f2a9c1b7d4e","MemPerc":"0.40%","MemUsage":"3.1MiB / 768MiB","Name":"x","NetIO":"1.2kB / 0B","PIDs":"1"}"#,
            "\n",
            r#"{"BlockIO":"4MB / 0B","CPUPerc":"12.50%","Container":"aa11bb22cc33","MemPerc":"25.00%","MemUsage":"256MiB / 1GiB","NetIO":"5MB / 1MB","PIDs":"7"}"#,
            "\n"
        );
        let stats = parse_stats(out).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].container, "3f2a9c1b7d4e");
        assert_eq!(stats[1].mem_usage, "256MiB / 1GiB");
        assert_eq!(stats[1].pids, "7");

        assert!(matches!(parse_stats("not json"), Err(RuntimeError::Decode(_))));
        assert!(parse_stats("\n").unwrap().is_empty());
    }
}
