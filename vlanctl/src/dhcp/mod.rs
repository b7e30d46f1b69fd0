//! DHCP client discovery and lease dispatch.
//!
//! Clients are probed in an explicit priority order. An explicitly requested
//! client is the only one probed; there is no fallback.
//!
//! `dhclient -1` stays in the background once it holds a lease, so it is
//! started with a per-device pid file and released through that file when
//! the device is torn down. `dhcpcd -1` and `udhcpc -q` exit after leasing.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{Result, VlanError};
use crate::types::AddressFamily;

/// Where backgrounded clients keep their pid files
pub const DEFAULT_RUN_DIR: &str = "/run";

/// DHCP client binaries this tool knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpClient {
    Dhclient,
    Dhcpcd,
    Udhcpc,
}

impl DhcpClient {
    pub const ALL: [DhcpClient; 3] = [DhcpClient::Dhclient, DhcpClient::Dhcpcd, DhcpClient::Udhcpc];

    pub const DEFAULT_PRIORITY: [DhcpClient; 3] = DhcpClient::ALL;

    /// Executable name looked up on `PATH`
    pub fn binary(self) -> &'static str {
        match self {
            DhcpClient::Dhclient => "dhclient",
            DhcpClient::Dhcpcd => "dhcpcd",
            DhcpClient::Udhcpc => "udhcpc",
        }
    }

    pub fn supports(self, family: AddressFamily) -> bool {
        match self {
            DhcpClient::Dhclient | DhcpClient::Dhcpcd => true,
            // busybox udhcpc only speaks DHCPv4
            DhcpClient::Udhcpc => family == AddressFamily::V4,
        }
    }

    /// Pid file of the client left running on `device`. Only dhclient stays
    /// resident after a one-shot lease.
    pub fn pid_file(self, run_dir: &Path, device: &str, family: AddressFamily) -> Option<PathBuf> {
        match self {
            DhcpClient::Dhclient => {
                let stem = match family {
                    AddressFamily::V4 => "dhclient",
                    AddressFamily::V6 => "dhclient6",
                };
                Some(run_dir.join(format!("{}.{}.pid", stem, device)))
            }
            DhcpClient::Dhcpcd | DhcpClient::Udhcpc => None,
        }
    }

    /// One-shot lease arguments for `device`
    pub fn lease_args(self, run_dir: &Path, device: &str, family: AddressFamily) -> Vec<String> {
        let flag = family_flag(family).to_string();
        match (self, self.pid_file(run_dir, device, family)) {
            (DhcpClient::Dhclient, Some(pid_file)) => vec![
                flag,
                "-1".to_string(),
                "-pf".to_string(),
                pid_file.display().to_string(),
                device.to_string(),
            ],
            (DhcpClient::Dhclient | DhcpClient::Dhcpcd, _) => {
                vec![flag, "-1".to_string(), device.to_string()]
            }
            (DhcpClient::Udhcpc, _) => ["-i", device, "-n", "-q"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// Arguments that release the lease held through `pid_file` and stop the client
    pub fn release_args(
        self,
        pid_file: &Path,
        device: &str,
        family: AddressFamily,
    ) -> Option<Vec<String>> {
        match self {
            DhcpClient::Dhclient => Some(vec![
                family_flag(family).to_string(),
                "-r".to_string(),
                "-pf".to_string(),
                pid_file.display().to_string(),
                device.to_string(),
            ]),
            DhcpClient::Dhcpcd | DhcpClient::Udhcpc => None,
        }
    }
}

fn family_flag(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "-4",
        AddressFamily::V6 => "-6",
    }
}

impl fmt::Display for DhcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for DhcpClient {
    type Err = VlanError;

    fn from_str(s: &str) -> Result<Self> {
        DhcpClient::ALL
            .into_iter()
            .find(|c| c.binary().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                VlanError::Usage(format!(
                    "unknown DHCP client '{}' (expected auto, {})",
                    s,
                    DhcpClient::ALL.iter().join(", ")
                ))
            })
    }
}

/// Which DHCP client to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClientPreference {
    #[default]
    Auto,
    Specific(DhcpClient),
}

impl FromStr for ClientPreference {
    type Err = VlanError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(ClientPreference::Auto)
        } else {
            s.parse().map(ClientPreference::Specific)
        }
    }
}

impl TryFrom<String> for ClientPreference {
    type Error = VlanError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ClientPreference> for String {
    fn from(pref: ClientPreference) -> Self {
        pref.to_string()
    }
}

impl fmt::Display for ClientPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientPreference::Auto => f.write_str("auto"),
            ClientPreference::Specific(client) => write!(f, "{}", client),
        }
    }
}

/// Result of probing for an installed client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// First installed client in priority order, with its resolved path
    Found { client: DhcpClient, path: PathBuf },
    /// None of the probed clients is installed
    NotFound,
}

/// Locates client executables
pub trait ClientProbe {
    fn locate(&self, client: DhcpClient) -> Option<PathBuf>;
}

impl<F> ClientProbe for F
where
    F: Fn(DhcpClient) -> Option<PathBuf>,
{
    fn locate(&self, client: DhcpClient) -> Option<PathBuf> {
        self(client)
    }
}

/// Looks clients up on `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProbe;

impl ClientProbe for PathProbe {
    fn locate(&self, client: DhcpClient) -> Option<PathBuf> {
        which::which(client.binary()).ok()
    }
}

/// Return the first installed client in `priority` order
pub fn discover<P: ClientProbe + ?Sized>(priority: &[DhcpClient], probe: &P) -> Discovery {
    priority
        .iter()
        .find_map(|&client| {
            probe.locate(client).map(|path| {
                debug!("Found DHCP client {} at {}", client, path.display());
                Discovery::Found { client, path }
            })
        })
        .unwrap_or(Discovery::NotFound)
}

/// Pick the client to lease `family` addresses with
pub fn select_client<P: ClientProbe + ?Sized>(
    preference: ClientPreference,
    priority: &[DhcpClient],
    family: AddressFamily,
    probe: &P,
) -> Result<(DhcpClient, PathBuf)> {
    let (client, path) = match preference {
        ClientPreference::Auto => match discover(priority, probe) {
            Discovery::Found { client, path } => (client, path),
            Discovery::NotFound => {
                return Err(VlanError::NoDhcpClient {
                    searched: priority.iter().join(", "),
                })
            }
        },
        ClientPreference::Specific(client) => match probe.locate(client) {
            Some(path) => (client, path),
            None => {
                return Err(VlanError::ClientNotFound {
                    client: client.to_string(),
                })
            }
        },
    };

    if !client.supports(family) {
        let alternative = DhcpClient::ALL
            .iter()
            .filter(|c| c.supports(family))
            .join(" or ");
        return Err(VlanError::UnsupportedFamily {
            client: client.to_string(),
            family: family.to_string(),
            alternative,
        });
    }

    Ok((client, path))
}

/// Obtains addresses for a device from a DHCP server
pub trait AddressAcquirer {
    /// Resolve the client that would serve `family`, without running it
    fn select(&self, family: AddressFamily) -> Result<DhcpClient>;

    /// Run `client` to lease a `family` address on `device`
    fn lease(&self, device: &str, family: AddressFamily, client: DhcpClient) -> Result<()>;

    fn acquire(&self, device: &str, family: AddressFamily) -> Result<DhcpClient> {
        let client = self.select(family)?;
        self.lease(device, family, client)?;
        Ok(client)
    }

    /// Stop any client still holding a lease on `device` before it is deleted
    fn release(&self, _device: &str) -> Result<()> {
        Ok(())
    }
}

impl<T: AddressAcquirer + ?Sized> AddressAcquirer for &T {
    fn select(&self, family: AddressFamily) -> Result<DhcpClient> {
        (**self).select(family)
    }

    fn lease(&self, device: &str, family: AddressFamily, client: DhcpClient) -> Result<()> {
        (**self).lease(device, family, client)
    }

    fn release(&self, device: &str) -> Result<()> {
        (**self).release(device)
    }
}

/// [`AddressAcquirer`] that runs the client binary in the foreground
#[derive(Debug, Clone)]
pub struct DhcpAcquirer<P = PathProbe> {
    preference: ClientPreference,
    priority: Vec<DhcpClient>,
    probe: P,
    run_dir: PathBuf,
}

impl DhcpAcquirer<PathProbe> {
    pub fn new(preference: ClientPreference, priority: Vec<DhcpClient>) -> Self {
        Self::with_probe(preference, priority, PathProbe)
    }
}

impl<P: ClientProbe> DhcpAcquirer<P> {
    pub fn with_probe(preference: ClientPreference, priority: Vec<DhcpClient>, probe: P) -> Self {
        Self {
            preference,
            priority,
            probe,
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
        }
    }

    /// Keep client pid files under `run_dir`
    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = run_dir.into();
        self
    }

    fn run_release(&self, client: DhcpClient, pid_file: &Path, device: &str, family: AddressFamily) {
        let Some(args) = client.release_args(pid_file, device, family) else {
            return;
        };
        let Some(path) = self.probe.locate(client) else {
            warn!("{} left a pid file for {} but is no longer installed", client, device);
            return;
        };
        debug!("{} {}", path.display(), args.join(" "));

        match Command::new(&path).args(&args).output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                "Failed to release {} lease on {}: {}",
                family,
                device,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(err) => warn!("Failed to run {}: {}", path.display(), err),
        }
    }
}

impl<P: ClientProbe> AddressAcquirer for DhcpAcquirer<P> {
    fn select(&self, family: AddressFamily) -> Result<DhcpClient> {
        select_client(self.preference, &self.priority, family, &self.probe).map(|(c, _)| c)
    }

    fn lease(&self, device: &str, family: AddressFamily, client: DhcpClient) -> Result<()> {
        let path = self
            .probe
            .locate(client)
            .ok_or_else(|| VlanError::ClientNotFound {
                client: client.to_string(),
            })?;
        let args = client.lease_args(&self.run_dir, device, family);
        debug!("{} {}", path.display(), args.join(" "));

        let output = Command::new(&path)
            .args(&args)
            .output()
            .map_err(|source| VlanError::Spawn {
                program: path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(VlanError::External {
                operation: format!("{} lease on {} via {}", family, device, client),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    fn release(&self, device: &str) -> Result<()> {
        for family in [AddressFamily::V4, AddressFamily::V6] {
            for client in DhcpClient::ALL {
                let Some(pid_file) = client.pid_file(&self.run_dir, device, family) else {
                    continue;
                };
                if pid_file.exists() {
                    self.run_release(client, &pid_file, device, family);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(clients: &'static [DhcpClient]) -> impl Fn(DhcpClient) -> Option<PathBuf> {
        move |c| {
            clients
                .contains(&c)
                .then(|| PathBuf::from(format!("/usr/sbin/{}", c.binary())))
        }
    }

    #[test]
    fn discover_honours_priority() {
        let probe = installed(&[DhcpClient::Udhcpc, DhcpClient::Dhcpcd]);
        let found = discover(&DhcpClient::DEFAULT_PRIORITY, &probe);
        assert_eq!(
            found,
            Discovery::Found {
                client: DhcpClient::Dhcpcd,
                path: PathBuf::from("/usr/sbin/dhcpcd"),
            }
        );

        let reversed = [DhcpClient::Udhcpc, DhcpClient::Dhcpcd];
        assert!(matches!(
            discover(&reversed, &probe),
            Discovery::Found {
                client: DhcpClient::Udhcpc,
                ..
            }
        ));
    }

    #[test]
    fn discover_reports_not_found() {
        let probe = installed(&[]);
        assert_eq!(discover(&DhcpClient::DEFAULT_PRIORITY, &probe), Discovery::NotFound);
    }

    #[test]
    fn auto_without_clients_is_unavailable() {
        let probe = installed(&[]);
        let err = select_client(
            ClientPreference::Auto,
            &DhcpClient::DEFAULT_PRIORITY,
            AddressFamily::V4,
            &probe,
        )
        .unwrap_err();
        assert!(matches!(err, VlanError::NoDhcpClient { .. }));
    }

    #[test]
    fn specific_client_does_not_fall_back() {
        let probe = installed(&[DhcpClient::Dhclient]);
        let err = select_client(
            ClientPreference::Specific(DhcpClient::Dhcpcd),
            &DhcpClient::DEFAULT_PRIORITY,
            AddressFamily::V4,
            &probe,
        )
        .unwrap_err();
        assert!(matches!(err, VlanError::ClientNotFound { ref client } if client == "dhcpcd"));
    }

    #[test]
    fn udhcpc_cannot_lease_v6() {
        let probe = installed(&[DhcpClient::Udhcpc]);
        let (client, _) = select_client(
            ClientPreference::Auto,
            &DhcpClient::DEFAULT_PRIORITY,
            AddressFamily::V4,
            &probe,
        )
        .unwrap();
        assert_eq!(client, DhcpClient::Udhcpc);

        let err = select_client(
            ClientPreference::Auto,
            &DhcpClient::DEFAULT_PRIORITY,
            AddressFamily::V6,
            &probe,
        )
        .unwrap_err();
        match err {
            VlanError::UnsupportedFamily {
                client,
                alternative,
                ..
            } => {
                assert_eq!(client, "udhcpc");
                assert_eq!(alternative, "dhclient or dhcpcd");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn preference_parsing() {
        assert_eq!("auto".parse::<ClientPreference>().unwrap(), ClientPreference::Auto);
        assert_eq!(
            "DHClient".parse::<ClientPreference>().unwrap(),
            ClientPreference::Specific(DhcpClient::Dhclient)
        );
        assert!(matches!(
            "pump".parse::<ClientPreference>(),
            Err(VlanError::Usage(_))
        ));
    }

    #[test]
    fn lease_arguments() {
        let run = Path::new("/run");
        assert_eq!(
            DhcpClient::Dhclient.lease_args(run, "eth0.200", AddressFamily::V6),
            vec!["-6", "-1", "-pf", "/run/dhclient6.eth0.200.pid", "eth0.200"]
        );
        assert_eq!(
            DhcpClient::Dhcpcd.lease_args(run, "eth0.200", AddressFamily::V4),
            vec!["-4", "-1", "eth0.200"]
        );
        assert_eq!(
            DhcpClient::Udhcpc.lease_args(run, "eth0.200", AddressFamily::V4),
            vec!["-i", "eth0.200", "-n", "-q"]
        );
    }

    #[test]
    fn only_dhclient_needs_releasing() {
        let run = Path::new("/run");
        let pid = DhcpClient::Dhclient.pid_file(run, "eth0.7", AddressFamily::V4).unwrap();
        assert_eq!(pid, PathBuf::from("/run/dhclient.eth0.7.pid"));
        assert_eq!(
            DhcpClient::Dhclient.release_args(&pid, "eth0.7", AddressFamily::V4).unwrap(),
            vec!["-4", "-r", "-pf", "/run/dhclient.eth0.7.pid", "eth0.7"]
        );

        assert!(DhcpClient::Dhcpcd.pid_file(run, "eth0.7", AddressFamily::V4).is_none());
        assert!(DhcpClient::Udhcpc.release_args(&pid, "eth0.7", AddressFamily::V4).is_none());
    }

    fn recording_client(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("dhclient");
        let log = dir.join("invocations");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn release_stops_resident_dhclient() {
        let dir = tempfile::tempdir().unwrap();
        let script = recording_client(dir.path());
        let probe = move |c: DhcpClient| (c == DhcpClient::Dhclient).then(|| script.clone());
        let acquirer =
            DhcpAcquirer::with_probe(ClientPreference::Auto, DhcpClient::ALL.to_vec(), probe)
                .with_run_dir(dir.path());

        let pid_file = dir.path().join("dhclient.eth0.200.pid");
        std::fs::write(&pid_file, "4242\n").unwrap();

        acquirer.release("eth0.200").unwrap();

        let logged = std::fs::read_to_string(dir.path().join("invocations")).unwrap();
        assert_eq!(
            logged.trim(),
            format!("-4 -r -pf {} eth0.200", pid_file.display())
        );
    }

    #[test]
    fn release_without_pid_file_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = recording_client(dir.path());
        let probe = move |c: DhcpClient| (c == DhcpClient::Dhclient).then(|| script.clone());
        let acquirer =
            DhcpAcquirer::with_probe(ClientPreference::Auto, DhcpClient::ALL.to_vec(), probe)
                .with_run_dir(dir.path());

        acquirer.release("eth0.200").unwrap();
        assert!(!dir.path().join("invocations").exists());
    }

    #[test]
    fn failed_release_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dhclient6.eth0.9.pid"), "1\n").unwrap();
        let probe = |_: DhcpClient| Some(PathBuf::from("/nonexistent/sbin/dhclient"));
        let acquirer =
            DhcpAcquirer::with_probe(ClientPreference::Auto, DhcpClient::ALL.to_vec(), probe)
                .with_run_dir(dir.path());

        assert!(acquirer.release("eth0.9").is_ok());
    }
}
