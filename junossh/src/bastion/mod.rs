//! Bastion proxy strategy selection.
//!
//! Picks how the target is reached when one or more jump hosts sit in
//! front of it, and turns that choice into a [`Route`]:
//!
//! - no bastion password: in-process tunnels through each hop;
//! - a bastion password on Windows: PuTTY `plink` ([`native`]);
//! - a bastion password elsewhere: OpenSSH with an `SSH_ASKPASS` helper
//!   ([`askpass`]).
//!
//! Selection is pure; nothing here opens a socket.

pub mod askpass;
mod command;
pub mod native;

use std::path::{Path, PathBuf};

use log::{debug, info};

pub use askpass::AskpassHelper;
pub use command::{ProxyArg, ProxyCommand};

use crate::error::{ConfigError, Hop, ProxyError, Result};
use crate::transport::config::ConnectionConfig;
use crate::transport::plan::{ConnectPlan, Endpoint, Route};

/// Host operating system, as far as proxy selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// OpenSSH there cannot be fed a password through `SSH_ASKPASS`.
    Windows,
    Unix,
}

impl HostPlatform {
    /// The platform this binary runs on.
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }

    /// Whether bastion passwords need the native proxy binary.
    pub fn needs_native_proxy(&self) -> bool {
        matches!(self, HostPlatform::Windows)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostPlatform::Windows => "windows",
            HostPlatform::Unix => "unix",
        }
    }
}

/// Finds executables. Abstracted so selection can be tested without
/// touching the real search path.
pub trait ToolLocator: Send + Sync {
    /// Full path of `program`, if installed.
    fn find(&self, program: &str) -> Option<PathBuf>;
}

impl<F> ToolLocator for F
where
    F: Fn(&str) -> Option<PathBuf> + Send + Sync,
{
    fn find(&self, program: &str) -> Option<PathBuf> {
        self(program)
    }
}

/// Looks programs up on `PATH` (honouring `PATHEXT` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPath;

impl ToolLocator for SearchPath {
    fn find(&self, program: &str) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        let names = executable_names(program);
        std::env::split_paths(&path)
            .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
            .find(|candidate| is_executable(candidate))
    }
}

fn executable_names(program: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(program).extension().is_none() {
        let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT".to_string());
        exts.split(';')
            .filter(|e| !e.is_empty())
            .map(|e| format!("{}{}", program, e.to_ascii_lowercase()))
            .collect()
    } else {
        vec![program.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// How the bastion leg is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BastionStrategy {
    /// No password-capable proxy needed: direct, in-process tunnels, or a
    /// user-supplied proxy command.
    None,
    /// PuTTY `plink` at the given path.
    NativeProxyBinary { program: PathBuf },
    /// OpenSSH fed by a temporary `SSH_ASKPASS` script.
    PasswordInjectionScript,
}

impl BastionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BastionStrategy::None => "none",
            BastionStrategy::NativeProxyBinary { .. } => "native proxy binary",
            BastionStrategy::PasswordInjectionScript => "password injection script",
        }
    }
}

/// Choose a strategy for `config` on `platform`.
///
/// Fails with a proxy configuration error, before any network activity,
/// when a bastion password must be sent on a platform whose native proxy
/// binary is missing. The script strategy is never chosen on such a
/// platform.
pub fn resolve(
    config: &ConnectionConfig,
    platform: HostPlatform,
    locator: &dyn ToolLocator,
) -> Result<BastionStrategy> {
    if !config.has_bastion() {
        return Ok(BastionStrategy::None);
    }

    let strategy = if !config.bastion_password_present() {
        BastionStrategy::None
    } else if platform.needs_native_proxy() {
        match locator.find(native::PLINK) {
            Some(program) => BastionStrategy::NativeProxyBinary { program },
            None => {
                return Err(ProxyError::ToolNotFound {
                    tool: native::PLINK,
                    platform: platform.name(),
                }
                .into());
            }
        }
    } else {
        BastionStrategy::PasswordInjectionScript
    };

    debug!(
        "bastion strategy for {} on {}: {}",
        config.host,
        platform.name(),
        strategy.name()
    );
    Ok(strategy)
}

/// A plan plus whatever on-disk state it depends on.
///
/// Keep this alive until the connect attempt finishes; dropping it removes
/// any helper file.
#[derive(Debug)]
pub struct PreparedRoute {
    pub plan: ConnectPlan,
    pub helper: Option<AskpassHelper>,
}

/// Turn a resolved strategy into a connect plan.
pub fn prepare(strategy: &BastionStrategy, config: &ConnectionConfig) -> Result<PreparedRoute> {
    let target = Endpoint::target(config);
    let mut hops = config.effective_bastions();
    let last_hop = Hop::Bastion(hops.len().saturating_sub(1));
    let legs = hops.len() as u32;
    let hosts: Vec<String> = hops.iter().map(|hop| hop.host.clone()).collect();

    if hops.is_empty() && *strategy != BastionStrategy::None {
        return Err(ConfigError::Missing { field: "bastions" }.into());
    }

    let (route, helper) = match strategy {
        BastionStrategy::None => {
            if let Some(template) = &config.proxy_command {
                let command = ProxyCommand::from_template(
                    template,
                    &config.host,
                    config.port,
                    &config.username,
                );
                (
                    Route::Proxy {
                        command,
                        hop: Hop::Bastion(0),
                        hosts: Vec::new(),
                        legs: 1,
                    },
                    None,
                )
            } else if hops.is_empty() {
                (Route::Direct, None)
            } else {
                let chain = hops
                    .iter()
                    .enumerate()
                    .map(|(i, hop)| Endpoint::bastion(config, i, hop))
                    .collect();
                (Route::Chain(chain), None)
            }
        }
        BastionStrategy::NativeProxyBinary { program } => {
            for hop in &mut hops {
                hop.host_key_verification = Some(config.bastion_host_key_verification(hop));
            }
            let command = native::plink_command(program, &hops, &config.host, config.port)?;
            (
                Route::Proxy {
                    command,
                    hop: last_hop,
                    hosts,
                    legs,
                },
                None,
            )
        }
        BastionStrategy::PasswordInjectionScript => {
            let helper = AskpassHelper::create(&hops)?;
            let options = askpass::SshProxyOptions {
                host_key_verification: hops
                    .last()
                    .map(|hop| config.bastion_host_key_verification(hop))
                    .unwrap_or(config.host_key_verification),
                known_hosts_path: config.known_hosts_path.as_deref(),
                connect_timeout: config.timeout,
            };
            let command = askpass::ssh_command(&helper, &hops, &config.host, config.port, &options)?;
            (
                Route::Proxy {
                    command,
                    hop: last_hop,
                    hosts,
                    legs,
                },
                Some(helper),
            )
        }
    };

    if let Route::Proxy { command, .. } = &route {
        info!("proxying {} through: {}", config.socket_addr(), command);
    }

    Ok(PreparedRoute {
        plan: ConnectPlan {
            strategy: strategy.clone(),
            target,
            route,
            timeout: config.timeout,
            terminal_width: config.terminal_width,
            terminal_height: config.terminal_height,
        },
        helper,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::transport::config::{BastionHop, Credentials, HostKeyVerification};

    fn no_tools(_: &str) -> Option<PathBuf> {
        None
    }

    fn plink_installed(program: &str) -> Option<PathBuf> {
        (program == native::PLINK).then(|| PathBuf::from(r"C:\PuTTY\plink.exe"))
    }

    fn with_bastion_password() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("10.0.0.1", "admin");
        config.credentials = Credentials::password("target-pw");
        config.bastions = vec![BastionHop::new("10.0.0.254", "jump").with_password("jump-pw")];
        config
    }

    #[test]
    fn test_no_bastion_is_none_everywhere() {
        let mut config = ConnectionConfig::new("10.0.0.1", "admin");
        config.credentials = Credentials::password("pw");
        for platform in [HostPlatform::Windows, HostPlatform::Unix] {
            assert_eq!(
                resolve(&config, platform, &no_tools).unwrap(),
                BastionStrategy::None
            );
        }
    }

    #[test]
    fn test_windows_with_plink_is_native() {
        let strategy = resolve(&with_bastion_password(), HostPlatform::Windows, &plink_installed).unwrap();
        assert_eq!(
            strategy,
            BastionStrategy::NativeProxyBinary {
                program: PathBuf::from(r"C:\PuTTY\plink.exe")
            }
        );
    }

    #[test]
    fn test_windows_without_plink_fails_instead_of_script() {
        let err = resolve(&with_bastion_password(), HostPlatform::Windows, &no_tools).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProxyConfiguration);
        assert!(matches!(err, Error::Proxy(ProxyError::ToolNotFound { tool: "plink", .. })));
    }

    #[test]
    fn test_unix_with_password_is_script() {
        let strategy = resolve(&with_bastion_password(), HostPlatform::Unix, &plink_installed).unwrap();
        assert_eq!(strategy, BastionStrategy::PasswordInjectionScript);
    }

    #[test]
    fn test_bastion_without_password_is_none() {
        let mut config = with_bastion_password();
        config.bastions = vec![BastionHop::new("10.0.0.254", "jump")
            .with_credentials(Credentials::private_key("/home/me/.ssh/id_ed25519"))];
        assert_eq!(
            resolve(&config, HostPlatform::Windows, &no_tools).unwrap(),
            BastionStrategy::None
        );
    }

    #[test]
    fn test_target_password_not_reused_by_default() {
        let mut config = with_bastion_password();
        config.bastions = vec![BastionHop::new("10.0.0.254", "jump")
            .with_credentials(Credentials::agent())];
        assert_eq!(
            resolve(&config, HostPlatform::Unix, &no_tools).unwrap(),
            BastionStrategy::None
        );

        config.reuse_password_for_bastion = true;
        assert_eq!(
            resolve(&config, HostPlatform::Unix, &no_tools).unwrap(),
            BastionStrategy::PasswordInjectionScript
        );
    }

    #[test]
    fn test_prepare_direct_and_chain() {
        let mut config = ConnectionConfig::new("10.0.0.1", "admin");
        config.credentials = Credentials::password("pw");
        let prepared = prepare(&BastionStrategy::None, &config).unwrap();
        assert!(matches!(prepared.plan.route, Route::Direct));
        assert_eq!(prepared.plan.target.hop, Hop::Direct);

        config.bastions = vec![BastionHop::new("10.0.0.254", "jump")
            .with_credentials(Credentials::agent())];
        let prepared = prepare(&BastionStrategy::None, &config).unwrap();
        match &prepared.plan.route {
            Route::Chain(hops) => {
                assert_eq!(hops.len(), 1);
                assert_eq!(hops[0].hop, Hop::Bastion(0));
                assert_eq!(hops[0].host, "10.0.0.254");
            }
            other => panic!("expected chain, got {:?}", other),
        }
        assert_eq!(prepared.plan.target.hop, Hop::Target);
        assert!(prepared.helper.is_none());
    }

    #[test]
    fn test_prepare_native() {
        let strategy = BastionStrategy::NativeProxyBinary {
            program: PathBuf::from("plink"),
        };
        let prepared = prepare(&strategy, &with_bastion_password()).unwrap();
        match &prepared.plan.route {
            Route::Proxy {
                command,
                hop,
                hosts,
                legs,
            } => {
                assert_eq!(*hop, Hop::Bastion(0));
                assert_eq!(hosts, &["10.0.0.254".to_string()]);
                assert_eq!(*legs, 1);
                assert!(command.to_string().ends_with("-nc 10.0.0.1:22 10.0.0.254"));
                assert!(!command.to_string().contains("jump-pw"));
            }
            other => panic!("expected proxy, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_script_keeps_helper_until_dropped() {
        let prepared = prepare(&BastionStrategy::PasswordInjectionScript, &with_bastion_password()).unwrap();
        let helper_path = prepared.helper.as_ref().unwrap().path().to_path_buf();
        assert!(helper_path.exists());
        drop(prepared);
        assert!(!helper_path.exists());
    }

    #[test]
    fn test_prepare_native_honors_hop_host_key_policy() {
        let strategy = BastionStrategy::NativeProxyBinary {
            program: PathBuf::from("plink"),
        };
        let mut config = with_bastion_password();
        config.host_key_verification = HostKeyVerification::Disabled;
        let prepared = prepare(&strategy, &config).unwrap();
        match &prepared.plan.route {
            Route::Proxy { command, .. } => {
                let args: Vec<&str> = command.exposed_args().collect();
                assert!(args.windows(2).any(|w| w == ["-hostkey", "*"]));
            }
            other => panic!("expected proxy, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_proxy_strategy_without_bastions_is_config_error() {
        let mut config = ConnectionConfig::new("10.0.0.1", "admin");
        config.credentials = Credentials::password("pw");
        for strategy in [
            BastionStrategy::NativeProxyBinary {
                program: PathBuf::from("plink"),
            },
            BastionStrategy::PasswordInjectionScript,
        ] {
            let err = prepare(&strategy, &config).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_prepare_custom_proxy_command() {
        let mut config = ConnectionConfig::new("r1", "admin");
        config.credentials = Credentials::password("pw");
        config.proxy_command = Some("nc -X 5 -x socks:1080 %h %p".to_string());
        let prepared = prepare(&BastionStrategy::None, &config).unwrap();
        match &prepared.plan.route {
            Route::Proxy { command, .. } => {
                assert!(command.to_string().ends_with("nc -X 5 -x socks:1080 r1 22"));
            }
            other => panic!("expected proxy, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_search_path_finds_sh() {
        assert!(SearchPath.find("sh").is_some());
        assert!(SearchPath.find("definitely-not-installed-junossh").is_none());
    }
}
