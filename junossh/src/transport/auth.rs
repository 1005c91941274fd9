//! Per-hop authentication.
//!
//! Methods are tried in the order key file, agent, password (falling back to
//! keyboard-interactive, which many JunOS builds prefer). The first success
//! wins; if every configured method is rejected the hop fails with
//! [`TransportError::AuthenticationFailed`], which names the user and never
//! the secret.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info};
use russh::client::{Handle, KeyboardInteractiveAuthResponse};
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{AgentAuthError, CryptoVec, Signer};
use secrecy::ExposeSecret;

use super::handler::SshHandler;
use super::plan::Endpoint;
use crate::error::{Result, TransportError};

/// Keyboard-interactive rounds before giving up.
const MAX_KBD_ROUNDS: usize = 3;

pub(crate) async fn authenticate(handle: &mut Handle<SshHandler>, endpoint: &Endpoint) -> Result<()> {
    let creds = &endpoint.credentials;
    let ssh_err = |source| TransportError::Ssh {
        hop: endpoint.hop,
        source,
    };

    if let Some(path) = &creds.private_key {
        let passphrase = creds.passphrase.as_ref().map(|p| p.expose_secret());
        let key = load_secret_key(path, passphrase).map_err(|e| TransportError::Key {
            hop: endpoint.hop,
            message: format!("{}: {}", path.display(), e),
        })?;
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(ssh_err)?
            .flatten();
        let accepted = handle
            .authenticate_publickey(
                &endpoint.username,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(ssh_err)?
            .success();
        if accepted {
            info!("[{}] authenticated {} with key", endpoint.hop, endpoint.username);
            return Ok(());
        }
        debug!("[{}] key {} rejected", endpoint.hop, path.display());
    }

    if creds.use_agent {
        match authenticate_with_agent(handle, endpoint).await {
            Ok(true) => {
                info!("[{}] authenticated {} with agent", endpoint.hop, endpoint.username);
                return Ok(());
            }
            Ok(false) => debug!("[{}] no agent key accepted", endpoint.hop),
            Err(reason) => debug!("[{}] agent unavailable: {}", endpoint.hop, reason),
        }
    }

    if let Some(password) = &creds.password {
        let accepted = handle
            .authenticate_password(&endpoint.username, password.expose_secret())
            .await
            .map_err(ssh_err)?
            .success();
        if accepted {
            info!("[{}] authenticated {} with password", endpoint.hop, endpoint.username);
            return Ok(());
        }

        if keyboard_interactive(handle, &endpoint.username, password.expose_secret())
            .await
            .map_err(ssh_err)?
        {
            info!(
                "[{}] authenticated {} with keyboard-interactive",
                endpoint.hop, endpoint.username
            );
            return Ok(());
        }
    }

    Err(TransportError::AuthenticationFailed {
        hop: endpoint.hop,
        user: endpoint.username.clone(),
    }
    .into())
}

/// Answer every keyboard-interactive prompt with the password.
async fn keyboard_interactive(
    handle: &mut Handle<SshHandler>,
    username: &str,
    password: &str,
) -> std::result::Result<bool, russh::Error> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await?;
    for _ in 0..MAX_KBD_ROUNDS {
        let prompts = match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => prompts,
        };
        let answers = prompts.iter().map(|_| password.to_string()).collect();
        response = handle
            .authenticate_keyboard_interactive_respond(answers)
            .await?;
    }
    Ok(matches!(response, KeyboardInteractiveAuthResponse::Success))
}

/// Wraps the agent so the signing future owns its key and stays `Send`.
struct AgentSigner<'a> {
    agent: &'a mut AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = std::result::Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(unix)]
async fn connect_agent() -> std::result::Result<AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>, String> {
    AgentClient::connect_env()
        .await
        .map(|agent| agent.dynamic())
        .map_err(|e| e.to_string())
}

#[cfg(windows)]
async fn connect_agent() -> std::result::Result<AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>, String> {
    AgentClient::connect_named_pipe(r"\\.\pipe\openssh-ssh-agent")
        .await
        .map(|agent| agent.dynamic())
        .map_err(|e| e.to_string())
}

#[cfg(not(any(unix, windows)))]
async fn connect_agent() -> std::result::Result<AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>, String> {
    Err("no SSH agent support on this platform".to_string())
}

/// Try each agent identity. `Err` means the agent itself was unusable.
async fn authenticate_with_agent(
    handle: &mut Handle<SshHandler>,
    endpoint: &Endpoint,
) -> std::result::Result<bool, String> {
    let mut agent = connect_agent().await?;
    let keys = agent
        .request_identities()
        .await
        .map_err(|e| e.to_string())?;

    for key in keys {
        debug!("[{}] trying agent key {}", endpoint.hop, key.algorithm());
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| e.to_string())?
            .flatten();
        let result = handle
            .authenticate_publickey_with(
                &endpoint.username,
                key,
                hash_alg,
                &mut AgentSigner { agent: &mut agent },
            )
            .await;
        match result {
            Ok(auth) if auth.success() => return Ok(true),
            Ok(_) => {}
            Err(e) => debug!("[{}] agent signing failed: {}", endpoint.hop, e),
        }
    }
    Ok(false)
}
