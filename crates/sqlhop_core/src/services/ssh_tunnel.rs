//! SSH tunnels over russh.

use crate::error::{HopError, HopResult};
use crate::models::{AuthMethod, HostVerification, TunnelSpec};
use crate::services::prompt::{prompt_one, SecretPrompter};
use crate::services::tunnel::{ChannelOpener, Forwarder, RemoteTarget, Tunnel, TunnelDialer};

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::{ChannelStream, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Attempts allowed for keyboard-interactive rounds and passphrase prompts.
pub const PROMPT_RETRIES: usize = 3;

/// Instruction shown when an encrypted private key needs a passphrase.
pub const PASSPHRASE_INSTRUCTION: &str = "private key is encrypted";

/// Question asked for an encrypted private key.
pub const PASSPHRASE_QUESTION: &str = "private key passphrase: ";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Host key verification for one bastion.
struct SshClientHandler {
    tunnel: String,
    host: String,
    port: u16,
    verification: HostVerification,
}

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.verification == HostVerification::Insecure {
            tracing::warn!(tunnel = %self.tunnel, host = %self.host, "Host key verification disabled");
        }

        let known_hosts = known_hosts_path();
        match verify_host_key(
            &self.verification,
            known_hosts.as_deref(),
            &self.host,
            self.port,
            server_public_key,
        ) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(tunnel = %self.tunnel, host = %self.host, error = %e, "Host key rejected");
                Ok(false)
            }
        }
    }
}

/// Decide whether the key presented by `host:port` is trusted.
///
/// An unknown host, a changed key and an unreadable pinned key are all
/// authentication failures.
fn verify_host_key(
    verification: &HostVerification,
    known_hosts: Option<&Path>,
    host: &str,
    port: u16,
    presented: &PublicKey,
) -> HopResult<()> {
    match verification {
        HostVerification::Insecure => Ok(()),
        HostVerification::Pinned(path) => {
            let path = expand_home(path);
            let pinned = russh_keys::load_public_key(&path).map_err(|e| {
                HopError::authentication(format!(
                    "could not read pinned host key '{}': {e}",
                    path.display()
                ))
            })?;
            if pinned.fingerprint() == presented.fingerprint() {
                Ok(())
            } else {
                Err(HopError::authentication_with_hint(
                    format!("host key {} does not match the pinned key", presented.fingerprint()),
                    "Check host_public_key_file",
                ))
            }
        }
        HostVerification::KnownHosts => {
            let path =
                known_hosts.ok_or_else(|| HopError::authentication("could not locate known_hosts"))?;
            match russh_keys::check_known_hosts_path(host, port, presented, path) {
                Ok(true) => Ok(()),
                Ok(false) => Err(HopError::authentication_with_hint(
                    format!("host '{host}' is not in '{}'", path.display()),
                    "Connect once with ssh to record the host key",
                )),
                Err(e) => Err(HopError::authentication_with_hint(
                    format!("host key for '{host}' does not match known_hosts: {e}"),
                    "The host key changed; verify it before updating known_hosts",
                )),
            }
        }
    }
}

fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Dials SSH tunnels.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshDialer;

#[async_trait]
impl TunnelDialer for SshDialer {
    async fn dial(
        &self,
        spec: &TunnelSpec,
        remote: &RemoteTarget,
        prompter: &dyn SecretPrompter,
    ) -> HopResult<Box<dyn Tunnel>> {
        let session = match spec.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connect_session(spec, prompter))
                .await
                .map_err(|_| {
                    HopError::ssh(format!(
                        "timed out after {}s connecting to {}",
                        timeout.as_secs(),
                        spec.address()
                    ))
                })??,
            None => connect_session(spec, prompter).await?,
        };

        let opener = Arc::new(SshChannelOpener {
            tunnel: spec.name.clone(),
            session: Mutex::new(session),
            remote: remote.clone(),
        });

        let forwarder = match Forwarder::bind(&spec.name, opener.clone()).await {
            Ok(forwarder) => forwarder,
            Err(e) => {
                let _ = opener.disconnect().await;
                return Err(e);
            }
        };

        Ok(Box::new(SshTunnel { forwarder, opener }))
    }
}

async fn connect_session(
    spec: &TunnelSpec,
    prompter: &dyn SecretPrompter,
) -> HopResult<client::Handle<SshClientHandler>> {
    let config = Arc::new(client::Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        ..Default::default()
    });

    let handler = SshClientHandler {
        tunnel: spec.name.clone(),
        host: spec.host.clone(),
        port: spec.port,
        verification: spec.host_verification(),
    };

    let mut handle = client::connect(config, (spec.host.as_str(), spec.port), handler)
        .await
        .map_err(|e| match HopError::from(e) {
            err if err.is_authentication() => err,
            err => err.context(format!("failed to connect to {}", spec.address())),
        })?;

    let authenticated = match spec.auth_method {
        AuthMethod::Password => match spec.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => handle.authenticate_password(spec.user.as_str(), password).await?,
            None => authenticate_keyboard_interactive(&mut handle, spec, prompter).await?,
        },
        AuthMethod::PublicKey => {
            let key = load_private_key(spec, prompter).await?;
            handle.authenticate_publickey(spec.user.as_str(), Arc::new(key)).await?
        }
        AuthMethod::Agent => authenticate_with_agent(&mut handle, &spec.user).await?,
    };

    if !authenticated {
        return Err(HopError::authentication_with_hint(
            format!("ssh authentication failed for {}@{}", spec.user, spec.address()),
            format!("Check the '{}' credentials", spec.auth_method.as_str()),
        ));
    }

    tracing::info!(user = %spec.user, bastion = %spec.address(), "SSH authentication successful");
    Ok(handle)
}

/// Answer keyboard-interactive challenges through the prompter.
async fn authenticate_keyboard_interactive(
    handle: &mut client::Handle<SshClientHandler>,
    spec: &TunnelSpec,
    prompter: &dyn SecretPrompter,
) -> HopResult<bool> {
    for attempt in 1..=PROMPT_RETRIES {
        let mut response =
            handle.authenticate_keyboard_interactive_start(spec.user.as_str(), None).await?;
        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure => break,
                KeyboardInteractiveAuthResponse::InfoRequest { name, instructions, prompts } => {
                    let answers = {
                        let questions: Vec<&str> = prompts.iter().map(|p| p.prompt.as_str()).collect();
                        let echos: Vec<bool> = prompts.iter().map(|p| p.echo).collect();
                        prompter.prompt(&name, &instructions, &questions, &echos)?
                    };
                    response = handle.authenticate_keyboard_interactive_respond(answers).await?;
                }
            }
        }
        tracing::debug!(attempt, "Keyboard-interactive authentication rejected");
    }
    Ok(false)
}

async fn load_private_key(spec: &TunnelSpec, prompter: &dyn SecretPrompter) -> HopResult<KeyPair> {
    let path = spec.private_key_file.as_deref().ok_or_else(|| {
        HopError::config(format!("tunnel '{}': public_key auth requires private_key_file", spec.name))
    })?;
    let path = expand_home(path);

    let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
        HopError::config(format!("could not read private key file '{}': {e}", path.display()))
    })?;

    unlock_key(
        &spec.host,
        spec.private_key_passphrase.as_deref(),
        prompter,
        |passphrase| russh_keys::decode_secret_key(&data, passphrase),
    )
    .map_err(|e| e.context(format!("private key '{}'", path.display())))
}

/// Decode a private key, asking for a passphrase when it is encrypted and
/// none is configured.
fn unlock_key<K>(
    host: &str,
    configured: Option<&str>,
    prompter: &dyn SecretPrompter,
    decode: impl Fn(Option<&str>) -> Result<K, russh_keys::Error>,
) -> HopResult<K> {
    match decode(None) {
        Ok(key) => return Ok(key),
        Err(russh_keys::Error::KeyIsEncrypted) => {}
        Err(e) => {
            return Err(HopError::authentication(format!("could not parse private key: {e}")))
        }
    }

    if let Some(passphrase) = configured.filter(|p| !p.is_empty()) {
        return decode(Some(passphrase))
            .map_err(|e| HopError::authentication(format!("could not decrypt private key: {e}")));
    }

    for attempt in 1..=PROMPT_RETRIES {
        let passphrase =
            match prompt_one(prompter, host, PASSPHRASE_INSTRUCTION, PASSPHRASE_QUESTION, false) {
                Ok(passphrase) => passphrase,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Passphrase prompt failed");
                    continue;
                }
            };
        match decode(Some(&passphrase)) {
            Ok(key) => return Ok(key),
            Err(e) => tracing::debug!(attempt, error = %e, "Passphrase rejected"),
        }
    }

    Err(HopError::authentication_with_hint(
        format!("could not decrypt private key after {PROMPT_RETRIES} attempts"),
        "Check the private key passphrase",
    ))
}

/// Authenticate with identities from the agent at `SSH_AUTH_SOCK`.
#[cfg(unix)]
async fn authenticate_with_agent(
    handle: &mut client::Handle<SshClientHandler>,
    username: &str,
) -> HopResult<bool> {
    use russh_keys::agent::client::AgentClient;
    use tokio::net::UnixStream;

    let socket_path = std::env::var("SSH_AUTH_SOCK").map_err(|_| {
        HopError::authentication_with_hint(
            "SSH agent not available (SSH_AUTH_SOCK not set)",
            "Start your SSH agent with: eval $(ssh-agent)",
        )
    })?;

    let stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|e| HopError::ssh_with_source("could not open SSH_AUTH_SOCK", e))?;

    let mut agent = AgentClient::connect(stream);
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| HopError::ssh_with_source("failed to list SSH agent identities", e))?;

    if identities.is_empty() {
        return Err(HopError::authentication_with_hint(
            "no identities available in SSH agent",
            "Add your SSH key to the agent with: ssh-add",
        ));
    }

    tracing::debug!(identities = identities.len(), "Trying SSH agent identities");

    for identity in identities {
        let (returned, result) = handle.authenticate_future(username, identity, agent).await;
        agent = returned;
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => continue,
            Err(e) => tracing::debug!(error = %e, "SSH agent signing failed, trying next"),
        }
    }

    Ok(false)
}

#[cfg(not(unix))]
async fn authenticate_with_agent(
    _handle: &mut client::Handle<SshClientHandler>,
    _username: &str,
) -> HopResult<bool> {
    Err(HopError::authentication("SSH agent authentication requires SSH_AUTH_SOCK (unix only)"))
}

/// Opens direct-tcpip channels on an authenticated session.
struct SshChannelOpener {
    tunnel: String,
    session: Mutex<client::Handle<SshClientHandler>>,
    remote: RemoteTarget,
}

impl SshChannelOpener {
    async fn disconnect(&self) -> HopResult<()> {
        self.session
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| HopError::ssh_with_source(format!("tunnel '{}': disconnect failed", self.tunnel), e))
    }
}

#[async_trait]
impl ChannelOpener for SshChannelOpener {
    type Stream = ChannelStream<client::Msg>;

    async fn open_channel(&self, peer: SocketAddr) -> HopResult<Self::Stream> {
        let channel = self
            .session
            .lock()
            .await
            .channel_open_direct_tcpip(
                self.remote.host.as_str(),
                u32::from(self.remote.port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
            .map_err(|e| {
                HopError::ssh_with_source(format!("failed to open channel to {}", self.remote), e)
            })?;
        Ok(channel.into_stream())
    }
}

/// A forwarder bound to an SSH session.
struct SshTunnel {
    forwarder: Forwarder,
    opener: Arc<SshChannelOpener>,
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_addr(&self) -> SocketAddr {
        self.forwarder.local_addr()
    }

    fn is_alive(&self) -> bool {
        self.forwarder.is_alive()
    }

    async fn close(&self) -> HopResult<()> {
        self.forwarder.shutdown().await;
        self.opener.disconnect().await
    }
}
