//! BlueChat CLI application
//!
//! Wires a [`SessionController`] to the TCP transport and runs the
//! interactive chat loop: stdin lines are sent, snapshot changes are printed
//! and each error notification is shown once.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use bluechat_core::{Peer, SessionController};

use crate::config::CliAppConfig;
use crate::display::{format_peers, SnapshotPrinter};
use crate::error::{CliError, Result};
use crate::transport::TcpTransport;

/// Command that ends the chat loop
pub const QUIT_COMMAND: &str = "/quit";

/// Extra time granted to a discovery cycle beyond its scan window
const DISCOVERY_GRACE: Duration = Duration::from_secs(1);

pub struct ChatApp {
    config: CliAppConfig,
    controller: SessionController,
}

impl ChatApp {
    /// Create the application; must run inside a Tokio runtime
    pub fn new(config: CliAppConfig) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(TcpTransport::new(config.clone()));
        let controller = SessionController::new(transport, config.session.clone());
        info!("BlueChat ready as {}", config.tcp.device_name);

        Ok(Self { config, controller })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Accept one inbound connection, then chat until it ends
    ///
    /// Fails if the session ends without a peer ever connecting.
    pub async fn listen(&self) -> Result<()> {
        info!("Listening on {}", self.config.tcp.bind_address);
        self.controller.listen_for_connection().await;
        self.chat_loop().await
    }

    /// Connect to `address`, then chat until the connection ends
    ///
    /// Fails if the connection is never established.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let peer = Peer::new(self.config.peer_name(address), address);
        self.controller.connect_to_peer(&peer).await;
        self.chat_loop().await
    }

    /// Run one discovery cycle and print what is known
    pub async fn list_peers(&self) -> Result<()> {
        let mut snapshots = self.controller.subscribe();
        let mut errors = self.controller.errors();
        self.controller.start_discovery();

        if let Ok(error) = errors.try_recv() {
            return Err(CliError::TransportInit(error));
        }

        let limit = self.config.tcp.scan_window() + DISCOVERY_GRACE;
        let finished = tokio::time::timeout(limit, async {
            let _ = snapshots.wait_for(|s| s.is_scanning).await;
            let _ = snapshots.wait_for(|s| !s.is_scanning).await;
        })
        .await;
        if finished.is_err() {
            warn!("Discovery did not finish within {:?}", limit);
            self.controller.stop_discovery();
        }

        let snapshot = self.controller.snapshot();
        for line in format_peers("Paired peers", &snapshot.paired_peers)
            .into_iter()
            .chain(format_peers("Discovered peers", &snapshot.scanned_peers))
        {
            println!("{}", line);
        }

        self.controller.release().await;
        Ok(())
    }

    async fn chat_loop(&self) -> Result<()> {
        let mut snapshots = self.controller.subscribe();
        let mut errors = self.controller.errors();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut printer = SnapshotPrinter::new();
        let mut stdin_open = true;

        let current = snapshots.borrow_and_update().clone();
        printer.render(&current).iter().for_each(|l| println!("{}", l));

        while !printer.session_ended() {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    printer.render(&snapshot).iter().for_each(|l| println!("{}", l));
                }
                error = errors.recv() => match error {
                    Ok(error) => eprintln!("! {}", error),
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} error notifications", skipped),
                    Err(RecvError::Closed) => break,
                },
                line = lines.next_line(), if stdin_open => match line? {
                    Some(line) if line.trim() == QUIT_COMMAND => break,
                    Some(line) => {
                        if !self.controller.send_message(&line).await {
                            eprintln!("! Message not sent");
                        }
                    }
                    None => {
                        debug!("stdin closed");
                        stdin_open = false;
                    }
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        let failure = printer.failure(&self.controller.snapshot());
        self.controller.release().await;
        match failure {
            Some(reason) => Err(CliError::ConnectionFailed(reason)),
            None => Ok(()),
        }
    }
}
