//! Channel's side of the control channel (§4.4): dials out to login,
//! sends a handshake byte plus the `(world, channel)` identification
//! bytes login's registry routes on, then holds the connection open to
//! receive `IssueToken` and push `Logout`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use control::{Handshake, Message, PendingTokenTable};
use log::{info, warn};

/// Delay between reconnect attempts while login is unreachable.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// The live control connection to login, plus the token table it feeds.
pub struct ControlClient {
    writer: Mutex<Option<TcpStream>>,
    tokens: Mutex<PendingTokenTable>,
    /// Whether this process has ever completed a handshake, so a later
    /// reconnect (same process, broken socket) sends `Reconnect` rather
    /// than `FirstConnection`.
    ever_connected: AtomicBool,
}

impl ControlClient {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            writer: Mutex::new(None),
            tokens: Mutex::new(PendingTokenTable::new()),
            ever_connected: AtomicBool::new(false),
        })
    }

    /// Redeems `token`, returning the character id it was issued for.
    pub fn redeem(&self, token: u32) -> Option<u32> {
        self.tokens.lock().unwrap().redeem(token)
    }

    /// Tells login a logged-in client disconnected.
    pub fn notify_logout(&self, token: u32) {
        let msg = Message::Logout { token };
        let mut writer = self.writer.lock().unwrap();
        if let Some(stream) = writer.as_mut() {
            if stream.write_all(&msg.encode()).is_err() {
                warn!("failed to send logout for token {}; login will learn of it on reconnect", token);
            }
        }
    }

    /// Dials login, reconnecting with backoff until the process exits.
    /// Never returns.
    pub fn run(self: std::sync::Arc<Self>, login_addr: SocketAddr, world: u8, channel: u8) {
        loop {
            match TcpStream::connect(login_addr) {
                Ok(mut stream) => {
                    let first_connection = !self.ever_connected.swap(true, Ordering::SeqCst);
                    let handshake = if first_connection { Handshake::FirstConnection } else { Handshake::Reconnect };
                    let header = [handshake.to_byte(), world, channel];
                    if stream.write_all(&header).is_err() {
                        warn!("failed to send control handshake to {}", login_addr);
                        std::thread::sleep(RETRY_DELAY);
                        continue;
                    }
                    info!("control channel connected to {} (first_connection={})", login_addr, first_connection);
                    if first_connection {
                        self.tokens.lock().unwrap().clear();
                    }
                    *self.writer.lock().unwrap() = stream.try_clone().ok();
                    self.read_loop(stream);
                    *self.writer.lock().unwrap() = None;
                    warn!("control channel to {} disconnected", login_addr);
                }
                Err(err) => {
                    warn!("failed to connect control channel to {}: {}", login_addr, err);
                }
            }
            std::thread::sleep(RETRY_DELAY);
        }
    }

    fn read_loop(&self, mut stream: TcpStream) {
        loop {
            let mut tag = [0u8; 1];
            if stream.read_exact(&mut tag).is_err() {
                return;
            }
            let body_len = match tag[0] {
                0x00 => 8, // IssueToken
                0x01 => 4, // Logout, channel never receives this
                _ => return,
            };
            let mut body = vec![0u8; body_len];
            if stream.read_exact(&mut body).is_err() {
                return;
            }
            let mut framed = Vec::with_capacity(1 + body_len);
            framed.push(tag[0]);
            framed.extend_from_slice(&body);
            match Message::decode(&framed) {
                Ok(Message::IssueToken { token, character_id }) => {
                    if let Err(err) = self.tokens.lock().unwrap().insert(token, character_id) {
                        warn!("rejected token {} from login: {}", token, err);
                    }
                }
                Ok(Message::Logout { .. }) => {
                    warn!("unexpected Logout from login");
                }
                Err(err) => {
                    warn!("malformed control message from login: {}", err);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_before_any_token_is_issued_returns_none() {
        let client = ControlClient::new();
        assert_eq!(client.redeem(1), None);
    }

    #[test]
    fn notify_logout_without_a_live_connection_does_not_panic() {
        let client = ControlClient::new();
        client.notify_logout(1);
    }
}
