//! Login's side of the control channel (§4.4): a plain blocking
//! `std::net::TcpListener` accept loop, since control connections are few,
//! long-lived, and unrelated to the client-facing mio reactor. Each
//! channel dials in once, sends a handshake byte plus two bytes
//! identifying its (world, channel) slot — a binary-layer detail this
//! binary owns, since `control::Message` itself has no notion of which
//! channel is speaking — then the connection stays open for
//! login to push `IssueToken` and the channel to push `Logout`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;

use control::{ControlLink, Handshake, Message, TokenGenerator};
use log::{info, warn};

use crate::config::Config;

/// Login-side bookkeeping for one (world, channel) control connection.
pub struct ChannelSlot {
    pub world: u8,
    pub channel: u8,
    pub host: String,
    pub ip: String,
    pub port: u16,
    link: Mutex<ControlLink>,
    generator: Mutex<TokenGenerator>,
    writer: Mutex<Option<TcpStream>>,
}

impl ChannelSlot {
    fn new(world: u8, channel: u8, host: String, ip: String, port: u16) -> Self {
        Self {
            world,
            channel,
            host,
            ip,
            port,
            link: Mutex::new(ControlLink::new()),
            generator: Mutex::new(TokenGenerator::new()),
            writer: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.link.lock().unwrap().is_connected()
    }

    /// Issues a fresh token for `character_id` and pushes it to the
    /// channel. Returns `None` if the channel isn't connected, the token
    /// table is full, or the write fails.
    pub fn issue_token(&self, character_id: u32) -> Option<u32> {
        if !self.is_online() {
            return None;
        }
        let token = self.generator.lock().unwrap().issue(character_id).ok()?;
        let msg = Message::IssueToken { token, character_id };
        let mut writer = self.writer.lock().unwrap();
        match writer.as_mut() {
            Some(stream) if stream.write_all(&msg.encode()).is_ok() => Some(token),
            _ => None,
        }
    }

    fn accept_with_handshake(&self, handshake_byte: u8, mut stream: TcpStream) {
        let handshake = match Handshake::from_byte(handshake_byte) {
            Ok(h) => h,
            Err(err) => {
                warn!("control channel ({},{}) bad handshake: {}", self.world, self.channel, err);
                return;
            }
        };

        let first_connection = matches!(handshake, Handshake::FirstConnection);
        self.link.lock().unwrap().record_handshake(first_connection);
        info!(
            "control channel ({}, {}) connected from {:?}, first_connection={}",
            self.world,
            self.channel,
            stream.peer_addr(),
            first_connection
        );

        *self.writer.lock().unwrap() = match stream.try_clone() {
            Ok(s) => Some(s),
            Err(err) => {
                warn!("failed to clone control stream: {}", err);
                return;
            }
        };

        loop {
            let mut tag = [0u8; 1];
            if stream.read_exact(&mut tag).is_err() {
                break;
            }
            let body_len = match tag[0] {
                0x00 => 8, // IssueToken, channel never sends this but kept symmetric
                0x01 => 4, // Logout
                _ => break,
            };
            let mut body = vec![0u8; body_len];
            if stream.read_exact(&mut body).is_err() {
                break;
            }
            let mut framed = Vec::with_capacity(1 + body_len);
            framed.push(tag[0]);
            framed.extend_from_slice(&body);
            match Message::decode(&framed) {
                Ok(Message::Logout { token }) => {
                    self.generator.lock().unwrap().forget(token);
                    info!("control channel ({}, {}) logout: token {}", self.world, self.channel, token);
                }
                Ok(Message::IssueToken { .. }) => {
                    warn!("unexpected IssueToken from channel ({}, {})", self.world, self.channel);
                }
                Err(err) => {
                    warn!("malformed control message from ({}, {}): {}", self.world, self.channel, err);
                    break;
                }
            }
        }

        warn!("control channel ({}, {}) disconnected", self.world, self.channel);
        self.link.lock().unwrap().mark_disconnected();
        *self.writer.lock().unwrap() = None;
    }
}

/// Every channel slot login expects to hear from, plus the accept loop
/// that routes an inbound control connection to the right one.
pub struct ControlRegistry {
    slots: Vec<ChannelSlot>,
}

impl ControlRegistry {
    pub fn from_config(config: &Config) -> std::sync::Arc<Self> {
        let mut slots = Vec::with_capacity(config.total_channels());
        for (world_idx, world) in config.worlds.iter().enumerate() {
            for (channel_idx, channel) in world.channels.iter().enumerate() {
                slots.push(ChannelSlot::new(
                    world_idx as u8,
                    channel_idx as u8,
                    channel.host.clone(),
                    channel.ip.clone(),
                    channel.port,
                ));
            }
        }
        std::sync::Arc::new(Self { slots })
    }

    pub fn slot(&self, world: u8, channel: u8) -> Option<&ChannelSlot> {
        self.slots.iter().find(|s| s.world == world && s.channel == channel)
    }

    pub fn world_channel_count(&self, world: u8) -> usize {
        self.slots.iter().filter(|s| s.world == world).count()
    }

    pub fn world_count(&self) -> u8 {
        self.slots.iter().map(|s| s.world).max().map(|m| m + 1).unwrap_or(0)
    }

    /// Runs the control-channel accept loop until the listener errors out.
    /// Spawns one thread per accepted connection, each pinned to the slot
    /// its handshake identifies.
    pub fn run(self: std::sync::Arc<Self>, bind: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind)?;
        info!("control channel listening on {}", bind);
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(err) => {
                    warn!("control listener accept failed: {}", err);
                    continue;
                }
            };
            let registry = self.clone();
            std::thread::spawn(move || {
                let mut header = [0u8; 2];
                let mut stream = stream;
                if stream.read_exact(&mut header[..1]).is_err() {
                    return;
                }
                let handshake_byte = header[0];
                let mut ids = [0u8; 2];
                if stream.read_exact(&mut ids).is_err() {
                    return;
                }
                let Some(slot) = registry.slot(ids[0], ids[1]) else {
                    warn!("control connection for unknown slot ({}, {})", ids[0], ids[1]);
                    return;
                };
                // world/channel identification bytes immediately follow the
                // handshake byte; already consumed above.
                slot.accept_with_handshake(handshake_byte, stream);
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, DatabaseConfig, WorldConfig};

    fn test_config() -> Config {
        Config {
            database: DatabaseConfig { host: "localhost".into(), port: 3306, user: "root".into(), password: String::new(), db: "db".into() },
            worlds: vec![
                WorldConfig { name: "Scania".into(), channels: vec![
                    ChannelConfig { host: "ch0".into(), ip: "127.0.0.1".into(), port: 7575 },
                    ChannelConfig { host: "ch1".into(), ip: "127.0.0.1".into(), port: 7576 },
                ]},
                WorldConfig { name: "Bera".into(), channels: vec![
                    ChannelConfig { host: "ch0".into(), ip: "127.0.0.1".into(), port: 7577 },
                ]},
            ],
            client_bind: "0.0.0.0:8484".parse().unwrap(),
            control_bind: "0.0.0.0:8585".parse().unwrap(),
            worker_threads: None,
        }
    }

    #[test]
    fn slots_are_indexed_by_world_and_channel() {
        let registry = ControlRegistry::from_config(&test_config());
        assert_eq!(registry.world_count(), 2);
        assert_eq!(registry.world_channel_count(0), 2);
        assert_eq!(registry.world_channel_count(1), 1);
        assert!(registry.slot(0, 1).is_some());
        assert!(registry.slot(1, 1).is_none());
    }

    #[test]
    fn a_slot_with_no_control_connection_is_offline() {
        let registry = ControlRegistry::from_config(&test_config());
        let slot = registry.slot(0, 0).unwrap();
        assert!(!slot.is_online());
        assert!(slot.issue_token(1).is_none());
    }
}
