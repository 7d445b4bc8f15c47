//! Room/session opcode handlers: token redemption into a character,
//! room hand-off on map change, and chat broadcast — the callback seams
//! §1 leaves game-logic content (experience, quests, scripts) outside of.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dbengine::request::{DatabaseResult, RequestParams};
use log::warn;
use mio::Interest;
use reactor::handler::{Handler, Outcome};
use reactor::worker::Ctx;

use crate::codec::{Reader, Writer};
use crate::config::Config;
use crate::control::ControlClient;
use crate::db::{DbOutcome, Database};
use crate::reply::{self, request};

/// Interval at which a room's keep-alive tick fires once a client has
/// joined it, demonstrating the per-room timer wheel.
const ROOM_TICK: Duration = Duration::from_secs(10);

enum Purpose {
    EnterChannel { token: u32 },
}

/// A connected client's progress: unauthenticated until it redeems a
/// token, then tracks the character and token it entered with (the token
/// is needed again on disconnect, to tell login who logged out).
#[derive(Default)]
struct SessionState {
    character_id: Option<u32>,
    character_name: Option<String>,
    token: Option<u32>,
}

pub struct Shared {
    pub config: Config,
    pub db: Database,
    pub control: Arc<ControlClient>,
}

pub struct ChannelHandler {
    shared: Arc<Shared>,
    sessions: HashMap<SocketAddr, SessionState>,
    pending: HashMap<SocketAddr, (RequestParams, Purpose)>,
}

impl ChannelHandler {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared, sessions: HashMap::new(), pending: HashMap::new() }
    }

    fn run_db<S>(&mut self, ctx: &mut Ctx<'_, S>, params: RequestParams, purpose: Purpose) -> Outcome
    where
        S: reactor::net::tcp_stream::TcpStream + std::io::Read + std::io::Write + mio::event::Source,
    {
        match self.shared.db.try_run(params.clone()) {
            Ok(DbOutcome::Ready(result)) => self.handle_db_result(ctx, purpose, result),
            Ok(DbOutcome::Suspend(fd)) => {
                self.pending.insert(ctx.addr(), (params, purpose));
                Outcome::Suspend(fd, Interest::READABLE)
            }
            Err(err) => {
                warn!("database request failed: {}", err);
                Outcome::Kick
            }
        }
    }

    fn handle_db_result<S>(&mut self, ctx: &mut Ctx<'_, S>, purpose: Purpose, result: DatabaseResult) -> Outcome
    where
        S: reactor::net::tcp_stream::TcpStream + std::io::Read + std::io::Write + mio::event::Source,
    {
        match (purpose, result) {
            (Purpose::EnterChannel { token }, DatabaseResult::GetCharacter { record }) => {
                let addr = ctx.addr();
                let state = self.sessions.entry(addr).or_default();
                state.character_id = Some(record.id);
                state.character_name = Some(record.name.clone());
                state.token = Some(token);
                ctx.write(
                    &Writer::opcode(reply::ENTER_RESULT)
                        .u8(1)
                        .string(&record.name)
                        .u32(record.map)
                        .finish(),
                );
                ctx.transfer_to_room(record.map);
                Outcome::Ready
            }
            (_, _) => {
                warn!("database result did not match the request that produced it");
                Outcome::Kick
            }
        }
    }
}

impl<S> Handler<S> for ChannelHandler
where
    S: reactor::net::tcp_stream::TcpStream + std::io::Read + std::io::Write + mio::event::Source,
{
    fn on_connect(&mut self, _ctx: &mut Ctx<'_, S>) -> Outcome {
        Outcome::Ready
    }

    fn on_packet(&mut self, ctx: &mut Ctx<'_, S>, body: Vec<u8>) -> Outcome {
        let mut reader = Reader::new(&body);
        let Some(opcode) = reader.u16() else { return Outcome::Ready };
        let addr = ctx.addr();

        match opcode {
            request::ENTER_CHANNEL => {
                let Some(token) = reader.u32() else { return Outcome::Kick };
                match self.shared.control.redeem(token) {
                    Some(character_id) => {
                        self.run_db(ctx, RequestParams::GetCharacter { id: character_id }, Purpose::EnterChannel { token })
                    }
                    None => {
                        ctx.write(&Writer::opcode(reply::ENTER_RESULT).u8(0).finish());
                        Outcome::Kick
                    }
                }
            }
            request::CHANGE_MAP => {
                let Some(target_map) = reader.u32() else { return Outcome::Kick };
                if !self.sessions.contains_key(&addr) {
                    return Outcome::Kick;
                }
                ctx.write(&Writer::opcode(reply::CHANGE_MAP_RESULT).u8(1).u32(target_map).finish());
                ctx.transfer_to_room(target_map);
                Outcome::Ready
            }
            request::CHAT => {
                let Some(text) = reader.string() else { return Outcome::Kick };
                let Some(state) = self.sessions.get(&addr) else { return Outcome::Kick };
                let name = state.character_name.clone().unwrap_or_default();
                ctx.room_broadcast(&Writer::opcode(reply::CHAT_BROADCAST).string(&name).string(&text).finish());
                Outcome::Ready
            }
            other => {
                warn!("unhandled channel opcode {:#06x} from {}", other, addr);
                Outcome::Ready
            }
        }
    }

    fn on_disconnect(&mut self, ctx: &mut Ctx<'_, S>) {
        let addr = ctx.addr();
        self.pending.remove(&addr);
        if let Some(state) = self.sessions.remove(&addr) {
            if let Some(token) = state.token {
                self.shared.control.notify_logout(token);
            }
        }
    }

    fn on_resume(&mut self, ctx: &mut Ctx<'_, S>, _status: u32) -> Outcome {
        let addr = ctx.addr();
        let Some((params, purpose)) = self.pending.remove(&addr) else { return Outcome::Ready };
        self.run_db(ctx, params, purpose)
    }

    fn on_client_join(&mut self, ctx: &mut Ctx<'_, S>) -> Outcome {
        ctx.enable_write();
        ctx.add_timer(ROOM_TICK, true);
        Outcome::Ready
    }
}
