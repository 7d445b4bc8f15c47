//! Account/world/channel opcode handlers (§6), implementing
//! `reactor::handler::Handler` atop the shared database, PIN table, and
//! control-channel registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dbengine::request::{DatabaseResult, RequestParams};
use log::{info, warn};
use mio::Interest;
use reactor::handler::{Handler, Outcome};
use reactor::worker::Ctx;

use crate::account::{hash_password, PinState, PinTable, SessionFlow};
use crate::codec::{Reader, Writer};
use crate::config::Config;
use crate::control::ControlRegistry;
use crate::db::{DbOutcome, Database};
use crate::reply;

/// What a suspended database request was trying to accomplish; resumed by
/// [`LoginHandler::on_resume`] once the connection's fd fires.
enum Purpose {
    FetchCredentials { password: String },
    CreateAccountAfterMiss { name: String, password: String },
    FetchProfile,
    AcceptTos,
    SetGender { gender: u8 },
    CharacterList { world: u8 },
    CheckName { name: String },
    CreateCharacter { name: String, job: u16, gender: u8, skin: u8, hair: u32, face: u32 },
    RegisterPic { pic: String },
}

/// Process-wide state shared by every worker's `LoginHandler` instance.
pub struct Shared {
    pub config: Config,
    pub db: Database,
    pub control: Arc<ControlRegistry>,
    pub pins: PinTable,
}

/// One worker's handler: a shared reference to process-wide state, plus
/// per-session scratch state keyed by address, as `Handler`'s contract
/// requires.
pub struct LoginHandler {
    shared: Arc<Shared>,
    flows: HashMap<SocketAddr, SessionFlow>,
    pending: HashMap<SocketAddr, (RequestParams, Purpose)>,
}

impl LoginHandler {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared, flows: HashMap::new(), pending: HashMap::new() }
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
        let addr = ctx.addr();
        match (purpose, result) {
            (Purpose::FetchCredentials { password }, DatabaseResult::GetAccountCredentials { id, hash, salt, found }) => {
                if found {
                    if hash_password(&password, salt) == hash {
                        self.begin_profile_fetch(ctx, id)
                    } else {
                        ctx.write(
                            &Writer::opcode(reply::LOGIN_RESULT)
                                .u32(reply::login_reason::WRONG_PASSWORD)
                                .finish(),
                        );
                        Outcome::Ready
                    }
                } else {
                    let flow = self.flows.entry(addr).or_default();
                    let name = flow.account_name.clone().unwrap_or_default();
                    let salt: u64 = rand::random();
                    let hash = hash_password(&password, salt);
                    self.run_db(
                        ctx,
                        RequestParams::TryCreateAccount { name: name.clone(), hash, salt },
                        Purpose::CreateAccountAfterMiss { name, password },
                    )
                }
            }
            (Purpose::CreateAccountAfterMiss { name: _, password: _ }, DatabaseResult::TryCreateAccount { created, id }) => {
                if created {
                    self.begin_profile_fetch(ctx, id)
                } else {
                    // Lost a create race against a concurrent login; treat
                    // as a wrong-password response rather than retrying.
                    ctx.write(
                        &Writer::opcode(reply::LOGIN_RESULT)
                            .u32(reply::login_reason::NOT_REGISTERED)
                            .finish(),
                    );
                    Outcome::Ready
                }
            }
            (Purpose::FetchProfile, DatabaseResult::GetAccount { pic, tos, gender }) => {
                if let Some(flow) = self.flows.get_mut(&addr) {
                    flow.tos = tos;
                    flow.gender = gender;
                    flow.pic = pic;
                }
                let reason = if tos == 0 { reply::login_reason::NEEDS_TOS } else { reply::login_reason::SUCCESS };
                ctx.write(&Writer::opcode(reply::LOGIN_RESULT).u32(reason).finish());
                Outcome::Ready
            }
            (Purpose::AcceptTos, DatabaseResult::UpdateAccount) => {
                if let Some(flow) = self.flows.get_mut(&addr) {
                    flow.tos = 1;
                }
                ctx.write(&Writer::opcode(reply::LOGIN_RESULT).u32(reply::login_reason::SUCCESS).finish());
                Outcome::Ready
            }
            (Purpose::SetGender { gender }, DatabaseResult::UpdateAccount) => {
                if let Some(flow) = self.flows.get_mut(&addr) {
                    flow.gender = Some(gender);
                }
                ctx.write(&Writer::opcode(reply::LOGIN_RESULT).u32(reply::login_reason::SUCCESS).finish());
                Outcome::Ready
            }
            (Purpose::RegisterPic { pic }, DatabaseResult::UpdateAccount) => {
                if let Some(flow) = self.flows.get_mut(&addr) {
                    flow.pic = Some(pic);
                }
                ctx.write(&Writer::opcode(reply::PIC_RESULT).u8(1).finish());
                Outcome::Ready
            }
            (Purpose::CharacterList { world }, DatabaseResult::CharacterList { characters }) => {
                if let Some(flow) = self.flows.get_mut(&addr) {
                    flow.current_world = Some(world);
                }
                let mut writer = Writer::opcode(reply::CHARACTER_LIST).u8(characters.len() as u8);
                for c in &characters {
                    writer = writer
                        .u32(c.id)
                        .string(&c.name)
                        .u16(c.job)
                        .u8(c.level)
                        .u8(c.gender)
                        .u8(c.skin)
                        .u32(c.face)
                        .u32(c.hair);
                }
                ctx.write(&writer.finish());
                ctx.write(&Writer::opcode(reply::END_WORLD_LIST).finish());
                Outcome::Ready
            }
            (Purpose::CheckName { name: _ }, DatabaseResult::GetCharacterExists { exists }) => {
                ctx.write(&Writer::opcode(reply::CHECK_NAME_RESULT).u8(u8::from(exists)).finish());
                Outcome::Ready
            }
            (
                Purpose::CreateCharacter { name: _, job: _, gender: _, skin: _, hair: _, face: _ },
                DatabaseResult::TryCreateCharacter { created, id },
            ) => {
                ctx.write(&Writer::opcode(reply::CREATE_CHARACTER_RESULT).u8(u8::from(created)).u32(id).finish());
                Outcome::Ready
            }
            (_, _) => {
                warn!("database result did not match the request that produced it");
                Outcome::Kick
            }
        }
    }

    fn begin_profile_fetch<S>(&mut self, ctx: &mut Ctx<'_, S>, account_id: u32) -> Outcome
    where
        S: reactor::net::tcp_stream::TcpStream + std::io::Read + std::io::Write + mio::event::Source,
    {
        let addr = ctx.addr();
        let flow = self.flows.entry(addr).or_default();
        flow.account_id = Some(account_id);
        self.run_db(ctx, RequestParams::GetAccount { id: account_id }, Purpose::FetchProfile)
    }

    /// Attempts to move a client into its selected channel: issues a
    /// token, notifies the channel over the control link, and replies
    /// with the address to connect to.
    fn try_enter_channel<S>(&mut self, ctx: &mut Ctx<'_, S>)
    where
        S: reactor::net::tcp_stream::TcpStream + std::io::Read + std::io::Write + mio::event::Source,
    {
        let addr = ctx.addr();
        let Some(flow) = self.flows.get_mut(&addr) else { return };
        let Some((world, channel, character_id)) = flow.pending_selection.take() else { return };

        let Some(slot) = self.shared.control.slot(world, channel) else {
            ctx.write(&Writer::opcode(reply::SERVER_IP).u8(0).finish());
            return;
        };
        match slot.issue_token(character_id) {
            Some(token) => {
                ctx.write(
                    &Writer::opcode(reply::SERVER_IP)
                        .u8(1)
                        .string(&slot.ip)
                        .u16(slot.port)
                        .u32(token)
                        .finish(),
                );
            }
            None => {
                ctx.write(&Writer::opcode(reply::SERVER_IP).u8(0).finish());
            }
        }
    }
}

impl<S> Handler<S> for LoginHandler
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
            wire::opcode::LOGIN_CREDENTIALS => {
                let (Some(name), Some(password)) = (reader.string(), reader.string()) else {
                    return Outcome::Kick;
                };
                self.flows.entry(addr).or_default().account_name = Some(name.clone());
                self.run_db(ctx, RequestParams::GetAccountCredentials { name }, Purpose::FetchCredentials { password })
            }
            wire::opcode::ACCEPT_TOS => {
                let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                let Some(id) = flow.account_id else { return Outcome::Kick };
                let pic = flow.pic.clone();
                let gender = flow.gender;
                self.run_db(ctx, RequestParams::UpdateAccount { id, pic, tos: 1, gender }, Purpose::AcceptTos)
            }
            wire::opcode::SET_GENDER => {
                let Some(gender) = reader.u8() else { return Outcome::Kick };
                let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                let Some(id) = flow.account_id else { return Outcome::Kick };
                let pic = flow.pic.clone();
                let tos = flow.tos;
                self.run_db(
                    ctx,
                    RequestParams::UpdateAccount { id, pic, tos, gender: Some(gender) },
                    Purpose::SetGender { gender },
                )
            }
            wire::opcode::PIN_STEP => {
                let Some(mode) = reader.u8() else { return Outcome::Kick };
                let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                let Some(id) = flow.account_id else { return Outcome::Kick };
                let next = if mode == 0 { PinState::AwaitingVerification } else { PinState::Verified };
                self.shared.pins.set(id, next);
                ctx.write(&Writer::opcode(reply::PIN_RESULT).u8(1).finish());
                Outcome::Ready
            }
            wire::opcode::WORLD_LIST | wire::opcode::WORLD_LIST_ALT => {
                let mut writer = Writer::opcode(reply::WORLD_LIST).u8(self.shared.control.world_count());
                for world in &self.shared.config.worlds {
                    writer = writer.string(&world.name).u8(world.channels.len() as u8);
                    for channel in &world.channels {
                        writer = writer.string(&channel.host);
                    }
                }
                ctx.write(&writer.finish());
                ctx.write(&Writer::opcode(reply::END_WORLD_LIST).finish());
                Outcome::Ready
            }
            wire::opcode::SERVER_STATUS => {
                ctx.write(&Writer::opcode(reply::SERVER_STATUS).u16(0).finish());
                Outcome::Ready
            }
            wire::opcode::CHARACTER_LIST => {
                let Some(world) = reader.u8() else { return Outcome::Kick };
                if let (Some(channel), Some(character_id)) = (reader.u8(), reader.u32()) {
                    let pic_required = self
                        .flows
                        .get(&addr)
                        .map(|f| f.pic.is_some())
                        .unwrap_or(false);
                    if let Some(flow) = self.flows.get_mut(&addr) {
                        flow.pending_selection = Some((world, channel, character_id));
                    }
                    if pic_required {
                        ctx.write(&Writer::opcode(reply::PIC_RESULT).u8(0).finish());
                        Outcome::Ready
                    } else {
                        self.try_enter_channel(ctx);
                        Outcome::Ready
                    }
                } else {
                    let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                    let Some(account_id) = flow.account_id else { return Outcome::Kick };
                    self.run_db(
                        ctx,
                        RequestParams::GetCharactersForAccountForWorld { account_id, world },
                        Purpose::CharacterList { world },
                    )
                }
            }
            wire::opcode::CHECK_NAME => {
                let Some(name) = reader.string() else { return Outcome::Kick };
                self.run_db(ctx, RequestParams::GetCharacterExists { name: name.clone() }, Purpose::CheckName { name })
            }
            wire::opcode::CREATE_CHARACTER => {
                let (Some(name), Some(job), Some(gender), Some(skin), Some(hair), Some(face)) =
                    (reader.string(), reader.u16(), reader.u8(), reader.u8(), reader.u32(), reader.u32())
                else {
                    return Outcome::Kick;
                };
                let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                let Some(account_id) = flow.account_id else { return Outcome::Kick };
                let world = flow.current_world.unwrap_or(0);
                let (top, bottom, shoes, weapon) = starter_equipment(gender);
                self.run_db(
                    ctx,
                    RequestParams::TryCreateCharacter {
                        name: name.clone(),
                        account_id,
                        world,
                        map: 10000,
                        job,
                        gender,
                        skin,
                        hair,
                        face,
                        top,
                        bottom,
                        shoes,
                        weapon,
                    },
                    Purpose::CreateCharacter { name, job, gender, skin, hair, face },
                )
            }
            wire::opcode::REGISTER_PIC => {
                let Some(pic) = reader.string() else { return Outcome::Kick };
                let Some(flow) = self.flows.get(&addr) else { return Outcome::Kick };
                let Some(id) = flow.account_id else { return Outcome::Kick };
                let tos = flow.tos;
                let gender = flow.gender;
                self.run_db(
                    ctx,
                    RequestParams::UpdateAccount { id, pic: Some(pic.clone()), tos, gender },
                    Purpose::RegisterPic { pic },
                )
            }
            wire::opcode::VERIFY_PIC => {
                let Some(submitted) = reader.string() else { return Outcome::Kick };
                let matches = self.flows.get(&addr).and_then(|f| f.pic.as_deref()) == Some(submitted.as_str());
                if matches {
                    self.try_enter_channel(ctx);
                } else {
                    ctx.write(&Writer::opcode(reply::PIC_RESULT).u8(0).finish());
                    if let Some(flow) = self.flows.get_mut(&addr) {
                        flow.pending_selection = None;
                    }
                }
                Outcome::Ready
            }
            other => {
                info!("unhandled login opcode {:#06x} from {}", other, addr);
                Outcome::Ready
            }
        }
    }

    fn on_disconnect(&mut self, ctx: &mut Ctx<'_, S>) {
        let addr = ctx.addr();
        self.flows.remove(&addr);
        self.pending.remove(&addr);
    }

    fn on_resume(&mut self, ctx: &mut Ctx<'_, S>, _status: u32) -> Outcome {
        let addr = ctx.addr();
        let Some((params, purpose)) = self.pending.remove(&addr) else { return Outcome::Ready };
        self.run_db(ctx, params, purpose)
    }

    fn on_client_join(&mut self, _ctx: &mut Ctx<'_, S>) -> Outcome {
        Outcome::Ready
    }
}

fn starter_equipment(gender: u8) -> (u32, u32, u32, u32) {
    if gender == 0 {
        (1040002, 1060002, 1072001, 1302000)
    } else {
        (1041002, 1061002, 1072001, 1302000)
    }
}
