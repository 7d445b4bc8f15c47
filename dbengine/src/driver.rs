//! The seam between the resumable request FSM ([`crate::request`]) and an
//! actual MySQL client library, mirroring the way `reactor::net::TcpStream`
//! abstracts over `mio`/`std` sockets: production code drives a real
//! connection, tests drive a scripted [`MockDriver`].
//!
//! Each suspension point named in §4.5 — prepare, bind+execute, fetch — is
//! a pair of `begin_*`/`poll_*` methods. `begin_*` starts the operation and
//! may complete synchronously; `poll_*` resumes one already in flight,
//! fed the readiness bitmask the reactor observed.

use std::os::unix::io::RawFd;

use mysql_common::Value;

use crate::error::Result;

/// readiness bitmask unit: the socket is readable.
pub const WAIT_READABLE: i32 = libc::POLLIN;
/// readiness bitmask unit: out-of-band data is available.
pub const WAIT_PRIORITY: i32 = libc::POLLPRI;
/// readiness bitmask unit: the socket is writable.
pub const WAIT_WRITABLE: i32 = libc::POLLOUT;

/// Outcome of a single driver step.
#[derive(Debug)]
pub enum PollStep<T> {
    /// The step finished; `T` carries whatever it produced.
    Ready(T),
    /// The step would block; the caller must wait for the given readiness
    /// bitmask (`{WAIT_READABLE, WAIT_PRIORITY, WAIT_WRITABLE}`) on
    /// [`QueryDriver::socket_fd`] and resume with `poll_*`.
    WouldBlock(i32),
}

/// A single fetched row, as loosely-typed MySQL values.
pub type Row = Vec<Value>;

/// Drives one prepared statement's prepare/bind-execute/fetch lifecycle
/// against a single locked [`crate::connection::DatabaseConnection`].
///
/// Implementations own exactly one in-flight statement at a time; a new
/// statement is started only after the previous one's rows have been
/// fully fetched.
pub trait QueryDriver {
    /// The connection's underlying socket, for registering with a reactor.
    fn socket_fd(&self) -> RawFd;

    /// Starts preparing `sql`.
    fn begin_prepare(&mut self, sql: &str) -> Result<PollStep<()>>;
    /// Resumes a prepare in flight.
    fn poll_prepare(&mut self, status: i32) -> Result<PollStep<()>>;

    /// Binds `params` to the most recently prepared statement and starts
    /// executing it.
    fn begin_bind_execute(&mut self, params: &[Value]) -> Result<PollStep<u64>>;
    /// Resumes a bind+execute in flight. `u64` is the statement's
    /// generated id (0 if none, e.g. an update with no auto-increment).
    fn poll_bind_execute(&mut self, status: i32) -> Result<PollStep<u64>>;

    /// Starts fetching every row of the most recently executed statement's
    /// result set (empty for a statement with no result set).
    fn begin_fetch(&mut self) -> Result<PollStep<Vec<Row>>>;
    /// Resumes a fetch in flight.
    fn poll_fetch(&mut self, status: i32) -> Result<PollStep<Vec<Row>>>;
}

/// A bundled in-memory [`QueryDriver`] for `accounts`/`characters`,
/// standing in for a real MySQL wire client: no async MySQL driver crate
/// is part of the dependency stack, and this engine is explicitly
/// vendor-agnostic (§4.5's Non-goals), so the binaries that need
/// something concrete to run against are given this one. Every step
/// completes synchronously; there is no socket to wait on.
pub mod memory {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct AccountRow {
        id: u32,
        name: String,
        hash: Vec<u8>,
        salt: u64,
        pic: Option<String>,
        tos: u8,
        gender: Option<u8>,
    }

    #[derive(Debug, Clone)]
    struct CharacterRow {
        id: u32,
        account_id: u32,
        world: u8,
        name: String,
        map: u32,
        spawn_point: u8,
        job: u16,
        level: u8,
        exp: i32,
        max_hp: i16,
        hp: i16,
        max_mp: i16,
        mp: i16,
        str_: i16,
        dex: i16,
        int_: i16,
        luk: i16,
        ap: i16,
        sp: i16,
        fame: i16,
        mesos: i32,
        gender: u8,
        skin: u8,
        face: u32,
        hair: u32,
    }

    fn new_character(id: u32, account_id: u32, world: u8, name: String, map: u32, job: u16, gender: u8, skin: u8, hair: u32, face: u32) -> CharacterRow {
        CharacterRow {
            id,
            account_id,
            world,
            name,
            map,
            spawn_point: 0,
            job,
            level: 1,
            exp: 0,
            max_hp: 50,
            hp: 50,
            max_mp: 5,
            mp: 5,
            str_: 12,
            dex: 5,
            int_: 4,
            luk: 4,
            ap: 0,
            sp: 0,
            fame: 0,
            mesos: 0,
            gender,
            skin,
            face,
            hair,
        }
    }

    fn bytes_value(v: &Value) -> Result<Vec<u8>> {
        match v {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(crate::error::Error::RowShape("expected byte/string column")),
        }
    }

    fn uint_value(v: &Value) -> Result<u64> {
        match v {
            Value::UInt(u) => Ok(*u),
            Value::Int(i) => Ok(*i as u64),
            _ => Err(crate::error::Error::RowShape("expected integer column")),
        }
    }

    fn optional_string(v: &Value) -> Option<String> {
        match v {
            Value::NULL => None,
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    fn optional_u8(v: &Value) -> Option<u8> {
        match v {
            Value::NULL => None,
            other => uint_value(other).ok().map(|u| u as u8),
        }
    }

    fn pic_value(pic: &Option<String>) -> Value {
        match pic {
            Some(s) => Value::Bytes(s.clone().into_bytes()),
            None => Value::NULL,
        }
    }

    fn gender_value(gender: Option<u8>) -> Value {
        match gender {
            Some(g) => Value::UInt(g as u64),
            None => Value::NULL,
        }
    }

    /// Character-list/scalar row order shared by both list queries and
    /// `GetCharacter`'s scalar fetch, up through the fields they share.
    fn summary_row(c: &CharacterRow) -> Row {
        vec![
            Value::UInt(c.id as u64),
            Value::Bytes(c.name.clone().into_bytes()),
            Value::UInt(c.job as u64),
            Value::UInt(c.level as u64),
            Value::Int(c.exp as i64),
            Value::Int(c.max_hp as i64),
            Value::Int(c.hp as i64),
            Value::Int(c.max_mp as i64),
            Value::Int(c.mp as i64),
            Value::Int(c.str_ as i64),
            Value::Int(c.dex as i64),
            Value::Int(c.int_ as i64),
            Value::Int(c.luk as i64),
            Value::Int(c.ap as i64),
            Value::Int(c.sp as i64),
            Value::Int(c.fame as i64),
            Value::UInt(c.gender as u64),
            Value::UInt(c.skin as u64),
            Value::UInt(c.face as u64),
            Value::UInt(c.hair as u64),
        ]
    }

    fn full_character_row(c: &CharacterRow) -> Row {
        vec![
            Value::Bytes(c.name.clone().into_bytes()),
            Value::UInt(c.map as u64),
            Value::UInt(c.spawn_point as u64),
            Value::UInt(c.job as u64),
            Value::UInt(c.level as u64),
            Value::Int(c.exp as i64),
            Value::Int(c.max_hp as i64),
            Value::Int(c.hp as i64),
            Value::Int(c.max_mp as i64),
            Value::Int(c.mp as i64),
            Value::Int(c.str_ as i64),
            Value::Int(c.dex as i64),
            Value::Int(c.int_ as i64),
            Value::Int(c.luk as i64),
            Value::Int(c.ap as i64),
            Value::Int(c.sp as i64),
            Value::Int(c.fame as i64),
            Value::UInt(c.gender as u64),
            Value::UInt(c.skin as u64),
            Value::UInt(c.face as u64),
            Value::UInt(c.hair as u64),
            Value::Int(c.mesos as i64),
            Value::UInt(24), // equip_slots
            Value::UInt(48), // use_slots
            Value::UInt(4),  // setup_slots
            Value::UInt(48), // etc_slots
        ]
    }

    /// In-memory backing store for [`MemoryDriver`].
    #[derive(Debug, Default)]
    pub struct MemoryDriver {
        accounts: Vec<AccountRow>,
        characters: Vec<CharacterRow>,
        next_account_id: u32,
        next_character_id: u32,
        current_sql: String,
        pending_rows: Vec<Row>,
    }

    impl MemoryDriver {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        fn account_by_name(&self, name: &str) -> Option<&AccountRow> {
            self.accounts.iter().find(|a| a.name == name)
        }

        fn character_by_id(&self, id: u32) -> Option<&CharacterRow> {
            self.characters.iter().find(|c| c.id == id)
        }

        fn dispatch(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
            if sql.starts_with("INSERT INTO accounts") {
                let name = String::from_utf8_lossy(&bytes_value(&params[0])?).into_owned();
                if self.account_by_name(&name).is_some() {
                    return Ok(0);
                }
                self.next_account_id += 1;
                let id = self.next_account_id;
                self.accounts.push(AccountRow {
                    id,
                    name,
                    hash: bytes_value(&params[1])?,
                    salt: uint_value(&params[2])?,
                    pic: None,
                    tos: 0,
                    gender: None,
                });
                Ok(id as u64)
            } else if sql.starts_with("SELECT id, hash, salt FROM accounts") {
                let name = String::from_utf8_lossy(&bytes_value(&params[0])?).into_owned();
                if let Some(account) = self.account_by_name(&name) {
                    self.pending_rows = vec![vec![
                        Value::UInt(account.id as u64),
                        Value::Bytes(account.hash.clone()),
                        Value::UInt(account.salt),
                    ]];
                } else {
                    self.pending_rows = Vec::new();
                }
                Ok(0)
            } else if sql.starts_with("SELECT pic, tos, gender FROM accounts") {
                let id = uint_value(&params[0])? as u32;
                self.pending_rows = self
                    .accounts
                    .iter()
                    .find(|a| a.id == id)
                    .map(|a| vec![vec![pic_value(&a.pic), Value::UInt(a.tos as u64), gender_value(a.gender)]])
                    .unwrap_or_default();
                Ok(0)
            } else if sql.starts_with("UPDATE accounts SET pic") {
                let id = uint_value(&params[3])? as u32;
                if let Some(account) = self.accounts.iter_mut().find(|a| a.id == id) {
                    account.pic = optional_string(&params[0]);
                    account.tos = uint_value(&params[1])? as u8;
                    account.gender = optional_u8(&params[2]);
                }
                Ok(0)
            } else if sql.starts_with("SELECT 1 FROM characters WHERE name") {
                let name = String::from_utf8_lossy(&bytes_value(&params[0])?).into_owned();
                self.pending_rows = if self.characters.iter().any(|c| c.name == name) {
                    vec![vec![Value::UInt(1)]]
                } else {
                    Vec::new()
                };
                Ok(0)
            } else if sql.starts_with("SELECT id, name, job, level") {
                let account_id = uint_value(&params[0])? as u32;
                let world = params.get(1).map(uint_value).transpose()?.map(|w| w as u8);
                self.pending_rows = self
                    .characters
                    .iter()
                    .filter(|c| c.account_id == account_id && world.map(|w| w == c.world).unwrap_or(true))
                    .map(summary_row)
                    .collect();
                Ok(0)
            } else if sql.starts_with("INSERT INTO characters") {
                let name = String::from_utf8_lossy(&bytes_value(&params[0])?).into_owned();
                self.next_character_id += 1;
                let id = self.next_character_id;
                let row = new_character(
                    id,
                    uint_value(&params[1])? as u32,
                    uint_value(&params[2])? as u8,
                    name,
                    uint_value(&params[3])? as u32,
                    uint_value(&params[4])? as u16,
                    uint_value(&params[5])? as u8,
                    uint_value(&params[6])? as u8,
                    uint_value(&params[7])? as u32,
                    uint_value(&params[8])? as u32,
                );
                self.characters.push(row);
                Ok(id as u64)
            } else if sql.starts_with("SELECT name, map, spawn_point") {
                let id = uint_value(&params[0])? as u32;
                self.pending_rows = self.character_by_id(id).map(|c| vec![full_character_row(c)]).unwrap_or_default();
                Ok(0)
            } else if sql.starts_with("UPDATE characters SET map") {
                let id = uint_value(&params[17])? as u32;
                if let Some(c) = self.characters.iter_mut().find(|c| c.id == id) {
                    c.map = uint_value(&params[0])? as u32;
                    c.spawn_point = uint_value(&params[1])? as u8;
                    c.job = uint_value(&params[2])? as u16;
                    c.level = uint_value(&params[3])? as u8;
                    c.exp = uint_value(&params[4])? as i32;
                    c.max_hp = uint_value(&params[5])? as i16;
                    c.hp = uint_value(&params[6])? as i16;
                    c.max_mp = uint_value(&params[7])? as i16;
                    c.mp = uint_value(&params[8])? as i16;
                    c.str_ = uint_value(&params[9])? as i16;
                    c.dex = uint_value(&params[10])? as i16;
                    c.int_ = uint_value(&params[11])? as i16;
                    c.luk = uint_value(&params[12])? as i16;
                    c.ap = uint_value(&params[13])? as i16;
                    c.sp = uint_value(&params[14])? as i16;
                    c.fame = uint_value(&params[15])? as i16;
                    c.mesos = uint_value(&params[16])? as i32;
                }
                Ok(0)
            } else if sql.starts_with("SELECT ") {
                // every other SELECT (equipment/inventory/quests/monster drops)
                // is out of this store's modeled schema; an empty result set
                // is a legitimate "character owns nothing yet" answer.
                self.pending_rows = Vec::new();
                Ok(0)
            } else {
                // every other INSERT/UPDATE/DELETE (item/equipment/quest
                // tables) is accepted without persisting row-level detail.
                Ok(0)
            }
        }
    }

    impl QueryDriver for MemoryDriver {
        fn socket_fd(&self) -> RawFd {
            -1
        }

        fn begin_prepare(&mut self, sql: &str) -> Result<PollStep<()>> {
            self.current_sql = sql.to_string();
            Ok(PollStep::Ready(()))
        }

        fn poll_prepare(&mut self, _status: i32) -> Result<PollStep<()>> {
            Ok(PollStep::Ready(()))
        }

        fn begin_bind_execute(&mut self, params: &[Value]) -> Result<PollStep<u64>> {
            let sql = std::mem::take(&mut self.current_sql);
            let generated = self.dispatch(&sql, params)?;
            self.current_sql = sql;
            Ok(PollStep::Ready(generated))
        }

        fn poll_bind_execute(&mut self, _status: i32) -> Result<PollStep<u64>> {
            Ok(PollStep::Ready(0))
        }

        fn begin_fetch(&mut self) -> Result<PollStep<Vec<Row>>> {
            Ok(PollStep::Ready(std::mem::take(&mut self.pending_rows)))
        }

        fn poll_fetch(&mut self, _status: i32) -> Result<PollStep<Vec<Row>>> {
            Ok(PollStep::Ready(Vec::new()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::request::{DatabaseRequest, DatabaseResult, RequestParams};

        #[test]
        fn create_and_authenticate_round_trips() {
            let mut req = DatabaseRequest::new(
                MemoryDriver::new(),
                RequestParams::TryCreateAccount { name: "hero".into(), hash: [1u8; 16], salt: 42 },
            );
            assert_eq!(req.execute(0).unwrap(), 0);
            let id = match req.result().unwrap() {
                DatabaseResult::TryCreateAccount { created, id } => {
                    assert!(created);
                    *id
                }
                other => panic!("unexpected {other:?}"),
            };

            let driver = req.into_driver();
            let mut req = DatabaseRequest::new(driver, RequestParams::GetAccountCredentials { name: "hero".into() });
            assert_eq!(req.execute(0).unwrap(), 0);
            match req.result().unwrap() {
                DatabaseResult::GetAccountCredentials { found, hash, id: found_id, .. } => {
                    assert!(found);
                    assert_eq!(*found_id, id);
                    assert_eq!(*hash, [1u8; 16]);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn duplicate_account_name_is_rejected() {
            let mut req = DatabaseRequest::new(
                MemoryDriver::new(),
                RequestParams::TryCreateAccount { name: "dup".into(), hash: [0u8; 16], salt: 1 },
            );
            req.execute(0).unwrap();
            let driver = req.into_driver();

            let mut req = DatabaseRequest::new(
                driver,
                RequestParams::TryCreateAccount { name: "dup".into(), hash: [0u8; 16], salt: 2 },
            );
            req.execute(0).unwrap();
            match req.result().unwrap() {
                DatabaseResult::TryCreateAccount { created, .. } => assert!(!created),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn character_created_then_listed_for_account() {
            let mut req = DatabaseRequest::new(
                MemoryDriver::new(),
                RequestParams::TryCreateCharacter {
                    name: "Swordsman".into(),
                    account_id: 1,
                    world: 0,
                    map: 10000,
                    job: 100,
                    gender: 0,
                    skin: 0,
                    hair: 30000,
                    face: 20000,
                    top: 1040002,
                    bottom: 1060002,
                    shoes: 1072001,
                    weapon: 1302000,
                },
            );
            req.execute(0).unwrap();
            let driver = req.into_driver();

            let mut req = DatabaseRequest::new(driver, RequestParams::GetCharactersForAccount { account_id: 1 });
            req.execute(0).unwrap();
            match req.result().unwrap() {
                DatabaseResult::CharacterList { characters } => {
                    assert_eq!(characters.len(), 1);
                    assert_eq!(characters[0].name, "Swordsman");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted [`QueryDriver`] for unit tests: every step completes
    /// immediately (`Ready`) unless its matching `delay_*` queue has a
    /// pending `WouldBlock` entry to return first.
    #[derive(Default)]
    pub(crate) struct MockDriver {
        pub prepared: Vec<String>,
        pub executed: Vec<Vec<Value>>,
        pub next_generated_id: VecDeque<u64>,
        pub next_rows: VecDeque<Vec<Row>>,
        pub stall_once: bool,
    }

    impl QueryDriver for MockDriver {
        fn socket_fd(&self) -> RawFd {
            -1
        }

        fn begin_prepare(&mut self, sql: &str) -> Result<PollStep<()>> {
            self.prepared.push(sql.to_string());
            if self.stall_once {
                self.stall_once = false;
                return Ok(PollStep::WouldBlock(WAIT_WRITABLE));
            }
            Ok(PollStep::Ready(()))
        }

        fn poll_prepare(&mut self, _status: i32) -> Result<PollStep<()>> {
            Ok(PollStep::Ready(()))
        }

        fn begin_bind_execute(&mut self, params: &[Value]) -> Result<PollStep<u64>> {
            self.executed.push(params.to_vec());
            Ok(PollStep::Ready(self.next_generated_id.pop_front().unwrap_or(0)))
        }

        fn poll_bind_execute(&mut self, _status: i32) -> Result<PollStep<u64>> {
            Ok(PollStep::Ready(self.next_generated_id.pop_front().unwrap_or(0)))
        }

        fn begin_fetch(&mut self) -> Result<PollStep<Vec<Row>>> {
            Ok(PollStep::Ready(self.next_rows.pop_front().unwrap_or_default()))
        }

        fn poll_fetch(&mut self, _status: i32) -> Result<PollStep<Vec<Row>>> {
            Ok(PollStep::Ready(self.next_rows.pop_front().unwrap_or_default()))
        }
    }
}
