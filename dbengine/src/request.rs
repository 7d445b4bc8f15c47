//! The resumable request state machine (L): the `RequestParams`/
//! `DatabaseResult` tagged unions plus `execute(status)`, a numbered
//! program counter stepping a [`QueryDriver`] through each statement's
//! prepare/bind-execute/fetch suspension points (§4.5).
//!
//! `RequestParams`/`DatabaseResult` variant fields mirror `database.h`'s
//! union members directly; the variant-level comments below cover them.
#![allow(missing_docs)]

use std::collections::VecDeque;

use mysql_common::Value;

use crate::driver::{PollStep, QueryDriver, Row};
use crate::error::{Error, Result};
use crate::types::{
    character_scalar_params, CharacterRecord, CharacterSummary, DatabaseCompletedQuest,
    DatabaseEquipment, DatabaseItem, DatabaseProgress, ItemDrop, MesoDrop, MonsterDrops,
    SlottedEquipment, SlottedItem, ACCOUNT_HASH_LEN,
};

/// One statement in a request's program: SQL text plus bind parameters.
#[derive(Debug, Clone)]
struct Statement {
    sql: String,
    params: Vec<Value>,
    /// Whether this statement's result set matters (a SELECT) as opposed
    /// to only its generated id (an INSERT/UPDATE/DELETE).
    expect_rows: bool,
}

impl Statement {
    fn dml(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params, expect_rows: false }
    }

    fn query(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params, expect_rows: true }
    }
}

/// Builds `INSERT ... VALUES (?, ?), (?, ?), ...` for `rows` tuples of
/// `arity` placeholders each, the bulk-bind facility §4.5 requires for
/// batched inserts.
fn bulk_values_clause(arity: usize, rows: usize) -> String {
    let one = format!("({})", vec!["?"; arity].join(", "));
    vec![one; rows].join(", ")
}

/// The tagged parameter union covering every supported operation
/// (`original_source/src/database.h`'s `RequestParams`).
#[derive(Debug, Clone)]
pub enum RequestParams {
    /// create/read/update for account
    TryCreateAccount { name: String, hash: [u8; ACCOUNT_HASH_LEN], salt: u64 },
    GetAccountCredentials { name: String },
    GetAccount { id: u32 },
    UpdateAccount { id: u32, pic: Option<String>, tos: u8, gender: Option<u8> },
    /// character list per world
    GetCharactersForAccountForWorld { account_id: u32, world: u8 },
    GetCharactersForAccount { account_id: u32 },
    GetCharacterExists { name: String },
    TryCreateCharacter {
        name: String,
        account_id: u32,
        world: u8,
        map: u32,
        job: u16,
        gender: u8,
        skin: u8,
        hair: u32,
        face: u32,
        top: u32,
        bottom: u32,
        shoes: u32,
        weapon: u32,
    },
    /// character details
    GetCharacter { id: u32 },
    /// monster drops
    GetMonsterDrops { id: u32 },
    /// update character, the heaviest request (§4.5)
    UpdateCharacter { record: CharacterRecord },
}

/// The tagged result union matching `RequestParams` shape-for-shape
/// (`original_source/src/database.h`'s `DatabaseResult`).
#[derive(Debug, Clone)]
pub enum DatabaseResult {
    TryCreateAccount { created: bool, id: u32 },
    GetAccountCredentials { id: u32, hash: [u8; ACCOUNT_HASH_LEN], salt: u64, found: bool },
    GetAccount { pic: Option<String>, tos: u8, gender: Option<u8> },
    UpdateAccount,
    TryCreateCharacter { created: bool, id: u32 },
    GetCharacterExists { exists: bool },
    CharacterList { characters: Vec<CharacterSummary> },
    GetCharacter { record: CharacterRecord },
    GetMonsterDrops { monsters: Vec<MonsterDrops> },
    UpdateCharacter,
}

/// What the current statement is waiting on. Each variant names the step
/// already started; the next `execute` call resumes it with `poll_*`
/// rather than starting it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inflight {
    /// No step started yet for the statement at `cursor`; call `begin_prepare`.
    None,
    Preparing,
    Executing,
    Fetching,
}

/// Which inventory field a still-unsaved (`id == 0`) item lives in, used
/// by the `update_character` pipeline's one-at-a-time insert phase.
#[derive(Debug, Clone, Copy)]
enum NewItemSlot {
    Equipped(usize),
    EquipmentInventory(usize),
    InventoryItem(usize),
}

/// Phases of the `update_character` pipeline (§4.5), advanced strictly in
/// this order; each phase appends zero or more statements to the shared
/// program before the generic executor runs them.
#[derive(Debug, Clone)]
enum UpdateCharacterPhase {
    SoftDeleteOld,
    UpsertPresentItems,
    InsertNewItems(VecDeque<NewItemSlot>),
    UpsertEquipment,
    RebuildJoinTables,
    ApplyQuestTables,
    DeleteSoftDeleted,
    Done,
}

/// A resumable database request (L): constructed against a locked
/// connection's driver handle, then driven to completion by repeated
/// `execute(status)` calls exactly as `database_request_execute` is in
/// the original engine.
pub struct DatabaseRequest<D: QueryDriver> {
    driver: D,
    params: RequestParams,
    program: Vec<Statement>,
    cursor: usize,
    inflight: Inflight,
    generated_ids: Vec<u64>,
    fetched_rows: Vec<Vec<Row>>,
    character_pipeline: Option<(CharacterRecord, UpdateCharacterPhase)>,
    /// `(program index, slot)` pairs recorded while inserting brand-new
    /// items one at a time; drained once every queued insert has run, to
    /// back-fill `record` with the ids the driver generated for them.
    item_backfills: Vec<(usize, NewItemSlot)>,
    result: Option<DatabaseResult>,
}

impl<D: QueryDriver> std::fmt::Debug for DatabaseRequest<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRequest")
            .field("cursor", &self.cursor)
            .field("program_len", &self.program.len())
            .field("inflight", &self.inflight)
            .field("finished", &self.result.is_some())
            .finish()
    }
}

impl<D: QueryDriver> DatabaseRequest<D> {
    /// Creates a new request against `driver`, which the caller must have
    /// already obtained by locking the owning connection.
    pub fn new(driver: D, params: RequestParams) -> Self {
        let (program, character_pipeline) = build_initial_program(&params);
        Self {
            driver,
            params,
            program,
            cursor: 0,
            inflight: Inflight::None,
            generated_ids: Vec::new(),
            fetched_rows: Vec::new(),
            character_pipeline,
            item_backfills: Vec::new(),
            result: None,
        }
    }

    /// The step function. On the first call `status` is ignored. Returns
    /// 0 once finished, a positive readiness bitmask to wait for, or a
    /// negative MySQL error code.
    pub fn execute(&mut self, status: i32) -> Result<i32> {
        if self.result.is_some() {
            return Err(Error::AlreadyFinished);
        }
        loop {
            if self.cursor >= self.program.len() {
                if self.advance_pipeline()? {
                    continue;
                }
                self.result = Some(build_result(&self.params, &self.generated_ids, &self.fetched_rows)?);
                return Ok(0);
            }

            match self.inflight {
                Inflight::None => {
                    let sql = self.program[self.cursor].sql.clone();
                    match self.driver.begin_prepare(&sql)? {
                        PollStep::Ready(()) => {
                            if let Some(mask) = self.begin_bind_execute()? {
                                return Ok(mask);
                            }
                        }
                        PollStep::WouldBlock(mask) => {
                            self.inflight = Inflight::Preparing;
                            return Ok(mask);
                        }
                    }
                }
                Inflight::Preparing => match self.driver.poll_prepare(status)? {
                    PollStep::Ready(()) => {
                        if let Some(mask) = self.begin_bind_execute()? {
                            return Ok(mask);
                        }
                    }
                    PollStep::WouldBlock(mask) => return Ok(mask),
                },
                Inflight::Executing => match self.driver.poll_bind_execute(status)? {
                    PollStep::Ready(generated_id) => {
                        if let Some(mask) = self.after_bind_execute(generated_id)? {
                            return Ok(mask);
                        }
                    }
                    PollStep::WouldBlock(mask) => return Ok(mask),
                },
                Inflight::Fetching => match self.driver.poll_fetch(status)? {
                    PollStep::Ready(rows) => {
                        self.fetched_rows.push(rows);
                        self.finish_statement();
                    }
                    PollStep::WouldBlock(mask) => return Ok(mask),
                },
            }
        }
    }

    /// Reads the result. Caller must only call this once `execute`
    /// returned 0.
    pub fn result(&self) -> Option<&DatabaseResult> {
        self.result.as_ref()
    }

    /// Reclaims the driver handle once the request has finished, so the
    /// owning [`crate::connection::DatabaseConnection`] can hand it to
    /// the next request that locks it.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Starts binding and executing the current statement. `Some(mask)`
    /// means the caller should suspend; `None` means it completed
    /// synchronously and the outer loop should continue.
    fn begin_bind_execute(&mut self) -> Result<Option<i32>> {
        let params = self.program[self.cursor].params.clone();
        match self.driver.begin_bind_execute(&params)? {
            PollStep::Ready(generated_id) => self.after_bind_execute(generated_id),
            PollStep::WouldBlock(mask) => {
                self.inflight = Inflight::Executing;
                Ok(Some(mask))
            }
        }
    }

    /// Handles a completed bind+execute: either starts the fetch step (for
    /// a SELECT) or finishes the statement outright.
    fn after_bind_execute(&mut self, generated_id: u64) -> Result<Option<i32>> {
        self.generated_ids.push(generated_id);
        if self.program[self.cursor].expect_rows {
            match self.driver.begin_fetch()? {
                PollStep::Ready(rows) => {
                    self.fetched_rows.push(rows);
                    self.finish_statement();
                    Ok(None)
                }
                PollStep::WouldBlock(mask) => {
                    self.inflight = Inflight::Fetching;
                    Ok(Some(mask))
                }
            }
        } else {
            self.fetched_rows.push(Vec::new());
            self.finish_statement();
            Ok(None)
        }
    }

    fn finish_statement(&mut self) {
        self.cursor += 1;
        self.inflight = Inflight::None;
    }

    /// Expands the `update_character` pipeline's next phase into
    /// `self.program`, backfilling generated item ids as it goes.
    /// Returns `true` if more statements were appended (caller should
    /// keep looping), `false` once the whole pipeline is done.
    fn advance_pipeline(&mut self) -> Result<bool> {
        let Some((record, phase)) = self.character_pipeline.as_mut() else {
            return Ok(false);
        };
        match phase {
            UpdateCharacterPhase::SoftDeleteOld => {
                self.program.push(Statement::dml(
                    "UPDATE characters SET map = ?, spawn_point = ?, job = ?, level = ?, exp = ?, \
                     max_hp = ?, hp = ?, max_mp = ?, mp = ?, str = ?, dex = ?, int_ = ?, luk = ?, \
                     ap = ?, sp = ?, fame = ?, mesos = ? WHERE id = ?",
                    character_scalar_params(record),
                ));
                self.program.push(Statement::dml(
                    "UPDATE inventory_items SET deleted = 1 WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                self.program.push(Statement::dml(
                    "UPDATE equipment SET deleted = 1 WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                *phase = UpdateCharacterPhase::UpsertPresentItems;
                Ok(true)
            }
            UpdateCharacterPhase::UpsertPresentItems => {
                let present: Vec<&DatabaseItem> = record
                    .inventory_items
                    .iter()
                    .map(|slot| &slot.item)
                    .filter(|item| item.id != 0)
                    .collect();
                if !present.is_empty() {
                    let sql = format!(
                        "INSERT INTO items (id, item_id, owner, flags, expiration, giver) VALUES {} \
                         ON DUPLICATE KEY UPDATE item_id = VALUES(item_id), owner = VALUES(owner), \
                         flags = VALUES(flags), expiration = VALUES(expiration), giver = VALUES(giver)",
                        bulk_values_clause(6, present.len())
                    );
                    let mut params = Vec::with_capacity(present.len() * 6);
                    for item in present {
                        params.extend(item_bind_params(item));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                let queue = new_item_queue(record);
                *phase = UpdateCharacterPhase::InsertNewItems(queue);
                Ok(true)
            }
            UpdateCharacterPhase::InsertNewItems(queue) => {
                let Some(slot_ref) = queue.pop_front() else {
                    for (program_index, slot) in self.item_backfills.drain(..) {
                        let id = self.generated_ids[program_index];
                        backfill_new_item_id(record, slot, id);
                    }
                    *phase = UpdateCharacterPhase::UpsertEquipment;
                    return Ok(true);
                };
                let item = new_item_slot_item(record, slot_ref);
                self.program.push(Statement::dml(
                    "INSERT INTO items (item_id, owner, flags, expiration, giver) VALUES (?, ?, ?, ?, ?)",
                    vec![
                        Value::UInt(item.item_id as u64),
                        Value::Bytes(item.owner.clone().into_bytes()),
                        Value::UInt(item.flags as u64),
                        Value::Int(item.expiration),
                        Value::Bytes(item.giver.clone().into_bytes()),
                    ],
                ));
                self.item_backfills.push((self.program.len() - 1, slot_ref));
                Ok(true)
            }
            UpdateCharacterPhase::UpsertEquipment => {
                let mut rows: Vec<&DatabaseEquipment> = record.equipped_equipment.iter().collect();
                rows.extend(record.equipment_inventory.iter().map(|s| &s.equip));
                let rows: Vec<&DatabaseEquipment> = rows.into_iter().filter(|e| e.id != 0).collect();
                if !rows.is_empty() {
                    let sql = format!(
                        "INSERT INTO equipment (id, level, slots, str, dex, int_, luk, hp, mp, atk, \
                         matk, def, mdef, acc, avoid, hands, speed, jump) VALUES {} \
                         ON DUPLICATE KEY UPDATE level = VALUES(level), slots = VALUES(slots), \
                         str = VALUES(str), dex = VALUES(dex), int_ = VALUES(int_), luk = VALUES(luk), \
                         hp = VALUES(hp), mp = VALUES(mp), atk = VALUES(atk), matk = VALUES(matk), \
                         def = VALUES(def), mdef = VALUES(mdef), acc = VALUES(acc), avoid = VALUES(avoid), \
                         hands = VALUES(hands), speed = VALUES(speed), jump = VALUES(jump)",
                        bulk_values_clause(18, rows.len())
                    );
                    let mut params = Vec::with_capacity(rows.len() * 18);
                    for equip in rows {
                        params.extend(equipment_bind_params(equip));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                *phase = UpdateCharacterPhase::RebuildJoinTables;
                Ok(true)
            }
            UpdateCharacterPhase::RebuildJoinTables => {
                self.program.push(Statement::dml(
                    "DELETE FROM character_equipped WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.equipped_equipment.is_empty() {
                    let sql = format!(
                        "INSERT INTO character_equipped (character_id, slot, equipment_id) VALUES {}",
                        bulk_values_clause(3, record.equipped_equipment.len())
                    );
                    let mut params = Vec::with_capacity(record.equipped_equipment.len() * 3);
                    for (slot, equip) in record.equipped_equipment.iter().enumerate() {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(slot as u64));
                        params.push(Value::UInt(equip.id));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                self.program.push(Statement::dml(
                    "DELETE FROM inventory_equipment WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.equipment_inventory.is_empty() {
                    let sql = format!(
                        "INSERT INTO inventory_equipment (character_id, slot, equipment_id) VALUES {}",
                        bulk_values_clause(3, record.equipment_inventory.len())
                    );
                    let mut params = Vec::with_capacity(record.equipment_inventory.len() * 3);
                    for slotted in &record.equipment_inventory {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(slotted.slot as u64));
                        params.push(Value::UInt(slotted.equip.id));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                self.program.push(Statement::dml(
                    "DELETE FROM inventory_items WHERE character_id = ? AND deleted = 0",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.inventory_items.is_empty() {
                    let sql = format!(
                        "INSERT INTO inventory_items (character_id, slot, count, item_id) VALUES {}",
                        bulk_values_clause(4, record.inventory_items.len())
                    );
                    let mut params = Vec::with_capacity(record.inventory_items.len() * 4);
                    for slotted in &record.inventory_items {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(slotted.slot as u64));
                        params.push(Value::Int(slotted.count as i64));
                        params.push(Value::UInt(slotted.item.id));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                *phase = UpdateCharacterPhase::ApplyQuestTables;
                Ok(true)
            }
            UpdateCharacterPhase::ApplyQuestTables => {
                self.program.push(Statement::dml(
                    "DELETE FROM character_quests WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.quests.is_empty() {
                    let sql = format!(
                        "INSERT INTO character_quests (character_id, quest_id) VALUES {}",
                        bulk_values_clause(2, record.quests.len())
                    );
                    let mut params = Vec::with_capacity(record.quests.len() * 2);
                    for quest_id in &record.quests {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(*quest_id as u64));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                self.program.push(Statement::dml(
                    "DELETE FROM character_progress WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.progresses.is_empty() {
                    let sql = format!(
                        "INSERT INTO character_progress (character_id, quest_id, progress_id, progress) VALUES {}",
                        bulk_values_clause(4, record.progresses.len())
                    );
                    let mut params = Vec::with_capacity(record.progresses.len() * 4);
                    for progress in &record.progresses {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(progress.quest_id as u64));
                        params.push(Value::UInt(progress.progress_id as u64));
                        params.push(Value::Int(progress.progress as i64));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                self.program.push(Statement::dml(
                    "DELETE FROM character_completed_quests WHERE character_id = ?",
                    vec![Value::UInt(record.id as u64)],
                ));
                if !record.completed_quests.is_empty() {
                    let sql = format!(
                        "INSERT INTO character_completed_quests (character_id, quest_id, completed_at) VALUES {}",
                        bulk_values_clause(3, record.completed_quests.len())
                    );
                    let mut params = Vec::with_capacity(record.completed_quests.len() * 3);
                    for completed in &record.completed_quests {
                        params.push(Value::UInt(record.id as u64));
                        params.push(Value::UInt(completed.id as u64));
                        params.push(Value::Int(completed.completed_at));
                    }
                    self.program.push(Statement::dml(sql, params));
                }
                *phase = UpdateCharacterPhase::DeleteSoftDeleted;
                Ok(true)
            }
            UpdateCharacterPhase::DeleteSoftDeleted => {
                self.program.push(Statement::dml(
                    "DELETE FROM inventory_items WHERE character_id = ? AND deleted = 1",
                    vec![Value::UInt(record.id as u64)],
                ));
                self.program.push(Statement::dml(
                    "DELETE FROM equipment WHERE character_id = ? AND deleted = 1",
                    vec![Value::UInt(record.id as u64)],
                ));
                *phase = UpdateCharacterPhase::Done;
                Ok(true)
            }
            UpdateCharacterPhase::Done => Ok(false),
        }
    }
}

fn new_item_queue(record: &CharacterRecord) -> VecDeque<NewItemSlot> {
    let mut queue = VecDeque::new();
    for (i, equip) in record.equipped_equipment.iter().enumerate() {
        if equip.id == 0 {
            queue.push_back(NewItemSlot::Equipped(i));
        }
    }
    for (i, slotted) in record.equipment_inventory.iter().enumerate() {
        if slotted.equip.id == 0 {
            queue.push_back(NewItemSlot::EquipmentInventory(i));
        }
    }
    for (i, slotted) in record.inventory_items.iter().enumerate() {
        if slotted.item.id == 0 {
            queue.push_back(NewItemSlot::InventoryItem(i));
        }
    }
    queue
}

fn new_item_slot_item<'a>(record: &'a CharacterRecord, slot: NewItemSlot) -> &'a DatabaseItem {
    match slot {
        NewItemSlot::Equipped(i) => &record.equipped_equipment[i].item,
        NewItemSlot::EquipmentInventory(i) => &record.equipment_inventory[i].equip.item,
        NewItemSlot::InventoryItem(i) => &record.inventory_items[i].item,
    }
}

fn backfill_new_item_id(record: &mut CharacterRecord, slot: NewItemSlot, id: u64) {
    match slot {
        NewItemSlot::Equipped(i) => {
            record.equipped_equipment[i].item.id = id;
            record.equipped_equipment[i].id = id;
        }
        NewItemSlot::EquipmentInventory(i) => {
            record.equipment_inventory[i].equip.item.id = id;
            record.equipment_inventory[i].equip.id = id;
        }
        NewItemSlot::InventoryItem(i) => {
            record.inventory_items[i].item.id = id;
        }
    }
}

fn item_bind_params(item: &DatabaseItem) -> Vec<Value> {
    vec![
        Value::UInt(item.id),
        Value::UInt(item.item_id as u64),
        Value::Bytes(item.owner.clone().into_bytes()),
        Value::UInt(item.flags as u64),
        Value::Int(item.expiration),
        Value::Bytes(item.giver.clone().into_bytes()),
    ]
}

fn equipment_bind_params(equip: &DatabaseEquipment) -> Vec<Value> {
    vec![
        Value::UInt(equip.id),
        Value::Int(equip.level as i64),
        Value::Int(equip.slots as i64),
        Value::Int(equip.str_ as i64),
        Value::Int(equip.dex as i64),
        Value::Int(equip.int_ as i64),
        Value::Int(equip.luk as i64),
        Value::Int(equip.hp as i64),
        Value::Int(equip.mp as i64),
        Value::Int(equip.atk as i64),
        Value::Int(equip.matk as i64),
        Value::Int(equip.def as i64),
        Value::Int(equip.mdef as i64),
        Value::Int(equip.acc as i64),
        Value::Int(equip.avoid as i64),
        Value::Int(equip.hands as i64),
        Value::Int(equip.speed as i64),
        Value::Int(equip.jump as i64),
    ]
}

/// Builds the statically-known part of a request's program. For
/// `UpdateCharacter` this is empty; its statements are produced
/// phase-by-phase by [`DatabaseRequest::advance_pipeline`] instead, since
/// later phases depend on ids generated by earlier ones.
fn build_initial_program(params: &RequestParams) -> (Vec<Statement>, Option<(CharacterRecord, UpdateCharacterPhase)>) {
    match params {
        RequestParams::TryCreateAccount { name, hash, salt } => (
            vec![Statement::dml(
                "INSERT INTO accounts (name, hash, salt) VALUES (?, ?, ?)",
                vec![
                    Value::Bytes(name.clone().into_bytes()),
                    Value::Bytes(hash.to_vec()),
                    Value::UInt(*salt),
                ],
            )],
            None,
        ),
        RequestParams::GetAccountCredentials { name } => (
            vec![Statement::query(
                "SELECT id, hash, salt FROM accounts WHERE name = ?",
                vec![Value::Bytes(name.clone().into_bytes())],
            )],
            None,
        ),
        RequestParams::GetAccount { id } => (
            vec![Statement::query(
                "SELECT pic, tos, gender FROM accounts WHERE id = ?",
                vec![Value::UInt(*id as u64)],
            )],
            None,
        ),
        RequestParams::UpdateAccount { id, pic, tos, gender } => (
            vec![Statement::dml(
                "UPDATE accounts SET pic = ?, tos = ?, gender = ? WHERE id = ?",
                vec![
                    pic.clone().map(|p| Value::Bytes(p.into_bytes())).unwrap_or(Value::NULL),
                    Value::UInt(*tos as u64),
                    gender.map(|g| Value::UInt(g as u64)).unwrap_or(Value::NULL),
                    Value::UInt(*id as u64),
                ],
            )],
            None,
        ),
        RequestParams::GetCharactersForAccountForWorld { account_id, world } => (
            vec![Statement::query(
                "SELECT id, name, job, level, exp, max_hp, hp, max_mp, mp, str, dex, int_, luk, ap, \
                 sp, fame, gender, skin, face, hair FROM characters WHERE account_id = ? AND world = ?",
                vec![Value::UInt(*account_id as u64), Value::UInt(*world as u64)],
            )],
            None,
        ),
        RequestParams::GetCharactersForAccount { account_id } => (
            vec![Statement::query(
                "SELECT id, name, job, level, exp, max_hp, hp, max_mp, mp, str, dex, int_, luk, ap, \
                 sp, fame, gender, skin, face, hair FROM characters WHERE account_id = ?",
                vec![Value::UInt(*account_id as u64)],
            )],
            None,
        ),
        RequestParams::GetCharacterExists { name } => (
            vec![Statement::query(
                "SELECT 1 FROM characters WHERE name = ?",
                vec![Value::Bytes(name.clone().into_bytes())],
            )],
            None,
        ),
        RequestParams::TryCreateCharacter {
            name,
            account_id,
            world,
            map,
            job,
            gender,
            skin,
            hair,
            face,
            top,
            bottom,
            shoes,
            weapon,
        } => (
            vec![Statement::dml(
                "INSERT INTO characters (name, account_id, world, map, job, gender, skin, hair, \
                 face, top, bottom, shoes, weapon) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Bytes(name.clone().into_bytes()),
                    Value::UInt(*account_id as u64),
                    Value::UInt(*world as u64),
                    Value::UInt(*map as u64),
                    Value::UInt(*job as u64),
                    Value::UInt(*gender as u64),
                    Value::UInt(*skin as u64),
                    Value::UInt(*hair as u64),
                    Value::UInt(*face as u64),
                    Value::UInt(*top as u64),
                    Value::UInt(*bottom as u64),
                    Value::UInt(*shoes as u64),
                    Value::UInt(*weapon as u64),
                ],
            )],
            None,
        ),
        RequestParams::GetCharacter { id } => (
            vec![
                Statement::query(
                    "SELECT name, map, spawn_point, job, level, exp, max_hp, hp, max_mp, mp, \
                     str, dex, int_, luk, ap, sp, fame, gender, skin, face, hair, mesos, \
                     equip_slots, use_slots, setup_slots, etc_slots FROM characters WHERE id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT ce.slot, e.id, i.item_id, i.owner, i.flags, i.expiration, i.giver, \
                     e.level, e.slots, e.str, e.dex, e.int_, e.luk, e.hp, e.mp, e.atk, e.matk, \
                     e.def, e.mdef, e.acc, e.avoid, e.hands, e.speed, e.jump \
                     FROM character_equipped ce JOIN equipment e ON e.id = ce.equipment_id \
                     JOIN items i ON i.id = e.id WHERE ce.character_id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT ie.slot, e.id, i.item_id, i.owner, i.flags, i.expiration, i.giver, \
                     e.level, e.slots, e.str, e.dex, e.int_, e.luk, e.hp, e.mp, e.atk, e.matk, \
                     e.def, e.mdef, e.acc, e.avoid, e.hands, e.speed, e.jump \
                     FROM inventory_equipment ie JOIN equipment e ON e.id = ie.equipment_id \
                     JOIN items i ON i.id = e.id WHERE ie.character_id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT slot, count, id, item_id, owner, flags, expiration, giver \
                     FROM inventory_items WHERE character_id = ? AND deleted = 0",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT quest_id FROM character_quests WHERE character_id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT quest_id, progress_id, progress FROM character_progress \
                     WHERE character_id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
                Statement::query(
                    "SELECT quest_id, completed_at FROM character_completed_quests \
                     WHERE character_id = ?",
                    vec![Value::UInt(*id as u64)],
                ),
            ],
            None,
        ),
        RequestParams::GetMonsterDrops { id } => (
            vec![Statement::query(
                "SELECT item_id, chance FROM monster_item_drops WHERE monster_id = ?",
                vec![Value::UInt(*id as u64)],
            )],
            None,
        ),
        RequestParams::UpdateCharacter { record } => {
            (Vec::new(), Some((record.clone(), UpdateCharacterPhase::SoftDeleteOld)))
        }
    }
}

fn build_result(
    params: &RequestParams,
    generated_ids: &[u64],
    fetched_rows: &[Vec<Row>],
) -> Result<DatabaseResult> {
    match params {
        RequestParams::TryCreateAccount { .. } => {
            let id = generated_ids.first().copied().unwrap_or(0);
            Ok(DatabaseResult::TryCreateAccount { created: id != 0, id: id as u32 })
        }
        RequestParams::GetAccountCredentials { .. } => {
            let rows = fetched_rows.first().ok_or(Error::RowShape("missing credentials rows"))?;
            match rows.first() {
                None => Ok(DatabaseResult::GetAccountCredentials {
                    id: 0,
                    hash: [0u8; ACCOUNT_HASH_LEN],
                    salt: 0,
                    found: false,
                }),
                Some(row) => {
                    let id = value_as_u64(&row[0])? as u32;
                    let hash_bytes = value_as_bytes(&row[1])?;
                    let mut hash = [0u8; ACCOUNT_HASH_LEN];
                    let len = hash_bytes.len().min(ACCOUNT_HASH_LEN);
                    hash[..len].copy_from_slice(&hash_bytes[..len]);
                    let salt = value_as_u64(&row[2])?;
                    Ok(DatabaseResult::GetAccountCredentials { id, hash, salt, found: true })
                }
            }
        }
        RequestParams::GetAccount { .. } => {
            let rows = fetched_rows.first().ok_or(Error::RowShape("missing account rows"))?;
            let row = rows.first().ok_or(Error::RowShape("account not found"))?;
            let pic = match &row[0] {
                Value::NULL => None,
                v => Some(String::from_utf8_lossy(&value_as_bytes(v)?).into_owned()),
            };
            let tos = value_as_u64(&row[1])? as u8;
            let gender = match &row[2] {
                Value::NULL => None,
                v => Some(value_as_u64(v)? as u8),
            };
            Ok(DatabaseResult::GetAccount { pic, tos, gender })
        }
        RequestParams::UpdateAccount { .. } => Ok(DatabaseResult::UpdateAccount),
        RequestParams::GetCharactersForAccountForWorld { .. }
        | RequestParams::GetCharactersForAccount { .. } => {
            let rows = fetched_rows.first().ok_or(Error::RowShape("missing character rows"))?;
            let mut characters = Vec::with_capacity(rows.len());
            for row in rows {
                characters.push(character_summary_from_row(row)?);
            }
            Ok(DatabaseResult::CharacterList { characters })
        }
        RequestParams::GetCharacterExists { .. } => {
            let rows = fetched_rows.first().ok_or(Error::RowShape("missing exists rows"))?;
            Ok(DatabaseResult::GetCharacterExists { exists: !rows.is_empty() })
        }
        RequestParams::TryCreateCharacter { .. } => {
            let id = generated_ids.first().copied().unwrap_or(0);
            Ok(DatabaseResult::TryCreateCharacter { created: id != 0, id: id as u32 })
        }
        RequestParams::GetCharacter { id } => {
            Ok(DatabaseResult::GetCharacter { record: character_record_from_rows(*id, fetched_rows)? })
        }
        RequestParams::GetMonsterDrops { id } => {
            let rows = fetched_rows.first().ok_or(Error::RowShape("missing drop rows"))?;
            let mut item_drops = Vec::with_capacity(rows.len());
            for row in rows {
                item_drops.push(ItemDrop {
                    item_id: value_as_u64(&row[0])? as u32,
                    chance: value_as_u64(&row[1])? as i32,
                });
            }
            Ok(DatabaseResult::GetMonsterDrops {
                monsters: vec![MonsterDrops {
                    id: *id,
                    item_drops,
                    quest_item_drops: Vec::new(),
                    meso_drop: MesoDrop { min: 0, max: 0, chance: 0 },
                    multi_item_drops: Vec::new(),
                }],
            })
        }
        RequestParams::UpdateCharacter { .. } => Ok(DatabaseResult::UpdateCharacter),
    }
}

fn character_summary_from_row(row: &Row) -> Result<CharacterSummary> {
    if row.len() < 20 {
        return Err(Error::RowShape("character summary row too short"));
    }
    Ok(CharacterSummary {
        id: value_as_u64(&row[0])? as u32,
        name: String::from_utf8_lossy(&value_as_bytes(&row[1])?).into_owned(),
        job: value_as_u64(&row[2])? as u16,
        level: value_as_u64(&row[3])? as u8,
        exp: value_as_u64(&row[4])? as i32,
        max_hp: value_as_u64(&row[5])? as i16,
        hp: value_as_u64(&row[6])? as i16,
        max_mp: value_as_u64(&row[7])? as i16,
        mp: value_as_u64(&row[8])? as i16,
        str_: value_as_u64(&row[9])? as i16,
        dex: value_as_u64(&row[10])? as i16,
        int_: value_as_u64(&row[11])? as i16,
        luk: value_as_u64(&row[12])? as i16,
        ap: value_as_u64(&row[13])? as i16,
        sp: value_as_u64(&row[14])? as i16,
        fame: value_as_u64(&row[15])? as i16,
        gender: value_as_u64(&row[16])? as u8,
        skin: value_as_u64(&row[17])? as u8,
        face: value_as_u64(&row[18])? as u32,
        hair: value_as_u64(&row[19])? as u32,
        equipment: Vec::new(),
    })
}

/// Assembles a full [`CharacterRecord`] from `GetCharacter`'s seven fetched
/// row sets (scalar row, equipped equipment, inventory equipment, inventory
/// items, quests, progress, completed quests, in that order).
fn character_record_from_rows(id: u32, fetched_rows: &[Vec<Row>]) -> Result<CharacterRecord> {
    let scalar_rows = fetched_rows.first().ok_or(Error::RowShape("missing character row"))?;
    let row = scalar_rows.first().ok_or(Error::RowShape("character not found"))?;
    if row.len() < 26 {
        return Err(Error::RowShape("character row too short"));
    }
    let mut record = CharacterRecord {
        id,
        name: String::from_utf8_lossy(&value_as_bytes(&row[0])?).into_owned(),
        map: value_as_u64(&row[1])? as u32,
        spawn_point: value_as_u64(&row[2])? as u8,
        job: value_as_u64(&row[3])? as u16,
        level: value_as_u64(&row[4])? as u8,
        exp: value_as_u64(&row[5])? as i32,
        max_hp: value_as_u64(&row[6])? as i16,
        hp: value_as_u64(&row[7])? as i16,
        max_mp: value_as_u64(&row[8])? as i16,
        mp: value_as_u64(&row[9])? as i16,
        str_: value_as_u64(&row[10])? as i16,
        dex: value_as_u64(&row[11])? as i16,
        int_: value_as_u64(&row[12])? as i16,
        luk: value_as_u64(&row[13])? as i16,
        ap: value_as_u64(&row[14])? as i16,
        sp: value_as_u64(&row[15])? as i16,
        fame: value_as_u64(&row[16])? as i16,
        gender: value_as_u64(&row[17])? as u8,
        skin: value_as_u64(&row[18])? as u8,
        face: value_as_u64(&row[19])? as u32,
        hair: value_as_u64(&row[20])? as u32,
        mesos: value_as_u64(&row[21])? as i32,
        equip_slots: value_as_u64(&row[22])? as u8,
        use_slots: value_as_u64(&row[23])? as u8,
        setup_slots: value_as_u64(&row[24])? as u8,
        etc_slots: value_as_u64(&row[25])? as u8,
        equipped_equipment: Vec::new(),
        equipment_inventory: Vec::new(),
        inventory_items: Vec::new(),
        quests: Vec::new(),
        progresses: Vec::new(),
        completed_quests: Vec::new(),
    };

    let mut equipped = vec![empty_equipment(); record.equip_slots as usize];
    for row in fetched_rows.get(1).map(Vec::as_slice).unwrap_or(&[]) {
        let (slot, equip) = equipment_row(row)?;
        if let Some(entry) = equipped.get_mut(slot as usize) {
            *entry = equip;
        }
    }
    record.equipped_equipment = equipped;

    for row in fetched_rows.get(2).map(Vec::as_slice).unwrap_or(&[]) {
        let (slot, equip) = equipment_row(row)?;
        record.equipment_inventory.push(SlottedEquipment { slot, equip });
    }

    for row in fetched_rows.get(3).map(Vec::as_slice).unwrap_or(&[]) {
        record.inventory_items.push(inventory_item_row(row)?);
    }

    for row in fetched_rows.get(4).map(Vec::as_slice).unwrap_or(&[]) {
        record.quests.push(value_as_u64(&row[0])? as u16);
    }

    for row in fetched_rows.get(5).map(Vec::as_slice).unwrap_or(&[]) {
        record.progresses.push(progress_row(row)?);
    }

    for row in fetched_rows.get(6).map(Vec::as_slice).unwrap_or(&[]) {
        record.completed_quests.push(completed_quest_row(row)?);
    }

    Ok(record)
}

fn empty_equipment() -> DatabaseEquipment {
    DatabaseEquipment {
        id: 0,
        item: DatabaseItem { id: 0, item_id: 0, owner: String::new(), flags: 0, expiration: -1, giver: String::new() },
        level: 0,
        slots: 0,
        str_: 0,
        dex: 0,
        int_: 0,
        luk: 0,
        hp: 0,
        mp: 0,
        atk: 0,
        matk: 0,
        def: 0,
        mdef: 0,
        acc: 0,
        avoid: 0,
        hands: 0,
        speed: 0,
        jump: 0,
    }
}

/// Parses one equipped/inventory-equipment row: `(slot, id, item_id, owner,
/// flags, expiration, giver, level, slots, str, dex, int_, luk, hp, mp, atk,
/// matk, def, mdef, acc, avoid, hands, speed, jump)`.
fn equipment_row(row: &Row) -> Result<(u8, DatabaseEquipment)> {
    if row.len() < 24 {
        return Err(Error::RowShape("equipment row too short"));
    }
    let id = value_as_u64(&row[1])?;
    let equip = DatabaseEquipment {
        id,
        item: DatabaseItem {
            id,
            item_id: value_as_u64(&row[2])? as u32,
            owner: String::from_utf8_lossy(&value_as_bytes(&row[3])?).into_owned(),
            flags: value_as_u64(&row[4])? as u8,
            expiration: value_as_u64(&row[5])? as i64,
            giver: String::from_utf8_lossy(&value_as_bytes(&row[6])?).into_owned(),
        },
        level: value_as_u64(&row[7])? as i8,
        slots: value_as_u64(&row[8])? as i8,
        str_: value_as_u64(&row[9])? as i16,
        dex: value_as_u64(&row[10])? as i16,
        int_: value_as_u64(&row[11])? as i16,
        luk: value_as_u64(&row[12])? as i16,
        hp: value_as_u64(&row[13])? as i16,
        mp: value_as_u64(&row[14])? as i16,
        atk: value_as_u64(&row[15])? as i16,
        matk: value_as_u64(&row[16])? as i16,
        def: value_as_u64(&row[17])? as i16,
        mdef: value_as_u64(&row[18])? as i16,
        acc: value_as_u64(&row[19])? as i16,
        avoid: value_as_u64(&row[20])? as i16,
        hands: value_as_u64(&row[21])? as i16,
        speed: value_as_u64(&row[22])? as i16,
        jump: value_as_u64(&row[23])? as i16,
    };
    Ok((value_as_u64(&row[0])? as u8, equip))
}

fn inventory_item_row(row: &Row) -> Result<SlottedItem> {
    if row.len() < 8 {
        return Err(Error::RowShape("inventory item row too short"));
    }
    Ok(SlottedItem {
        slot: value_as_u64(&row[0])? as u8,
        count: value_as_u64(&row[1])? as i16,
        item: DatabaseItem {
            id: value_as_u64(&row[2])?,
            item_id: value_as_u64(&row[3])? as u32,
            owner: String::from_utf8_lossy(&value_as_bytes(&row[4])?).into_owned(),
            flags: value_as_u64(&row[5])? as u8,
            expiration: value_as_u64(&row[6])? as i64,
            giver: String::from_utf8_lossy(&value_as_bytes(&row[7])?).into_owned(),
        },
    })
}

fn progress_row(row: &Row) -> Result<DatabaseProgress> {
    if row.len() < 3 {
        return Err(Error::RowShape("progress row too short"));
    }
    Ok(DatabaseProgress {
        quest_id: value_as_u64(&row[0])? as u16,
        progress_id: value_as_u64(&row[1])? as u32,
        progress: value_as_u64(&row[2])? as i16,
    })
}

fn completed_quest_row(row: &Row) -> Result<DatabaseCompletedQuest> {
    if row.len() < 2 {
        return Err(Error::RowShape("completed quest row too short"));
    }
    Ok(DatabaseCompletedQuest {
        id: value_as_u64(&row[0])? as u16,
        completed_at: value_as_u64(&row[1])? as i64,
    })
}

fn value_as_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Int(i) => Ok(*i as u64),
        Value::UInt(u) => Ok(*u),
        _ => Err(Error::RowShape("expected integer column")),
    }
}

fn value_as_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        _ => Err(Error::RowShape("expected byte/string column")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::types::CharacterRecord;

    fn empty_character(id: u32) -> CharacterRecord {
        CharacterRecord {
            id,
            name: "Test".into(),
            map: 100000,
            spawn_point: 0,
            job: 0,
            level: 1,
            exp: 0,
            max_hp: 50,
            hp: 50,
            max_mp: 5,
            mp: 5,
            str_: 4,
            dex: 4,
            int_: 4,
            luk: 4,
            ap: 0,
            sp: 0,
            fame: 0,
            gender: 0,
            skin: 0,
            face: 20000,
            hair: 30000,
            mesos: 0,
            equip_slots: 24,
            use_slots: 24,
            setup_slots: 24,
            etc_slots: 24,
            equipped_equipment: Vec::new(),
            equipment_inventory: Vec::new(),
            inventory_items: Vec::new(),
            quests: Vec::new(),
            progresses: Vec::new(),
            completed_quests: Vec::new(),
        }
    }

    #[test]
    fn simple_request_runs_to_completion_without_suspending() {
        let mut req = DatabaseRequest::new(
            MockDriver::default(),
            RequestParams::GetAccount { id: 1 },
        );
        req.driver.next_rows.push_back(vec![vec![Value::NULL, Value::UInt(1), Value::NULL]]);
        assert_eq!(req.execute(0).unwrap(), 0);
        assert!(matches!(req.result(), Some(DatabaseResult::GetAccount { .. })));
    }

    #[test]
    fn suspension_resumes_with_status() {
        let mut req = DatabaseRequest::new(
            MockDriver::default(),
            RequestParams::TryCreateAccount { name: "a".into(), hash: [0u8; ACCOUNT_HASH_LEN], salt: 1 },
        );
        req.driver.stall_once = true;
        req.driver.next_generated_id.push_back(42);
        let first = req.execute(0).unwrap();
        assert!(first > 0);
        assert_eq!(req.execute(first).unwrap(), 0);
        assert!(matches!(
            req.result(),
            Some(DatabaseResult::TryCreateAccount { created: true, id: 42 })
        ));
    }

    #[test]
    fn update_character_pipeline_inserts_new_item_and_backfills_id() {
        let mut record = empty_character(7);
        record.inventory_items.push(SlottedItem {
            slot: 0,
            count: 1,
            item: DatabaseItem { id: 0, item_id: 2000000, owner: String::new(), flags: 0, expiration: -1, giver: String::new() },
        });
        let mut req = DatabaseRequest::new(
            MockDriver::default(),
            RequestParams::UpdateCharacter { record: record.clone() },
        );
        req.driver.next_generated_id.push_back(555);
        assert_eq!(req.execute(0).unwrap(), 0);
        assert!(matches!(req.result(), Some(DatabaseResult::UpdateCharacter)));
        assert!(req.driver.executed.iter().any(|params| params
            .iter()
            .any(|v| matches!(v, Value::UInt(id) if *id == 2000000))));
    }

    #[test]
    fn get_character_assembles_record_from_seven_row_sets() {
        let mut req = DatabaseRequest::new(MockDriver::default(), RequestParams::GetCharacter { id: 7 });
        let scalar_row = vec![
            Value::Bytes(b"Hero".to_vec()),
            Value::UInt(100000),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(30),
            Value::UInt(500),
            Value::UInt(800),
            Value::UInt(800),
            Value::UInt(200),
            Value::UInt(200),
            Value::UInt(13),
            Value::UInt(4),
            Value::UInt(4),
            Value::UInt(4),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(20000),
            Value::UInt(30000),
            Value::UInt(1000),
            Value::UInt(24),
            Value::UInt(24),
            Value::UInt(24),
            Value::UInt(24),
        ];
        req.driver.next_rows.push_back(vec![scalar_row]);
        req.driver.next_rows.push_back(Vec::new());
        req.driver.next_rows.push_back(Vec::new());
        req.driver.next_rows.push_back(vec![vec![
            Value::UInt(0),
            Value::Int(5),
            Value::UInt(9000),
            Value::UInt(2000000),
            Value::Bytes(Vec::new()),
            Value::UInt(0),
            Value::Int(-1),
            Value::Bytes(Vec::new()),
        ]]);
        req.driver.next_rows.push_back(Vec::new());
        req.driver.next_rows.push_back(Vec::new());
        req.driver.next_rows.push_back(Vec::new());

        assert_eq!(req.execute(0).unwrap(), 0);
        match req.result() {
            Some(DatabaseResult::GetCharacter { record }) => {
                assert_eq!(record.id, 7);
                assert_eq!(record.name, "Hero");
                assert_eq!(record.level, 30);
                assert_eq!(record.equipped_equipment.len(), 24);
                assert_eq!(record.inventory_items.len(), 1);
                assert_eq!(record.inventory_items[0].item.item_id, 2000000);
            }
            other => panic!("expected GetCharacter result, got {other:?}"),
        }
    }

    #[test]
    fn calling_execute_after_finished_errs() {
        let mut req = DatabaseRequest::new(MockDriver::default(), RequestParams::GetAccount { id: 1 });
        req.driver.next_rows.push_back(vec![vec![Value::NULL, Value::UInt(1), Value::NULL]]);
        req.execute(0).unwrap();
        assert!(matches!(req.execute(0), Err(Error::AlreadyFinished)));
    }
}
