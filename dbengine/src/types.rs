//! Plain data shapes shared by request parameters and results (§4.5).
//!
//! These mirror the structs in `original_source/src/database.h` in spirit:
//! fixed-size C arrays become `Vec`/`String`, but field names and nesting
//! follow the original directly. Item/quest *content* carries no
//! game-logic interpretation here — these are opaque records the engine
//! moves between the wire and the database, nothing more.

// Field names mirror `database.h` directly and need no further
// documentation beyond that mapping.
#![allow(missing_docs)]

use mysql_common::Value;

/// Length of a stored password hash (`ACCOUNT_HASH_LEN` in `database.h`).
pub const ACCOUNT_HASH_LEN: usize = 16;

/// A stored inventory item, independent of which slot/equipment it sits in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseItem {
    /// Primary key; 0 for a not-yet-inserted item.
    pub id: u64,
    pub item_id: u32,
    pub owner: String,
    pub flags: u8,
    pub expiration: i64,
    pub giver: String,
}

/// A stored equipment instance: a [`DatabaseItem`] plus its stat rolls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEquipment {
    /// Primary key; 0 for a not-yet-inserted equipment row.
    pub id: u64,
    pub item: DatabaseItem,
    pub level: i8,
    pub slots: i8,
    pub str_: i16,
    pub dex: i16,
    pub int_: i16,
    pub luk: i16,
    pub hp: i16,
    pub mp: i16,
    pub atk: i16,
    pub matk: i16,
    pub def: i16,
    pub mdef: i16,
    pub acc: i16,
    pub avoid: i16,
    pub hands: i16,
    pub speed: i16,
    pub jump: i16,
}

/// An equipment row together with the inventory slot it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlottedEquipment {
    pub slot: u8,
    pub equip: DatabaseEquipment,
}

/// A stackable item row together with its inventory slot and stack count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlottedItem {
    pub slot: u8,
    pub count: i16,
    pub item: DatabaseItem,
}

/// One quest's numeric progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseProgress {
    pub quest_id: u16,
    pub progress_id: u32,
    pub progress: i16,
}

/// A quest completion record, carrying the timestamp it completed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseCompletedQuest {
    pub id: u16,
    /// Seconds since epoch; `MYSQL_TIME` is flattened rather than modeled.
    pub completed_at: i64,
}

/// Equipment worn in each equip slot (`equippedEquipment[EQUIP_SLOT_COUNT]`).
pub type EquippedEquipment = Vec<DatabaseEquipment>;

/// A monster's static item-drop table (`MonsterItemDrops`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDrop {
    pub item_id: u32,
    pub chance: i32,
}

/// A monster's quest-gated item-drop table (`MonsterQuestItemDrops`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestItemDrop {
    pub item_id: u32,
    pub quest_id: u16,
    pub chance: i32,
}

/// A monster's meso (currency) drop range (`MesoDrop`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MesoDrop {
    pub min: i32,
    pub max: i32,
    pub chance: i32,
}

/// A monster's multi-item drop table entry (`MultiItemDrop`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiItemDrop {
    pub id: u32,
    pub min: i32,
    pub max: i32,
    pub chance: i32,
}

/// One monster's complete drop table, as returned by
/// `DATABASE_REQUEST_TYPE_GET_MONSTER_DROPS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterDrops {
    pub id: u32,
    pub item_drops: Vec<ItemDrop>,
    pub quest_item_drops: Vec<QuestItemDrop>,
    pub meso_drop: MesoDrop,
    pub multi_item_drops: Vec<MultiItemDrop>,
}

/// The character-list row shape returned by
/// `getCharactersForAccountForWorld`/`getCharactersForAccount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSummary {
    pub id: u32,
    pub name: String,
    pub job: u16,
    pub level: u8,
    pub exp: i32,
    pub max_hp: i16,
    pub hp: i16,
    pub max_mp: i16,
    pub mp: i16,
    pub str_: i16,
    pub dex: i16,
    pub int_: i16,
    pub luk: i16,
    pub ap: i16,
    pub sp: i16,
    pub fame: i16,
    pub gender: u8,
    pub skin: u8,
    pub face: u32,
    pub hair: u32,
    /// One entry per equipped slot; 0 where nothing is equipped.
    pub equipment: Vec<u32>,
}

/// The full, mutable character record moved between the wire and the
/// database by `getCharacter`/`updateCharacter` (§4.5's "heaviest request").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRecord {
    pub id: u32,
    pub name: String,
    pub map: u32,
    pub spawn_point: u8,
    pub job: u16,
    pub level: u8,
    pub exp: i32,
    pub max_hp: i16,
    pub hp: i16,
    pub max_mp: i16,
    pub mp: i16,
    pub str_: i16,
    pub dex: i16,
    pub int_: i16,
    pub luk: i16,
    pub ap: i16,
    pub sp: i16,
    pub fame: i16,
    pub gender: u8,
    pub skin: u8,
    pub face: u32,
    pub hair: u32,
    pub mesos: i32,
    pub equip_slots: u8,
    pub use_slots: u8,
    pub setup_slots: u8,
    pub etc_slots: u8,
    pub equipped_equipment: EquippedEquipment,
    pub equipment_inventory: Vec<SlottedEquipment>,
    pub inventory_items: Vec<SlottedItem>,
    pub quests: Vec<u16>,
    pub progresses: Vec<DatabaseProgress>,
    pub completed_quests: Vec<DatabaseCompletedQuest>,
}

/// Converts a `CharacterRecord`'s scalar fields to bind parameters in the
/// field order the `update_character` statements expect. Collection
/// fields are bound per-row by the pipeline itself.
pub(crate) fn character_scalar_params(record: &CharacterRecord) -> Vec<Value> {
    vec![
        Value::UInt(record.map as u64),
        Value::Int(record.spawn_point as i64),
        Value::Int(record.job as i64),
        Value::Int(record.level as i64),
        Value::Int(record.exp as i64),
        Value::Int(record.max_hp as i64),
        Value::Int(record.hp as i64),
        Value::Int(record.max_mp as i64),
        Value::Int(record.mp as i64),
        Value::Int(record.str_ as i64),
        Value::Int(record.dex as i64),
        Value::Int(record.int_ as i64),
        Value::Int(record.luk as i64),
        Value::Int(record.ap as i64),
        Value::Int(record.sp as i64),
        Value::Int(record.fame as i64),
        Value::Int(record.mesos as i64),
        Value::UInt(record.id as u64),
    ]
}
