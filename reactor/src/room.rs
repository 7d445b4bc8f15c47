//! Room (F) and the process-wide room map (G).
//!
//! A `Room` is owned outright by the worker whose set contains it; the
//! process-wide [`RoomMap`] only records *which worker* currently owns a
//! room id, so other workers can find where to send a hand-off command
//! without ever touching the room's contents directly.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Mutex,
};

use crate::timer::TimerId;

/// A room identifier. Opaque beyond equality/hashing at this layer; the
/// application assigns meaning to specific values (e.g. a map id).
pub type RoomId = u32;

/// One room: a set of sessions sharing a logical map, plus its live timers.
#[derive(Debug, Default)]
pub struct Room {
    id: RoomId,
    sessions: HashSet<SocketAddr>,
    timers: Vec<TimerId>,
}

impl Room {
    /// Creates an empty room with the given id.
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            sessions: HashSet::new(),
            timers: Vec::new(),
        }
    }

    /// This room's id.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Adds `addr` to this room's session set.
    pub fn insert(&mut self, addr: SocketAddr) {
        self.sessions.insert(addr);
    }

    /// Removes `addr` from this room's session set.
    pub fn remove(&mut self, addr: SocketAddr) {
        self.sessions.remove(&addr);
    }

    /// Every session address currently in this room.
    pub fn sessions(&self) -> impl Iterator<Item = &SocketAddr> {
        self.sessions.iter()
    }

    /// Number of sessions currently in this room.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Records a live timer belonging to this room.
    pub fn track_timer(&mut self, id: TimerId, keep_alive: bool) {
        if keep_alive {
            self.timers.push(id);
        }
    }

    /// A room is kept alive at end-of-tick if it has sessions, or at least
    /// one keep-alive timer still tracked.
    pub fn should_persist(&self) -> bool {
        !self.sessions.is_empty() || !self.timers.is_empty()
    }

    /// Stops tracking `id` (called once it fires or is explicitly canceled).
    pub fn untrack_timer(&mut self, id: TimerId) {
        self.timers.retain(|t| *t != id);
    }
}

/// Which worker owns a room, and which room a session is currently assigned
/// to — the two process-wide maps named in §3/§4.3, each behind its own
/// mutex, held only during mutation, never simultaneously with each other
/// or any other lock.
#[derive(Debug, Default)]
pub struct GlobalTopology {
    room_owner: Mutex<HashMap<RoomId, usize>>,
    session_room: Mutex<HashMap<SocketAddr, RoomId>>,
}

impl GlobalTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the worker index owning `room`, creating the mapping in
    /// favor of `default_worker` if this is the first time the room has
    /// been referenced ("first-come creates the mapping").
    pub fn owner_or_insert(&self, room: RoomId, default_worker: usize) -> usize {
        let mut map = self.room_owner.lock().unwrap();
        *map.entry(room).or_insert(default_worker)
    }

    /// The worker index owning `room`, if the room currently exists.
    pub fn owner(&self, room: RoomId) -> Option<usize> {
        self.room_owner.lock().unwrap().get(&room).copied()
    }

    /// Removes a room's ownership entry, called when a room is destroyed.
    pub fn remove_room(&self, room: RoomId) {
        self.room_owner.lock().unwrap().remove(&room);
    }

    /// Records that `addr` is now in `room`.
    pub fn set_session_room(&self, addr: SocketAddr, room: RoomId) {
        self.session_room.lock().unwrap().insert(addr, room);
    }

    /// The room currently recorded for `addr`, if any.
    pub fn session_room(&self, addr: SocketAddr) -> Option<RoomId> {
        self.session_room.lock().unwrap().get(&addr).copied()
    }

    /// Drops all record of `addr` (session destroyed).
    pub fn remove_session(&self, addr: SocketAddr) {
        self.session_room.lock().unwrap().remove(&addr);
    }

    /// Verifies the room-affinity invariant: the room a session believes it
    /// is in is owned by exactly the worker the session itself asserts.
    /// Exposed for tests; production code never needs to ask this since
    /// affinity is maintained by construction.
    pub fn affinity_holds(&self, addr: SocketAddr, worker: usize) -> bool {
        match self.session_room(addr) {
            Some(room) => self.owner(room) == Some(worker),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_persists_while_occupied_or_keep_alive() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut room = Room::new(1);
        assert!(!room.should_persist());
        room.insert(addr);
        assert!(room.should_persist());
        room.remove(addr);
        assert!(!room.should_persist());

        room.track_timer(TimerId::for_test(7), true);
        assert!(room.should_persist());
    }

    #[test]
    fn first_come_assigns_owner() {
        let topo = GlobalTopology::new();
        assert_eq!(topo.owner_or_insert(10_000, 3), 3);
        assert_eq!(topo.owner_or_insert(10_000, 99), 3);
    }

    #[test]
    fn affinity_tracks_worker_assignment() {
        let topo = GlobalTopology::new();
        let addr: SocketAddr = "127.0.0.1:2".parse().unwrap();
        topo.owner_or_insert(5, 2);
        topo.set_session_room(addr, 5);
        assert!(topo.affinity_holds(addr, 2));
        assert!(!topo.affinity_holds(addr, 0));
    }
}
