// Event subscription bookkeeping for bot scripts. Subscribe/unsubscribe are
// deferred through pending lists so a handler can change subscriptions while
// a delivery pass iterates the active list; `update()` reconciles between
// firings. Delivery itself lives in the game loop, which owns the VMs.

use bitflags::bitflags;

/// Script-visible events. The numbering is the stable wire/API order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    ShipSpawned = 0,
    ShipKilled = 1,
    MsgReceived = 2,
    PlayerJoined = 3,
    PlayerLeft = 4,
}

pub const EVENT_TYPE_COUNT: usize = 5;

pub const ALL_EVENTS: [EventType; EVENT_TYPE_COUNT] = [
    EventType::ShipSpawned,
    EventType::ShipKilled,
    EventType::MsgReceived,
    EventType::PlayerJoined,
    EventType::PlayerLeft,
];

impl EventType {
    pub fn from_i64(v: i64) -> Option<EventType> {
        ALL_EVENTS.get(usize::try_from(v).ok()?).copied()
    }

    /// Name of the script callback invoked for this event.
    pub fn callback_name(self) -> &'static str {
        match self {
            EventType::ShipSpawned => "onShipSpawned",
            EventType::ShipKilled => "onShipKilled",
            EventType::MsgReceived => "onMsgReceived",
            EventType::PlayerJoined => "onPlayerJoined",
            EventType::PlayerLeft => "onPlayerLeft",
        }
    }

    pub fn set_bit(self) -> EventSet {
        EventSet::from_bits_truncate(1 << (self as u32))
    }
}

bitflags! {
    /// Per-bot record of active subscriptions.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EventSet: u8 {
        const SHIP_SPAWNED  = 1 << 0;
        const SHIP_KILLED   = 1 << 1;
        const MSG_RECEIVED  = 1 << 2;
        const PLAYER_JOINED = 1 << 3;
        const PLAYER_LEFT   = 1 << 4;
    }
}

/// Multi-subscriber event registry keyed by bot interpreter handle (bot id).
#[derive(Default)]
pub struct EventManager {
    subscriptions: [Vec<u32>; EVENT_TYPE_COUNT],
    pending_subs: [Vec<u32>; EVENT_TYPE_COUNT],
    pending_unsubs: [Vec<u32>; EVENT_TYPE_COUNT],
    any_pending: bool,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscription. Subscribing twice is a silent no-op.
    pub fn subscribe(&mut self, handle: u32, evt: EventType) {
        let i = evt as usize;
        if self.is_subscribed(handle, evt) || self.pending_subs[i].contains(&handle) {
            return;
        }
        self.pending_unsubs[i].retain(|&h| h != handle);
        self.pending_subs[i].push(handle);
        self.any_pending = true;
    }

    /// Queue an unsubscription. Unsubscribing when not subscribed is a
    /// silent no-op.
    pub fn unsubscribe(&mut self, handle: u32, evt: EventType) {
        let i = evt as usize;
        if !self.is_subscribed(handle, evt) || self.pending_unsubs[i].contains(&handle) {
            return;
        }
        self.pending_subs[i].retain(|&h| h != handle);
        self.pending_unsubs[i].push(handle);
        self.any_pending = true;
    }

    /// Remove the handle from every list right now. Used when a bot dies so
    /// no further event can reach a freed interpreter.
    pub fn unsubscribe_immediate(&mut self, handle: u32, evt: EventType) {
        let i = evt as usize;
        self.subscriptions[i].retain(|&h| h != handle);
        self.pending_subs[i].retain(|&h| h != handle);
        self.pending_unsubs[i].retain(|&h| h != handle);
    }

    pub fn drop_handle(&mut self, handle: u32) {
        for evt in ALL_EVENTS {
            self.unsubscribe_immediate(handle, evt);
        }
    }

    pub fn is_subscribed(&self, handle: u32, evt: EventType) -> bool {
        self.subscriptions[evt as usize].contains(&handle)
    }

    /// Active subscribers in subscription order.
    pub fn subscribers(&self, evt: EventType) -> &[u32] {
        &self.subscriptions[evt as usize]
    }

    /// Apply pending changes: unsubscribes first, then appends.
    pub fn update(&mut self) {
        if !self.any_pending {
            return;
        }
        for i in 0..EVENT_TYPE_COUNT {
            for j in 0..self.pending_unsubs[i].len() {
                let h = self.pending_unsubs[i][j];
                self.subscriptions[i].retain(|&x| x != h);
            }
        }
        for i in 0..EVENT_TYPE_COUNT {
            let pending = std::mem::take(&mut self.pending_subs[i]);
            self.subscriptions[i].extend(pending);
            self.pending_unsubs[i].clear();
        }
        self.any_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_takes_effect_after_update() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::MsgReceived);
        assert!(em.subscribers(EventType::MsgReceived).is_empty());
        em.update();
        assert_eq!(em.subscribers(EventType::MsgReceived), &[1]);
    }

    #[test]
    fn test_subscribe_then_unsubscribe_same_tick_delivers_nothing() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::ShipKilled);
        // Not yet active, so the unsubscribe just cancels the pending sub.
        em.unsubscribe(1, EventType::ShipKilled);
        em.update();
        assert!(em.subscribers(EventType::ShipKilled).is_empty());
    }

    #[test]
    fn test_unsubscribe_applies_before_subscribe() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::ShipSpawned);
        em.update();
        em.unsubscribe(1, EventType::ShipSpawned);
        em.subscribe(1, EventType::ShipSpawned);
        em.update();
        // Re-subscribed in the same batch: unsubscribe runs first, then the
        // append, leaving exactly one registration.
        assert_eq!(em.subscribers(EventType::ShipSpawned), &[1]);
    }

    #[test]
    fn test_double_subscribe_is_noop() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::MsgReceived);
        em.subscribe(1, EventType::MsgReceived);
        em.update();
        em.subscribe(1, EventType::MsgReceived);
        em.update();
        assert_eq!(em.subscribers(EventType::MsgReceived), &[1]);
    }

    #[test]
    fn test_unsubscribe_when_not_subscribed_is_noop() {
        let mut em = EventManager::new();
        em.unsubscribe(9, EventType::PlayerLeft);
        em.update();
        assert!(em.subscribers(EventType::PlayerLeft).is_empty());
    }

    #[test]
    fn test_unsubscribe_immediate_bypasses_pending() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::MsgReceived);
        em.update();
        assert_eq!(em.subscribers(EventType::MsgReceived), &[1]);
        em.unsubscribe_immediate(1, EventType::MsgReceived);
        assert!(em.subscribers(EventType::MsgReceived).is_empty());
        // Also purges a pending re-subscription.
        em.subscribe(2, EventType::MsgReceived);
        em.unsubscribe_immediate(2, EventType::MsgReceived);
        em.update();
        assert!(em.subscribers(EventType::MsgReceived).is_empty());
    }

    #[test]
    fn test_delivery_order_is_subscription_order() {
        let mut em = EventManager::new();
        em.subscribe(5, EventType::MsgReceived);
        em.subscribe(2, EventType::MsgReceived);
        em.subscribe(9, EventType::MsgReceived);
        em.update();
        assert_eq!(em.subscribers(EventType::MsgReceived), &[5, 2, 9]);
    }

    #[test]
    fn test_drop_handle_clears_everything() {
        let mut em = EventManager::new();
        em.subscribe(1, EventType::MsgReceived);
        em.subscribe(1, EventType::ShipKilled);
        em.update();
        em.subscribe(1, EventType::PlayerJoined);
        em.drop_handle(1);
        em.update();
        for evt in ALL_EVENTS {
            assert!(em.subscribers(evt).is_empty());
        }
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(EventType::from_i64(2), Some(EventType::MsgReceived));
        assert_eq!(EventType::from_i64(5), None);
        assert_eq!(EventType::from_i64(-1), None);
        assert_eq!(EventType::MsgReceived.callback_name(), "onMsgReceived");
        assert_eq!(EventType::ShipSpawned.set_bit(), EventSet::SHIP_SPAWNED);
    }
}
