//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use shiftboard::config::{BrokerConfig, DispatcherConfig};
use shiftboard::models::{CoverageRequirement, Event, Granularity, Role, Team, User};
use shiftboard::notifications::{Dispatcher, ShutdownMode};
use shiftboard::realtime::{LocalRelay, RealtimeBroker};
use shiftboard::scheduler::{NewShift, SchedulingEngine};
use shiftboard::storage::{Fixture, InMemoryStore, Store};
use shiftboard::Actor;

pub const EVENT_SLUG: &str = "lan-2025";

/// 2025-01-15 at `h:m` UTC
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
}

fn user(name: &str, role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role,
        is_active: true,
    }
}

/// Ids of the seeded rows
#[derive(Debug, Clone)]
pub struct Seed {
    pub event: Event,
    pub bar: Team,
    pub alice: User,
    pub bob: User,
    pub root: User,
    pub erin: User,
    pub reed: User,
}

impl Seed {
    pub fn new() -> Self {
        Self {
            event: Event {
                id: Uuid::new_v4(),
                name: "LAN 2025".to_string(),
                slug: EVENT_SLUG.to_string(),
                start: at(9, 0),
                end: at(23, 0),
                granularity: Granularity::Half,
                is_locked: false,
                is_public: true,
            },
            bar: Team {
                id: Uuid::new_v4(),
                name: "Bar".to_string(),
                abbreviation: "BAR".to_string(),
                color: "#3B82F6".to_string(),
                is_active: true,
            },
            alice: user("Alice", Role::User),
            bob: user("Bob", Role::User),
            root: user("Root", Role::SuperAdmin),
            erin: user("Erin", Role::User),
            reed: user("Reed", Role::ReadOnly),
        }
    }

    /// Event, team Bar with one person required 18:00-20:00, five users,
    /// Erin as event administrator
    pub fn fixture(&self) -> Fixture {
        Fixture {
            events: vec![self.event.clone()],
            teams: vec![self.bar.clone()],
            users: vec![
                self.alice.clone(),
                self.bob.clone(),
                self.root.clone(),
                self.erin.clone(),
                self.reed.clone(),
            ],
            event_admins: vec![shiftboard::storage::EventAdmin {
                event_id: self.event.id,
                user_id: self.erin.id,
            }],
            coverage: vec![CoverageRequirement {
                id: Uuid::new_v4(),
                event_id: self.event.id,
                team_id: self.bar.id,
                start: at(18, 0),
                end: at(20, 0),
                required: 1,
            }],
            ..Default::default()
        }
    }

    pub fn actor(user: &User) -> Actor {
        Actor::from(user)
    }

    pub fn bar_shift(&self, assignee: &User, start: DateTime<Utc>, end: DateTime<Utc>) -> NewShift {
        NewShift {
            team_id: self.bar.id,
            assignee_id: assignee.id,
            start,
            end,
        }
    }
}

/// Engine wired to an in-memory store, a local relay and a running dispatcher
pub struct Harness {
    pub seed: Seed,
    pub store: Arc<InMemoryStore>,
    pub engine: SchedulingEngine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_relay(LocalRelay::default()).await
    }

    pub async fn with_relay(relay: LocalRelay) -> Self {
        let seed = Seed::new();
        let store = Arc::new(InMemoryStore::from_fixture(seed.fixture()).await.unwrap());
        let dyn_store: Arc<dyn Store> = store.clone();

        let broker = RealtimeBroker::connect(&BrokerConfig::default(), Arc::new(relay))
            .await
            .unwrap();
        let dispatcher = Dispatcher::start(dyn_store.clone(), &DispatcherConfig::default()).unwrap();
        let engine = SchedulingEngine::new(dyn_store, broker, dispatcher);

        Self {
            seed,
            store,
            engine,
        }
    }

    pub fn broker(&self) -> &RealtimeBroker {
        self.engine.broker()
    }

    /// Wait for every queued fan-out job to finish
    pub async fn drain(&self) {
        self.engine.dispatcher().shutdown(ShutdownMode::Drain).await;
    }
}
