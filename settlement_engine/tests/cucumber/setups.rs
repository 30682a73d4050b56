use cucumber::given;

use crate::cucumber::{settlement_world::SettlementSystem, SettlementWorld};

#[given("a fresh settlement engine")]
async fn fresh_database(world: &mut SettlementWorld) {
    let system = SettlementSystem::new().await;
    world.system = Some(system);
}
