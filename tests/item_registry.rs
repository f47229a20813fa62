//! Item registry behaviour: take/drop cycles, portability evidence,
//! disappearance, marker selection, and carry-limit discovery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use autofrotz::items::ItemRegistry;
use autofrotz::testing::MockLlm;
use autofrotz::world::{ItemLocation, Portability, PropertyValue};

fn delta(item_id: &str, change: &str) -> Value {
    json!({"item_id": item_id, "name": item_id, "change_type": change})
}

fn updates(entries: Vec<Value>) -> Value {
    json!({ "updates": entries })
}

fn new_registry(llm: &Arc<MockLlm>) -> ItemRegistry {
    ItemRegistry::new(llm.clone(), Duration::from_secs(1))
}

#[tokio::test]
async fn take_and_drop_cycle() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![
        json!({"item_id": "leaflet", "name": "leaflet", "change_type": "new", "location": "room_x"}),
    ]));
    items
        .update_from_game_output("There is a leaflet here.", "room_x", "look", 1)
        .await;
    let leaflet = items.get_item("leaflet").unwrap();
    assert_eq!(leaflet.location, ItemLocation::Room("room_x".to_string()));
    assert_eq!(leaflet.portable, Portability::Unknown);

    llm.queue_json(updates(vec![delta("leaflet", "taken")]));
    items
        .update_from_game_output("Taken.", "room_x", "take leaflet", 2)
        .await;
    let leaflet = items.get_item("leaflet").unwrap();
    assert_eq!(leaflet.location, ItemLocation::Inventory);
    assert_eq!(leaflet.portable, Portability::Portable);
    assert_eq!(items.inventory_count(), 1);

    // Moved to room_y, then dropped there.
    llm.queue_json(updates(vec![delta("leaflet", "dropped")]));
    items
        .update_from_game_output("Dropped.", "room_y", "drop leaflet", 3)
        .await;
    let in_room: Vec<&str> = items
        .get_items_in_room("room_y")
        .iter()
        .map(|i| i.item_id.as_str())
        .collect();
    assert_eq!(in_room, vec!["leaflet"]);
    // Portability evidence survives the drop.
    assert_eq!(items.get_item("leaflet").unwrap().portable, Portability::Portable);
}

#[tokio::test]
async fn no_items_mentioned_means_no_deltas() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    // Default mock response is the empty-object sentinel.
    let deltas = items
        .update_from_game_output("You are in a featureless room.", "room_x", "look", 1)
        .await;
    assert!(deltas.is_empty());
    assert!(items.get_all_items().is_empty());
}

#[tokio::test]
async fn stolen_item_becomes_unknown_not_removed() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![delta("jeweled egg", "taken")]));
    items
        .update_from_game_output("Taken.", "room_x", "take jeweled egg", 1)
        .await;
    llm.queue_json(updates(vec![delta("jeweled egg", "gone")]));
    items
        .update_from_game_output(
            "The thief snatches the jeweled egg and vanishes!",
            "room_x",
            "look",
            2,
        )
        .await;

    let egg = items.get_item("jeweled_egg").unwrap();
    assert_eq!(egg.location, ItemLocation::Unknown);
    // The take still counts as portability evidence.
    assert_eq!(egg.portable, Portability::Portable);
}

#[tokio::test]
async fn state_change_merges_properties() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![json!({
        "item_id": "brass lantern",
        "name": "brass lantern",
        "change_type": "taken",
        "properties": {"lit": false}
    })]));
    items
        .update_from_game_output("Taken.", "room_x", "take lantern", 1)
        .await;
    llm.queue_json(updates(vec![json!({
        "item_id": "brass lantern",
        "name": "brass lantern",
        "change_type": "state_change",
        "properties": {"lit": true}
    })]));
    items
        .update_from_game_output("The brass lantern is now on.", "room_x", "turn on lantern", 2)
        .await;

    let lantern = items.get_item("brass_lantern").unwrap();
    assert_eq!(lantern.properties.get("lit"), Some(&PropertyValue::Bool(true)));
    let lit = items.find_items_by_property("lit", &PropertyValue::Bool(true));
    assert_eq!(lit.len(), 1);
}

#[tokio::test]
async fn droppable_items_put_excluded_ids_last() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![
        delta("rope", "taken"),
        delta("key", "taken"),
        delta("lamp", "taken"),
    ]));
    items
        .update_from_game_output("Taken.", "room_x", "take all", 1)
        .await;

    let order: Vec<&str> = items
        .get_droppable_items(&["key".to_string()])
        .iter()
        .map(|i| i.item_id.as_str())
        .collect();
    assert_eq!(order, vec!["lamp", "rope", "key"]);
}

#[tokio::test]
async fn carry_limit_discovered_from_refusal() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![delta("sword", "taken"), delta("rope", "taken")]));
    items
        .update_from_game_output("Taken.", "room_x", "take all", 1)
        .await;
    assert_eq!(items.carry_limit(), None);

    items
        .update_from_game_output(
            "Your load is too heavy; you will have to drop something first.",
            "room_x",
            "take boulder",
            2,
        )
        .await;
    assert_eq!(items.carry_limit(), Some(2));
    assert!(items.is_carrying_max());
}

#[tokio::test]
async fn take_refusal_marks_item_fixed() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![json!({
        "item_id": "house", "name": "house", "change_type": "new", "location": "west_of_house"
    })]));
    items
        .update_from_game_output("A white house stands here.", "west_of_house", "look", 1)
        .await;

    items
        .update_from_game_output("That's hardly portable.", "west_of_house", "take house", 2)
        .await;
    assert_eq!(items.get_item("house").unwrap().portable, Portability::Fixed);

    // A definite state never degrades back to unknown, and an established
    // take is never overridden by a later refusal.
    llm.queue_json(updates(vec![delta("sword", "taken")]));
    items
        .update_from_game_output("Taken.", "room_x", "take sword", 3)
        .await;
    items
        .update_from_game_output("That's hardly portable.", "room_x", "take sword", 4)
        .await;
    assert_eq!(items.get_item("sword").unwrap().portable, Portability::Portable);
}

#[tokio::test]
async fn observation_turns_never_regress() {
    let llm = Arc::new(MockLlm::new());
    let mut items = new_registry(&llm);

    llm.queue_json(updates(vec![delta("coin", "taken")]));
    items.update_from_game_output("Taken.", "room_x", "take coin", 7).await;
    llm.queue_json(updates(vec![delta("coin", "state_change")]));
    items.update_from_game_output("The coin glints.", "room_x", "examine coin", 3).await;

    let coin = items.get_item("coin").unwrap();
    assert_eq!(coin.first_seen_turn, 7);
    assert_eq!(coin.last_seen_turn, 7);
}
