//! Item registry.
//!
//! Tracks every world object the parser has ever mentioned: location
//! (room / inventory / unknown), portability evidence, and an open
//! property bag. The parser never invents items; when output mentions
//! none, the delta list is empty.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::error::JournalResult;
use crate::journal::Journal;
use crate::llm::{ChatMessage, ChatRequest, Completion, LlmClient};
use crate::world::{
    normalize_id, CallMetric, Item, ItemChange, ItemLocation, ItemUpdate, Portability,
};

const ITEM_PARSER_PROMPT: &str = "You parse text adventure game output for item changes. \
Report each item explicitly mentioned with a change type: new (first sighting), taken, \
dropped, state_change, moved, or gone (stolen, consumed, destroyed). Include properties \
such as lit, open, locked, or alive when the text states them. Only report items the \
text mentions; return an empty list otherwise.";

/// Output phrases that reveal the carry limit after a failed take.
const CARRY_REFUSALS: &[&str] = &[
    "too heavy",
    "can't carry",
    "cannot carry",
    "carrying too much",
    "your load is too heavy",
    "hands are full",
];

/// Output phrases that are evidence an item cannot be taken at all.
const TAKE_REFUSALS: &[&str] = &[
    "hardly portable",
    "fixed in place",
    "securely anchored",
    "it is firmly attached",
    "you can't be serious",
];

fn is_take_command(command: &str) -> bool {
    let lowered = command.trim().to_lowercase();
    lowered.starts_with("take ")
        || lowered.starts_with("get ")
        || lowered.starts_with("pick up ")
        || lowered.starts_with("grab ")
}

/// Registry of all known items, keyed by normalized id.
pub struct ItemRegistry {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    items: HashMap<String, Item>,
    carry_limit: Option<usize>,
    dirty: HashSet<String>,
    last_metric: Option<CallMetric>,
}

impl ItemRegistry {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration) -> Self {
        Self {
            llm,
            llm_timeout,
            items: HashMap::new(),
            carry_limit: None,
            dirty: HashSet::new(),
            last_metric: None,
        }
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parse game output for item changes and apply them.
    ///
    /// Parser timeouts and failures are non-fatal: the turn proceeds with
    /// an empty delta list and a warning.
    pub async fn update_from_game_output(
        &mut self,
        output_text: &str,
        current_room: &str,
        command: &str,
        turn: u32,
    ) -> Vec<ItemUpdate> {
        // Carry-limit discovery does not need the model.
        if is_take_command(command) {
            let lowered = output_text.to_lowercase();
            if CARRY_REFUSALS.iter().any(|p| lowered.contains(p)) && self.carry_limit.is_none() {
                let limit = self.inventory_count();
                self.carry_limit = Some(limit);
                tracing::info!(limit, "discovered carry limit");
            }
            if TAKE_REFUSALS.iter().any(|p| lowered.contains(p)) {
                self.note_take_refusal(command, turn);
            }
        }

        let schema = json!({
            "type": "object",
            "properties": {
                "updates": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "item_id": {"type": "string"},
                            "name": {"type": "string"},
                            "change_type": {
                                "type": "string",
                                "enum": ["new", "taken", "dropped", "state_change", "moved", "gone"]
                            },
                            "location": {"type": ["string", "null"]},
                            "properties": {"type": ["object", "null"]}
                        },
                        "required": ["item_id", "name", "change_type"]
                    }
                }
            },
            "required": ["updates"]
        });
        let request = ChatRequest::new(ITEM_PARSER_PROMPT)
            .with_message(ChatMessage::user(format!(
                "Game output:\n{output_text}\n\nCurrent room: {current_room}\nCommand used: {command}\n\nExtract all item changes from this output."
            )))
            .with_temperature(0.1)
            .with_max_tokens(512);

        let parsed = match timeout(self.llm_timeout, self.llm.complete_json(request, &schema)).await
        {
            Ok(Ok((value, completion))) => {
                self.record_metric(&completion, turn);
                value
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "item parser call failed, proceeding with empty delta");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.llm_timeout.as_millis() as u64,
                    "item parser call timed out, proceeding with empty delta"
                );
                return Vec::new();
            }
        };

        let raw = parsed.get("updates").cloned().unwrap_or(Value::Array(Vec::new()));
        let mut updates: Vec<ItemUpdate> = match serde_json::from_value(raw) {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(%err, "item parser returned malformed updates, discarding");
                return Vec::new();
            }
        };
        for update in updates.iter_mut() {
            update.item_id = normalize_id(&update.item_id);
            self.apply_update(update, current_room, turn);
        }
        tracing::debug!(count = updates.len(), "parsed item updates");
        updates
    }

    /// Apply one structured delta to the registry.
    fn apply_update(&mut self, update: &ItemUpdate, current_room: &str, turn: u32) {
        let item = self
            .items
            .entry(update.item_id.clone())
            .or_insert_with(|| {
                tracing::info!(item_id = %update.item_id, name = %update.name, "registered new item");
                Item::new(update.item_id.clone(), update.name.clone(), turn)
            });
        // Observation timestamps never regress.
        item.last_seen_turn = item.last_seen_turn.max(turn);

        match update.change_type {
            ItemChange::New => {
                if let Some(location) = &update.location {
                    item.location = location.clone().into();
                } else if item.location == ItemLocation::Unknown {
                    item.location = ItemLocation::Room(current_room.to_string());
                }
            }
            ItemChange::Taken => {
                item.location = ItemLocation::Inventory;
                // A successful take is evidence of portability.
                item.portable = Portability::Portable;
            }
            ItemChange::Dropped => {
                item.location = match &update.location {
                    Some(location) => location.clone().into(),
                    None => ItemLocation::Room(current_room.to_string()),
                };
            }
            ItemChange::StateChange => {}
            ItemChange::Moved => {
                if let Some(location) = &update.location {
                    item.location = location.clone().into();
                }
            }
            ItemChange::Gone => {
                // Never silently removed; the item may resurface.
                item.location = ItemLocation::Unknown;
            }
        }

        if let Some(properties) = &update.properties {
            for (key, value) in properties {
                item.properties.insert(key.clone(), value.clone());
            }
        }
        if !update.name.is_empty() && update.name != item.name {
            item.name = update.name.clone();
        }
        self.dirty.insert(update.item_id.clone());
    }

    /// Record a "hardly portable"-style refusal against the item the
    /// command targeted.
    fn note_take_refusal(&mut self, command: &str, turn: u32) {
        let lowered = command.trim().to_lowercase();
        let target = lowered
            .strip_prefix("pick up ")
            .or_else(|| lowered.strip_prefix("take "))
            .or_else(|| lowered.strip_prefix("get "))
            .or_else(|| lowered.strip_prefix("grab "))
            .map(normalize_id);
        if let Some(item_id) = target {
            if let Some(item) = self.items.get_mut(&item_id) {
                // Refusal is evidence for fixed, but never overrides a
                // previously observed successful take.
                if item.portable != Portability::Portable {
                    item.portable = Portability::Fixed;
                    item.last_seen_turn = item.last_seen_turn.max(turn);
                    self.dirty.insert(item_id.clone());
                    tracing::debug!(item_id = %item_id, "item marked as not portable");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Direct mutations
    // ------------------------------------------------------------------

    /// Move an item to inventory; a successful take proves portability.
    pub fn take_item(&mut self, item_id: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.location = ItemLocation::Inventory;
            item.portable = Portability::Portable;
            self.dirty.insert(item_id.to_string());
        } else {
            tracing::warn!(item_id, "attempted to take unknown item");
        }
    }

    /// Re-point an item at a room whose id changed (maze reassignment).
    pub fn relocate(&mut self, item_id: &str, room_id: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.location = ItemLocation::Room(room_id.to_string());
            self.dirty.insert(item_id.to_string());
        }
    }

    /// Move an item from inventory to a room.
    pub fn drop_item(&mut self, item_id: &str, room_id: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.location = ItemLocation::Room(room_id.to_string());
            self.dirty.insert(item_id.to_string());
        } else {
            tracing::warn!(item_id, "attempted to drop unknown item");
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_item(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id)
    }

    pub fn get_all_items(&self) -> Vec<&Item> {
        self.items.values().collect()
    }

    /// Items currently carried.
    pub fn get_inventory(&self) -> Vec<&Item> {
        let mut inventory: Vec<&Item> = self
            .items
            .values()
            .filter(|i| i.location == ItemLocation::Inventory)
            .collect();
        inventory.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        inventory
    }

    /// Items located in a specific room.
    pub fn get_items_in_room(&self, room_id: &str) -> Vec<&Item> {
        let mut found: Vec<&Item> = self
            .items
            .values()
            .filter(|i| matches!(&i.location, ItemLocation::Room(r) if r == room_id))
            .collect();
        found.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        found
    }

    /// Items whose property bag has the given key/value.
    pub fn find_items_by_property(&self, key: &str, value: &crate::world::PropertyValue) -> Vec<&Item> {
        self.items
            .values()
            .filter(|i| i.properties.get(key) == Some(value))
            .collect()
    }

    /// Portable inventory items suitable for dropping as maze markers.
    ///
    /// Items whose id appears in `exclude` (typically the ids related to
    /// open puzzles) sort last so quest-critical objects are sacrificed
    /// only when nothing else is left.
    pub fn get_droppable_items(&self, exclude: &[String]) -> Vec<&Item> {
        let mut droppable: Vec<&Item> = self
            .items
            .values()
            .filter(|i| i.location == ItemLocation::Inventory && i.portable.is_portable())
            .collect();
        droppable.sort_by_key(|i| (exclude.contains(&i.item_id), i.item_id.clone()));
        droppable
    }

    pub fn inventory_count(&self) -> usize {
        self.items
            .values()
            .filter(|i| i.location == ItemLocation::Inventory)
            .count()
    }

    /// The empirically discovered carry limit, if any refusal has been seen.
    pub fn carry_limit(&self) -> Option<usize> {
        self.carry_limit
    }

    pub fn is_carrying_max(&self) -> bool {
        match self.carry_limit {
            Some(limit) => self.inventory_count() >= limit,
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Persistence plumbing
    // ------------------------------------------------------------------

    fn record_metric(&mut self, completion: &Completion, turn: u32) {
        self.last_metric = Some(CallMetric {
            game_id: 0,
            turn_number: turn,
            agent_name: "item_parser".to_string(),
            provider: self.llm.provider_name().to_string(),
            model: self.llm.model().to_string(),
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cached_tokens: completion.usage.cached_tokens,
            cost_estimate: completion.cost_estimate,
            latency_ms: completion.latency_ms,
        });
    }

    /// Metrics from the most recent parser call, if any.
    pub fn take_last_metric(&mut self) -> Option<CallMetric> {
        self.last_metric.take()
    }

    /// Drain items touched since the last drain, for batch commit.
    pub fn take_dirty(&mut self) -> Vec<Item> {
        self.dirty
            .drain()
            .filter_map(|id| self.items.get(&id).cloned())
            .collect()
    }

    /// Rebuild registry state from the journal during crash resume.
    pub fn load_from_journal(&mut self, journal: &Journal, game_id: i64) -> JournalResult<()> {
        for item in journal.get_items(game_id)? {
            self.items.insert(item.item_id.clone(), item);
        }
        tracing::info!(items = self.items.len(), "item state loaded from journal");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_take_command() {
        assert!(is_take_command("take lamp"));
        assert!(is_take_command("pick up the leaflet"));
        assert!(!is_take_command("drop lamp"));
        assert!(!is_take_command("look"));
    }
}
