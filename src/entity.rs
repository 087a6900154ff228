use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value bag used for item properties, status effects and
/// NPC properties. Insertion-ordered so rendered output is stable.
pub type PropertyMap = IndexMap<String, Value>;

/// Health states that count as "no longer with us".
const DEAD_STATES: &[&str] = &["dead", "deceased", "unconscious"];

fn default_health() -> String {
    "healthy".into()
}

fn default_energy() -> String {
    "energized".into()
}

fn default_attitude() -> String {
    "neutral".into()
}

// ---------------------------------------------------------------------------
// Items and skills
// ---------------------------------------------------------------------------

/// An inventory item. Items are replaced wholesale on update, never
/// mutated in place. Duplicate names within one inventory are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Free-text cost ("10 energy", "a favor owed"). Deliberately not
    /// numeric; the generator decides what costs mean.
    pub cost: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

/// Common character state shared by the player and NPCs.
///
/// Health and energy are free-text status tokens ("healthy", "wounded",
/// "exhausted"...), not numbers. The engine imposes no semantics on them
/// beyond the dead-state vocabulary behind [`Character::is_alive`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub description: String,
    #[serde(default = "default_health")]
    pub health: String,
    #[serde(default = "default_energy")]
    pub energy: String,
    /// Named status effect -> value. Absence of a key means the effect
    /// is not active.
    #[serde(default)]
    pub status: PropertyMap,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub skills: Vec<Skill>,
}

/// The player shares the full character contract with no extra fields.
pub type Player = Character;

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            health: default_health(),
            energy: default_energy(),
            status: PropertyMap::new(),
            inventory: Vec::new(),
            skills: Vec::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        !DEAD_STATES.contains(&self.health.as_str())
    }

    /// Apply a partial update produced by action resolution.
    ///
    /// Health/energy are replaced wholesale when present. The status map
    /// is merged key-by-key with null-deletes-key semantics. `add_items`
    /// appends without dedup; `remove_items` removes every item matching
    /// each name.
    pub fn apply(&mut self, delta: &CharacterDelta) {
        if let Some(health) = &delta.health {
            self.health = health.clone();
        }
        if let Some(energy) = &delta.energy {
            self.energy = energy.clone();
        }
        if let Some(status) = &delta.status {
            merge_properties(&mut self.status, status);
        }
        for item in &delta.add_items {
            self.inventory.push(item.clone());
        }
        for name in &delta.remove_items {
            self.inventory.retain(|item| &item.name != name);
        }
    }
}

/// A non-player character: the common character state plus an attitude
/// and an NPC-only property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    #[serde(flatten)]
    pub base: Character,
    /// Open vocabulary: "friendly", "neutral", "hostile", ...
    #[serde(default = "default_attitude")]
    pub attitude: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Npc {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            base: Character::new(name, description),
            attitude: default_attitude(),
            properties: PropertyMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn apply(&mut self, delta: &NpcDelta) {
        self.base.apply(&delta.base);
        if let Some(attitude) = &delta.attitude {
            self.attitude = attitude.clone();
        }
        if let Some(properties) = &delta.properties {
            merge_properties(&mut self.properties, properties);
        }
    }
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// Partial-update record for a character. Unknown keys in the source
/// JSON are ignored on purpose; the generator is free to invent fields
/// we do not understand yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterDelta {
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub energy: Option<String>,
    /// A null value for an existing key removes it; anything else upserts.
    #[serde(default)]
    pub status: Option<PropertyMap>,
    #[serde(default)]
    pub add_items: Vec<Item>,
    #[serde(default)]
    pub remove_items: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NpcDelta {
    #[serde(flatten)]
    pub base: CharacterDelta,
    #[serde(default)]
    pub attitude: Option<String>,
    #[serde(default)]
    pub properties: Option<PropertyMap>,
}

/// Key-by-key merge where a null value deletes the key and any other
/// value upserts it. Shared by status maps and NPC property maps.
fn merge_properties(target: &mut PropertyMap, updates: &PropertyMap) {
    for (key, value) in updates {
        if value.is_null() {
            target.shift_remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str) -> Item {
        Item {
            name: name.into(),
            description: format!("a {name}"),
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn health_and_energy_replaced_wholesale() {
        let mut hero = Character::new("Asha", "a wandering scholar");
        hero.apply(&CharacterDelta {
            health: Some("wounded".into()),
            energy: Some("exhausted".into()),
            ..Default::default()
        });
        assert_eq!(hero.health, "wounded");
        assert_eq!(hero.energy, "exhausted");
    }

    #[test]
    fn null_status_value_removes_the_key() {
        let mut hero = Character::new("Asha", "a wandering scholar");
        hero.status.insert("poisoned".into(), json!("mild"));

        let mut status = PropertyMap::new();
        status.insert("poisoned".into(), Value::Null);
        status.insert("blessed".into(), json!(true));
        hero.apply(&CharacterDelta {
            status: Some(status),
            ..Default::default()
        });

        assert!(!hero.status.contains_key("poisoned"));
        assert_eq!(hero.status.get("blessed"), Some(&json!(true)));
    }

    #[test]
    fn add_items_keeps_duplicates() {
        let mut hero = Character::new("Asha", "a wandering scholar");
        hero.apply(&CharacterDelta {
            add_items: vec![item("torch"), item("torch")],
            ..Default::default()
        });
        assert_eq!(hero.inventory.len(), 2);
    }

    #[test]
    fn remove_items_removes_every_match() {
        let mut hero = Character::new("Asha", "a wandering scholar");
        hero.inventory = vec![item("torch"), item("rope"), item("torch")];
        hero.apply(&CharacterDelta {
            remove_items: vec!["torch".into()],
            ..Default::default()
        });
        assert_eq!(hero.inventory.len(), 1);
        assert_eq!(hero.inventory[0].name, "rope");
    }

    #[test]
    fn is_alive_tracks_the_dead_state_vocabulary() {
        let mut hero = Character::new("Asha", "a wandering scholar");
        assert!(hero.is_alive());
        for state in ["dead", "deceased", "unconscious"] {
            hero.health = state.into();
            assert!(!hero.is_alive(), "{state} should not count as alive");
        }
        hero.health = "barely standing".into();
        assert!(hero.is_alive());
    }

    #[test]
    fn npc_attitude_and_properties_update() {
        let mut guard = Npc::new("Toll Guard", "a bored halberdier");
        guard.properties.insert("bribed".into(), json!(false));

        let mut properties = PropertyMap::new();
        properties.insert("bribed".into(), Value::Null);
        properties.insert("alerted".into(), json!(true));
        guard.apply(&NpcDelta {
            attitude: Some("hostile".into()),
            properties: Some(properties),
            ..Default::default()
        });

        assert_eq!(guard.attitude, "hostile");
        assert!(!guard.properties.contains_key("bribed"));
        assert_eq!(guard.properties.get("alerted"), Some(&json!(true)));
    }

    #[test]
    fn npc_definition_fills_in_defaults() {
        let npc: Npc = serde_json::from_value(json!({
            "name": "Hollow Monk",
            "description": "a silent figure in grey robes"
        }))
        .unwrap();
        assert_eq!(npc.attitude, "neutral");
        assert_eq!(npc.base.health, "healthy");
        assert_eq!(npc.base.energy, "energized");
        assert!(npc.base.inventory.is_empty());
    }

    #[test]
    fn unknown_delta_keys_are_ignored() {
        let delta: CharacterDelta = serde_json::from_value(json!({
            "health": "bruised",
            "mana": 40,
            "alignment": "chaotic"
        }))
        .unwrap();
        assert_eq!(delta.health.as_deref(), Some("bruised"));
    }
}
