use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entity::{Npc, PropertyMap};

// ---------------------------------------------------------------------------
// Scene — a node in the world graph
// ---------------------------------------------------------------------------

/// A distinct location: description, the NPCs present, and named
/// connections to other scenes.
#[derive(Debug, Clone)]
pub struct Scene {
    /// Primary key, stable across regeneration.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Owned by the scene. Names are unique within one scene.
    pub characters: Vec<Npc>,
    /// Human-readable location name -> target scene id. Location names
    /// are keys, so duplicates within a scene resolve last-write-wins;
    /// iteration order is insertion order.
    pub connections: IndexMap<String, String>,
    pub properties: PropertyMap,
}

impl Scene {
    pub fn add_character(&mut self, character: Npc) {
        self.characters.push(character);
    }

    /// Removes every character with the given name.
    pub fn remove_character(&mut self, name: &str) {
        self.characters.retain(|c| c.name() != name);
    }

    /// Linear scan; scenes hold a handful of characters at most.
    pub fn get_character(&self, name: &str) -> Option<&Npc> {
        self.characters.iter().find(|c| c.name() == name)
    }

    pub fn get_character_mut(&mut self, name: &str) -> Option<&mut Npc> {
        self.characters.iter_mut().find(|c| c.name() == name)
    }

    pub fn add_connection(&mut self, location_name: impl Into<String>, scene_id: impl Into<String>) {
        self.connections.insert(location_name.into(), scene_id.into());
    }

    pub fn remove_connection(&mut self, location_name: &str) {
        self.connections.shift_remove(location_name);
    }

    pub fn connections_description(&self) -> String {
        if self.connections.is_empty() {
            return "There are no visible paths from here.".into();
        }
        let names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        format!("You can go to: {}", names.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Raw scene definitions and the scenario
// ---------------------------------------------------------------------------

/// A scene as the generator describes it, before entity construction.
/// This is what scene memory stores: rebuilding a [`Scene`] from the
/// same definition must always produce structurally equivalent content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDef {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub connections: IndexMap<String, String>,
    #[serde(default)]
    pub characters: Vec<Npc>,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl SceneDef {
    /// Build the owned scene for this definition. `scene_id` wins over
    /// any id embedded in the definition itself.
    pub fn instantiate(&self, scene_id: &str) -> Scene {
        Scene {
            id: scene_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            characters: self.characters.clone(),
            connections: self.connections.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// The top-level campaign definition, generated once at game start and
/// read-mostly afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub title: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub environment: String,
    pub starting_scene_id: String,
    /// Scene id -> predefined definition.
    pub scenes: IndexMap<String, SceneDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_scene(id: &str) -> Scene {
        Scene {
            id: id.into(),
            title: "Test".into(),
            description: "A test scene".into(),
            characters: Vec::new(),
            connections: IndexMap::new(),
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn character_lookup_and_removal_by_name() {
        let mut scene = empty_scene("hall");
        scene.add_character(Npc::new("Warden", "keeper of the hall"));
        scene.add_character(Npc::new("Moth", "a tiny spirit"));

        assert!(scene.get_character("Warden").is_some());
        scene.remove_character("Warden");
        assert!(scene.get_character("Warden").is_none());
        assert_eq!(scene.characters.len(), 1);
    }

    #[test]
    fn duplicate_location_name_is_last_write_wins() {
        let mut scene = empty_scene("hall");
        scene.add_connection("North Door", "attic");
        scene.add_connection("North Door", "cellar");
        assert_eq!(scene.connections.len(), 1);
        assert_eq!(scene.connections["North Door"], "cellar");
    }

    #[test]
    fn connections_description_preserves_insertion_order() {
        let mut scene = empty_scene("hall");
        assert_eq!(
            scene.connections_description(),
            "There are no visible paths from here."
        );
        scene.add_connection("Zinc Gate", "gate");
        scene.add_connection("Ancient Library", "library");
        assert_eq!(
            scene.connections_description(),
            "You can go to: Zinc Gate, Ancient Library"
        );
    }

    #[test]
    fn scene_def_instantiates_with_the_given_id() {
        let def: SceneDef = serde_json::from_value(serde_json::json!({
            "id": "whatever_the_model_said",
            "title": "Sunken Archive",
            "description": "Shelves vanish into black water.",
            "connections": {"Marble Stair": "entrance"},
            "characters": [{"name": "Archivist", "description": "pale and patient"}]
        }))
        .unwrap();

        let scene = def.instantiate("archive");
        assert_eq!(scene.id, "archive");
        assert_eq!(scene.characters.len(), 1);
        assert_eq!(scene.characters[0].attitude, "neutral");
        assert_eq!(scene.connections["Marble Stair"], "entrance");
    }

    #[test]
    fn scenario_parses_with_optional_fields_missing() {
        let scenario: Scenario = serde_json::from_value(serde_json::json!({
            "title": "The Drowned Keep",
            "starting_scene_id": "entrance",
            "scenes": {
                "entrance": {"title": "Gatehouse", "description": "Wet stone."}
            }
        }))
        .unwrap();
        assert_eq!(scenario.setting, "");
        assert!(scenario.scenes.contains_key("entrance"));
    }
}
