use std::collections::HashMap;

use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, info, warn};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::entity::{Character, CharacterDelta, Item, Npc, NpcDelta, Player, Skill};
use crate::llm::{card, ModelCard, ModelChoice};
use crate::scene::{Scenario, Scene, SceneDef};
use crate::state::GameState;

// ---------------------------------------------------------------------------
// Errors and the generator seam
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DmError {
    /// Transport failure, unparseable output, or a response missing
    /// required fields. All three collapse into this one variant; the
    /// message carries the cause.
    #[error("generation failed: {0}")]
    Generation(String),
    /// Asked to resolve a scene with nothing to resolve it from.
    #[error("no scene to resolve: {0}")]
    Unresolvable(String),
}

/// The one non-deterministic dependency of the engine. Implemented by
/// the llama transport in `llm.rs`; tests script it.
pub trait Generator {
    /// Run a single completion. No retries here; retry policy belongs
    /// to whoever drives the game.
    fn complete(&mut self, card: &ModelCard, system: &str, user: &str) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &mut G {
    fn complete(&mut self, card: &ModelCard, system: &str, user: &str) -> Result<String> {
        (**self).complete(card, system, user)
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Pull a JSON object out of raw model output.
///
/// Strips `<think>` blocks, prefers a ```json fence over a plain one,
/// isolates the substring between the first `{` and the last `}`, and
/// if direct parsing still fails falls back to a permissive scan for
/// the largest brace-delimited substring.
pub fn extract_json(raw: &str) -> Result<Value, DmError> {
    let re_think = Regex::new(r"(?s)<think>.*?</think>").expect("static regex");
    let cleaned = re_think.replace_all(raw, "");

    let mut json_text: &str = &cleaned;
    if let Some(pos) = cleaned.find("```json") {
        let after = &cleaned[pos + "```json".len()..];
        json_text = after.split("```").next().unwrap_or(after);
    } else if let Some(pos) = cleaned.find("```") {
        let after = &cleaned[pos + "```".len()..];
        json_text = after.split("```").next().unwrap_or(after);
    }

    let isolated = match (json_text.find('{'), json_text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &json_text[start..=end],
        _ => json_text,
    };

    match serde_json::from_str(isolated.trim()) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            debug!("direct JSON parse failed ({first_err}), trying permissive scan");
            let re_json = Regex::new(r"(?s)\{.*\}").expect("static regex");
            if let Some(m) = re_json.find(json_text) {
                if let Ok(value) = serde_json::from_str(m.as_str()) {
                    return Ok(value);
                }
            }
            Err(DmError::Generation(format!(
                "no parseable JSON object in model output: {first_err}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Action results
// ---------------------------------------------------------------------------

/// What the generator decided a player action did. Only `success` and
/// `description` are required on the wire; everything else is a delta
/// that may or may not be present.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub description: String,
    #[serde(default)]
    pub player_updates: Option<CharacterDelta>,
    /// NPC name -> delta, applied to NPCs found in the current scene.
    #[serde(default)]
    pub character_updates: IndexMap<String, NpcDelta>,
    #[serde(default)]
    pub scene_updates: Option<SceneDelta>,
    #[serde(default)]
    pub move_to_scene: Option<String>,
    #[serde(default)]
    pub game_over: bool,
    #[serde(default)]
    pub ending_message: Option<String>,
}

impl ActionResult {
    /// A well-formed "that didn't work" result, used whenever action
    /// resolution cannot produce a real one.
    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            player_updates: None,
            character_updates: IndexMap::new(),
            scene_updates: None,
            move_to_scene: None,
            game_over: false,
            ending_message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SceneDelta {
    #[serde(default)]
    pub add_characters: Vec<Npc>,
    #[serde(default)]
    pub remove_characters: Vec<String>,
    #[serde(default)]
    pub new_connections: IndexMap<String, String>,
}

// ---------------------------------------------------------------------------
// Prompts — one fixed system instruction per request kind
// ---------------------------------------------------------------------------

const SCENARIO_PROMPT: &str = r#"You are an expert dungeon master creating an immersive text adventure game.
Create a compelling scenario with:
1. A rich setting description
2. A clear mission objective
3. A basic location layout with named connections between areas

Respond in JSON format with the following structure:
{
    "title": "Scenario title",
    "setting": "Detailed setting description",
    "objective": "Clear mission objective",
    "environment": "Description of the dungeon/environment",
    "starting_scene_id": "entrance",
    "scenes": {
        "entrance": {
            "title": "Scene title",
            "description": "Detailed scene description",
            "connections": {
                "Ancient Library": "library",
                "Dark Passage": "passage"
            },
            "characters": [
                {
                    "name": "Character Name",
                    "description": "Character description",
                    "attitude": "neutral",
                    "inventory": [
                        {"name": "Item Name", "description": "Item description"}
                    ],
                    "skills": [
                        {"name": "Skill Name", "description": "Skill description", "cost": "Cost description"}
                    ]
                }
            ]
        }
    }
}

Make it creative, immersive, and suitable for a text-based adventure game.

Key points about connections:
- Use descriptive location names like "Ancient Library", "Dark Passage", etc.
- Each connection links to a scene ID that should exist in the scenes object
- If Scene A connects to Scene B, Scene B should have a connection back to Scene A
- Include 2-4 connections per scene where appropriate"#;

const PLAYER_PROMPT: &str = r#"You are an expert game master helping a player create their character.
Based on the player's name and profile description, create appropriate
inventory items and skills.

Respond in JSON format with the following structure:
{
    "inventory": [
        {"name": "Item Name", "description": "Item description", "properties": {}}
    ],
    "skills": [
        {"name": "Skill Name", "description": "Skill description", "cost": "Cost description", "properties": {}}
    ]
}

Generate 3-5 inventory items and 3-5 skills that would make sense for the character."#;

const SCENE_PROMPT: &str = r#"You are an expert dungeon master creating a new scene for a text adventure game.
Based on the current game state and where the player is coming from,
create a compelling new scene.

Respond in JSON format with the following structure:
{
    "id": "scene_id",
    "title": "Scene title",
    "description": "Detailed scene description",
    "connections": {
        "Location Name 1": "scene_id1",
        "Location Name 2": "scene_id2"
    },
    "characters": [
        {
            "name": "Character Name",
            "description": "Character description",
            "attitude": "neutral/friendly/hostile",
            "inventory": [
                {"name": "Item Name", "description": "Item description"}
            ],
            "skills": [
                {"name": "Skill Name", "description": "Skill description", "cost": "Cost description"}
            ]
        }
    ]
}

Make it creative, immersive, and suitable for a text-based adventure game.
Ensure it fits with the overall scenario and the previous scene.

- The "connections" object maps location names to scene IDs
- Location names should be descriptive, like "Ancient Library", "Dark Passage", etc.
- Always include at least one connection back to the previous scene
- Include 2-4 total connections where appropriate"#;

const ACTION_PROMPT: &str = r#"You are an expert dungeon master resolving player actions in a text adventure game.
Based on the player's action, the current scene, and the player's state, determine
the outcome of the action.

Respond in JSON format with the following structure:
{
    "success": true/false,
    "description": "Detailed description of what happens",
    "player_updates": {
        "health": "new health status if changed",
        "energy": "new energy status if changed",
        "status": {"status_name": "status_value", "status_to_remove": null},
        "add_items": [{"name": "Item Name", "description": "Item description"}],
        "remove_items": ["Item Name to remove"]
    },
    "character_updates": {
        "Character Name": {
            "health": "new health status if changed",
            "energy": "new energy status if changed",
            "attitude": "new attitude if changed",
            "add_items": [{"name": "Item Name", "description": "Item description"}],
            "remove_items": ["Item Name to remove"]
        }
    },
    "scene_updates": {
        "add_characters": [{"name": "NPC Name", "description": "NPC description", "attitude": "neutral"}],
        "remove_characters": ["NPC Name to remove"],
        "new_connections": {"Location Name": "scene_id"}
    },
    "move_to_scene": "scene_id or null",
    "game_over": false,
    "ending_message": "Game over message if game_over is true"
}

Only include fields that are actually changing. If nothing changes, just include
success and description.

IMPORTANT: When the player attempts to move to a new location, check if that location
exists in the current scene's connections. If it does, set move_to_scene to the
corresponding scene_id. Navigation uses named locations, not directions."#;

/// Copy for the placeholder scene synthesized when scene generation
/// fails. The world graph must never dead-end, so the fallback always
/// gets an escape route when a previous scene exists.
const FALLBACK_TITLE: &str = "Mysterious Area";
const FALLBACK_DESCRIPTION: &str = "You've arrived at a mysterious area that seems to \
    shift and change before your eyes. The path behind you is clear, but the rest is \
    shrouded in mist.";
const FALLBACK_BACK_CONNECTION: &str = "Path Back";

// ---------------------------------------------------------------------------
// The dungeon master
// ---------------------------------------------------------------------------

/// The creative heart of the game: turns structured requests into
/// validated structured data, isolating all non-determinism and
/// transport failure from the rest of the engine.
pub struct DungeonMaster<G: Generator> {
    generator: G,
    /// Scene id -> raw generated definition. Write-once per id within a
    /// session, so re-entering a generated scene is idempotent.
    scene_memory: HashMap<String, SceneDef>,
}

/// The outfitting response for player setup.
#[derive(Debug, Deserialize)]
struct PlayerKit {
    inventory: Vec<Item>,
    skills: Vec<Skill>,
}

impl<G: Generator> DungeonMaster<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            scene_memory: HashMap::new(),
        }
    }

    /// One generation round-trip: invoke the generator exactly once,
    /// extract JSON, deserialize into the request kind's shape, then
    /// run the kind-specific semantic check.
    fn request<T, F>(
        &mut self,
        choice: ModelChoice,
        system: &str,
        user: &str,
        validate: F,
    ) -> Result<T, DmError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), String>,
    {
        let model = card(choice);
        info!("generation request: {} ({:?})", model.name, model.tier);
        let raw = self
            .generator
            .complete(model, system, user)
            .map_err(|e| DmError::Generation(format!("{e:#}")))?;
        let value = extract_json(&raw)?;
        let parsed: T = serde_json::from_value(value)
            .map_err(|e| DmError::Generation(format!("response missing required fields: {e}")))?;
        validate(&parsed).map_err(DmError::Generation)?;
        Ok(parsed)
    }

    /// Create a new campaign. There is no safe default for a missing
    /// scenario, so any failure propagates to the caller.
    pub fn create_scenario(&mut self) -> Result<Scenario, DmError> {
        let scenario: Scenario = self.request(
            ModelChoice::Worldbuilder,
            SCENARIO_PROMPT,
            "Create a new adventure scenario.",
            |s: &Scenario| {
                if s.scenes.contains_key(&s.starting_scene_id) {
                    Ok(())
                } else {
                    Err(format!(
                        "starting scene id '{}' not found in scenes",
                        s.starting_scene_id
                    ))
                }
            },
        )?;
        info!(
            "scenario created: '{}' ({} predefined scenes)",
            scenario.title,
            scenario.scenes.len()
        );
        Ok(scenario)
    }

    /// Outfit the player from their name and profile. Like scenario
    /// creation, failures propagate: the game cannot start without a
    /// player.
    pub fn setup_player(&mut self, name: &str, profile: &str) -> Result<Player, DmError> {
        let user = format!("Name: {name}\nProfile: {profile}\n\nGenerate appropriate inventory and skills.");
        let kit: PlayerKit =
            self.request(ModelChoice::Outfitter, PLAYER_PROMPT, &user, |_| Ok(()))?;

        let mut player = Character::new(name, profile);
        player.inventory = kit.inventory;
        player.skills = kit.skills;
        info!(
            "player '{}' outfitted with {} items and {} skills",
            player.name,
            player.inventory.len(),
            player.skills.len()
        );
        Ok(player)
    }

    /// Resolve a scene request against the three sources, in order:
    /// predefined in the scenario, remembered from an earlier
    /// generation, or freshly generated.
    ///
    /// With no target: the current scene is returned unchanged if one
    /// exists, otherwise the scenario's starting scene is resolved.
    pub fn resolve_scene(
        &mut self,
        state: &GameState,
        target_scene_id: Option<&str>,
    ) -> Result<Scene, DmError> {
        let scene_id = match target_scene_id {
            Some(id) => id,
            None => {
                if let Some(current) = &state.current_scene {
                    return Ok(current.clone());
                }
                state.scenario.starting_scene_id.as_str()
            }
        };

        if let Some(def) = state.scenario.scenes.get(scene_id) {
            debug!("scene '{scene_id}' resolved from the scenario");
            return Ok(def.instantiate(scene_id));
        }

        if target_scene_id.is_none() {
            // The starting scene must be predefined; generating it would
            // mean the scenario validator let a bad id through.
            return Err(DmError::Unresolvable(format!(
                "starting scene '{scene_id}' is not in the scenario"
            )));
        }

        if let Some(def) = self.scene_memory.get(scene_id) {
            debug!("scene '{scene_id}' resolved from memory");
            return Ok(def.instantiate(scene_id));
        }

        Ok(self.generate_scene(state, scene_id))
    }

    /// Generate a scene the scenario never defined. Never fails: any
    /// transport/parse/validation error degrades to a placeholder scene
    /// with an escape route back.
    fn generate_scene(&mut self, state: &GameState, scene_id: &str) -> Scene {
        let user = build_scene_context(state, scene_id);
        let generated: Result<SceneDef, DmError> =
            self.request(ModelChoice::Narrator, SCENE_PROMPT, &user, |_| Ok(()));

        match generated {
            Ok(def) => {
                info!("scene '{scene_id}' generated: '{}'", def.title);
                self.scene_memory.insert(scene_id.to_string(), def.clone());
                def.instantiate(scene_id)
            }
            Err(e) => {
                warn!("scene generation for '{scene_id}' failed, using fallback: {e}");
                fallback_scene(state, scene_id)
            }
        }
    }

    /// Resolve a player action into a result record. Never raises past
    /// the turn loop: failures come back as an unsuccessful result with
    /// the cause folded into the description.
    pub fn resolve_action(&mut self, action: &str, state: &GameState) -> ActionResult {
        let user = build_action_context(state, action);
        match self.request(ModelChoice::Narrator, ACTION_PROMPT, &user, |_| Ok(())) {
            Ok(result) => result,
            Err(e) => {
                warn!("action resolution failed: {e}");
                ActionResult::failure(format!(
                    "I'm having trouble understanding what happened. Let's try again. ({e})"
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Context builders and fallbacks
// ---------------------------------------------------------------------------

/// User message for scene generation: the scenario, the scene the player
/// is leaving, and the location name they walked through (found by
/// reverse-looking-up the connection that targets the new id).
fn build_scene_context(state: &GameState, scene_id: &str) -> String {
    let mut context = format!(
        "Scenario: {}\n",
        serde_json::to_string_pretty(&state.scenario).unwrap_or_default()
    );

    if let Some(current) = &state.current_scene {
        context.push_str(&format!(
            "\nPrevious Scene:\n- Title: {}\n- Description: {}\n- ID: {}\n",
            current.title, current.description, current.id
        ));
        let location_name = current
            .connections
            .iter()
            .find(|(_, target)| target.as_str() == scene_id)
            .map(|(location, _)| location.as_str());
        if let Some(location) = location_name {
            context.push_str(&format!(
                "\nThe player is going to '{location}' from the previous scene.\n"
            ));
        }
    }

    context.push_str(&format!("\nGenerate a new scene with ID: {scene_id}"));
    context
}

/// User message for action resolution: a snapshot of the player and the
/// current scene, then the raw action text.
fn build_action_context(state: &GameState, action: &str) -> String {
    let mut context = String::new();

    if let Some(player) = &state.player {
        let inventory: Vec<Value> = player
            .inventory
            .iter()
            .map(|i| json!({"name": i.name, "description": i.description}))
            .collect();
        let skills: Vec<Value> = player
            .skills
            .iter()
            .map(|s| json!({"name": s.name, "description": s.description, "cost": s.cost}))
            .collect();
        context.push_str(&format!(
            "Player:\n- Name: {}\n- Description: {}\n- Health: {}\n- Energy: {}\n- Status: {}\n- Inventory: {}\n- Skills: {}\n",
            player.name,
            player.description,
            player.health,
            player.energy,
            serde_json::to_string(&player.status).unwrap_or_default(),
            serde_json::to_string(&inventory).unwrap_or_default(),
            serde_json::to_string(&skills).unwrap_or_default(),
        ));
    }

    if let Some(scene) = &state.current_scene {
        let characters: Vec<Value> = scene
            .characters
            .iter()
            .map(|npc| {
                json!({
                    "name": npc.base.name,
                    "description": npc.base.description,
                    "attitude": npc.attitude,
                    "health": npc.base.health,
                    "energy": npc.base.energy,
                    "inventory": npc.base.inventory.iter()
                        .map(|i| json!({"name": i.name, "description": i.description}))
                        .collect::<Vec<_>>(),
                    "skills": npc.base.skills.iter()
                        .map(|s| json!({"name": s.name, "description": s.description, "cost": s.cost}))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        context.push_str(&format!(
            "\nCurrent Scene:\n- ID: {}\n- Title: {}\n- Description: {}\n- Characters: {}\n- Connections: {}\n",
            scene.id,
            scene.title,
            scene.description,
            serde_json::to_string(&characters).unwrap_or_default(),
            serde_json::to_string(&scene.connections).unwrap_or_default(),
        ));
    }

    context.push_str(&format!("\nPlayer Action: {action}\n\nResolve this action."));
    context
}

/// Minimal placeholder scene for failed generation. Gets a "Path Back"
/// connection to the previous scene so the player is never stranded.
fn fallback_scene(state: &GameState, scene_id: &str) -> Scene {
    let mut connections = IndexMap::new();
    if let Some(current) = &state.current_scene {
        connections.insert(FALLBACK_BACK_CONNECTION.to_string(), current.id.clone());
    }
    SceneDef {
        id: Some(scene_id.to_string()),
        title: FALLBACK_TITLE.into(),
        description: FALLBACK_DESCRIPTION.into(),
        connections,
        characters: Vec::new(),
        properties: Default::default(),
    }
    .instantiate(scene_id)
}
