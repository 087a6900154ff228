use log::{debug, info};

use crate::dm::ActionResult;
use crate::scene::{Scenario, Scene};
use crate::entity::Player;

/// The authoritative, exclusively-owned view of one session's world.
///
/// Lifecycle: setup (no current scene) -> active -> ended. Once
/// `game_over` is set nothing mutates the state again.
#[derive(Debug)]
pub struct GameState {
    pub player: Option<Player>,
    pub scenario: Scenario,
    pub current_scene: Option<Scene>,
    /// Previously visited scenes, append-only.
    pub scene_history: Vec<Scene>,
    pub game_over: bool,
    pub ending_message: String,
}

impl GameState {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            player: None,
            scenario,
            current_scene: None,
            scene_history: Vec::new(),
            game_over: false,
            ending_message: String::new(),
        }
    }

    /// Apply an action result to the world, in fixed order: player
    /// delta, per-NPC deltas, scene deltas, history push on movement,
    /// then the game-over check. Deltas to the outgoing scene's NPCs
    /// land before the move is recorded.
    ///
    /// Movement only pushes the current scene onto history here; the
    /// driver resolves the target and assigns the new current scene.
    pub fn apply(&mut self, result: &ActionResult) {
        if self.game_over {
            return;
        }

        if let Some(delta) = &result.player_updates {
            if let Some(player) = &mut self.player {
                player.apply(delta);
                debug!(
                    "player updated: health={}, energy={}",
                    player.health, player.energy
                );
            }
        }

        if let Some(scene) = &mut self.current_scene {
            for (name, delta) in &result.character_updates {
                match scene.get_character_mut(name) {
                    Some(npc) => npc.apply(delta),
                    // The generator sometimes names characters that are
                    // not here; that is not an error.
                    None => debug!("character update for absent NPC '{name}' skipped"),
                }
            }

            if let Some(updates) = &result.scene_updates {
                for npc in &updates.add_characters {
                    scene.add_character(npc.clone());
                }
                for name in &updates.remove_characters {
                    scene.remove_character(name);
                }
                for (location, scene_id) in &updates.new_connections {
                    scene.add_connection(location.clone(), scene_id.clone());
                }
            }
        }

        if result.move_to_scene.is_some() {
            if let Some(current) = &self.current_scene {
                self.scene_history.push(current.clone());
            }
        }

        if result.game_over {
            self.game_over = true;
            self.ending_message = result
                .ending_message
                .clone()
                .unwrap_or_else(|| "Game Over".into());
            info!("game over: {}", self.ending_message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Character, Npc};
    use serde_json::json;

    fn fixture_state() -> GameState {
        let scenario: Scenario = serde_json::from_value(json!({
            "title": "The Drowned Keep",
            "starting_scene_id": "entrance",
            "scenes": {
                "entrance": {
                    "title": "Gatehouse",
                    "description": "Wet stone.",
                    "connections": {"Ancient Library": "library"},
                    "characters": [
                        {"name": "Toll Guard", "description": "a bored halberdier"}
                    ]
                }
            }
        }))
        .unwrap();
        let entrance = scenario.scenes["entrance"].instantiate("entrance");
        let mut state = GameState::new(scenario);
        state.player = Some(Character::new("Asha", "a wandering scholar"));
        state.current_scene = Some(entrance);
        state
    }

    fn result_from(value: serde_json::Value) -> ActionResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn player_delta_is_applied() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": true,
            "description": "The chain snaps back.",
            "player_updates": {"health": "wounded"}
        })));
        assert_eq!(state.player.as_ref().unwrap().health, "wounded");
    }

    #[test]
    fn npc_deltas_match_by_name_and_skip_absentees() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": true,
            "description": "The guard bristles.",
            "character_updates": {
                "Toll Guard": {"attitude": "hostile", "health": "bruised"},
                "Ghost Nobody": {"attitude": "friendly"}
            }
        })));
        let scene = state.current_scene.as_ref().unwrap();
        let guard = scene.get_character("Toll Guard").unwrap();
        assert_eq!(guard.attitude, "hostile");
        assert_eq!(guard.base.health, "bruised");
        assert!(scene.get_character("Ghost Nobody").is_none());
    }

    #[test]
    fn scene_deltas_add_remove_and_connect() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": true,
            "description": "A trapdoor creaks open.",
            "scene_updates": {
                "add_characters": [{"name": "Rat King", "description": "crowned in bones"}],
                "remove_characters": ["Toll Guard"],
                "new_connections": {"Trapdoor": "cellar"}
            }
        })));
        let scene = state.current_scene.as_ref().unwrap();
        assert!(scene.get_character("Toll Guard").is_none());
        let rat_king = scene.get_character("Rat King").unwrap();
        assert_eq!(rat_king.attitude, "neutral");
        assert_eq!(scene.connections["Trapdoor"], "cellar");
    }

    #[test]
    fn movement_pushes_the_mutated_scene_onto_history() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": true,
            "description": "You shove past the guard.",
            "character_updates": {"Toll Guard": {"attitude": "hostile"}},
            "move_to_scene": "library"
        })));
        // Outgoing-scene NPC deltas land before the move is recorded.
        assert_eq!(state.scene_history.len(), 1);
        let departed = &state.scene_history[0];
        assert_eq!(departed.id, "entrance");
        assert_eq!(departed.get_character("Toll Guard").unwrap().attitude, "hostile");
    }

    #[test]
    fn game_over_stores_the_ending_message() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": false,
            "description": "The water closes over you.",
            "game_over": true,
            "ending_message": "You died."
        })));
        assert!(state.game_over);
        assert_eq!(state.ending_message, "You died.");
    }

    #[test]
    fn game_over_without_a_message_uses_the_default() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": false,
            "description": "Everything fades.",
            "game_over": true
        })));
        assert_eq!(state.ending_message, "Game Over");
    }

    #[test]
    fn nothing_leaves_the_ended_state() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": false,
            "description": "The end.",
            "game_over": true,
            "ending_message": "You died."
        })));
        state.apply(&result_from(json!({
            "success": true,
            "description": "A miracle!",
            "player_updates": {"health": "reborn"},
            "move_to_scene": "library"
        })));
        assert_eq!(state.player.as_ref().unwrap().health, "healthy");
        assert!(state.scene_history.is_empty());
        assert_eq!(state.ending_message, "You died.");
    }

    #[test]
    fn added_npcs_can_receive_later_deltas() {
        let mut state = fixture_state();
        state.apply(&result_from(json!({
            "success": true,
            "description": "A stranger steps out of the mist.",
            "scene_updates": {
                "add_characters": [{"name": "Stranger", "description": "cloaked"}]
            }
        })));
        state.apply(&result_from(json!({
            "success": true,
            "description": "The stranger smiles.",
            "character_updates": {"Stranger": {"attitude": "friendly"}}
        })));
        let scene = state.current_scene.as_ref().unwrap();
        assert_eq!(scene.get_character("Stranger").unwrap().attitude, "friendly");
    }

    #[test]
    fn non_scene_fields_survive_without_player_or_scene() {
        let mut state = fixture_state();
        state.player = None;
        state.current_scene = None;
        // Must not panic when there is nothing to update.
        state.apply(&result_from(json!({
            "success": true,
            "description": "Wind howls in the void.",
            "player_updates": {"health": "wounded"},
            "character_updates": {"Anyone": {"attitude": "hostile"}},
            "move_to_scene": "library"
        })));
        assert!(state.scene_history.is_empty());
    }

    #[test]
    fn new_npc_keeps_the_supplied_attitude() {
        let mut state = fixture_state();
        let npc: Npc = serde_json::from_value(json!({
            "name": "Pale Warden",
            "description": "half-drowned",
            "attitude": "hostile"
        }))
        .unwrap();
        state.current_scene.as_mut().unwrap().add_character(npc);
        let scene = state.current_scene.as_ref().unwrap();
        assert_eq!(scene.get_character("Pale Warden").unwrap().attitude, "hostile");
    }
}
