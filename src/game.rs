use std::io::{self, Write};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::dm::{DungeonMaster, Generator};
use crate::entity::Player;
use crate::scene::Scene;
use crate::state::GameState;

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// Prompt until the player types something non-empty.
fn prompt(label: &str) -> Result<String> {
    loop {
        print!("{label}");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();
        if !input.is_empty() {
            return Ok(input.to_string());
        }
        println!("(Please enter something.)");
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn show_scene(scene: &Scene) {
    println!("\n========================================");
    println!("  {}", scene.title);
    println!("========================================");
    println!("{}\n", scene.description);

    println!("{}", scene.connections_description());

    if !scene.characters.is_empty() {
        println!("\nCharacters present:");
        for npc in &scene.characters {
            if npc.base.is_alive() {
                println!("  - {} ({})", npc.name(), npc.attitude);
            } else {
                println!("  - {} ({})", npc.name(), npc.base.health);
            }
        }
    }
}

fn show_status(player: &Player) {
    println!("\n--- {} ---", player.name);
    println!("  Health: {}", player.health);
    println!("  Energy: {}", player.energy);
    if !player.status.is_empty() {
        let effects: Vec<&str> = player.status.keys().map(String::as_str).collect();
        println!("  Status: {}", effects.join(", "));
    }
}

fn show_inventory(player: &Player) {
    if player.inventory.is_empty() {
        println!("\nYour inventory is empty.");
        return;
    }
    println!("\nInventory:");
    for item in &player.inventory {
        println!("  - {}: {}", item.name, item.description);
    }
}

fn show_skills(player: &Player) {
    if player.skills.is_empty() {
        println!("\nYou don't have any skills yet.");
        return;
    }
    println!("\nSkills:");
    for skill in &player.skills {
        println!("  - {}: {} (Cost: {})", skill.name, skill.description, skill.cost);
    }
}

fn show_help() {
    println!("\nSpecial commands:");
    println!("  /help         This message");
    println!("  /status       Your character's condition");
    println!("  /inventory    What you are carrying");
    println!("  /skills       What you can do");
    println!("  /connections  Where you can go");
    println!("  /look         Look around the current scene");
    println!("  /quit         Leave the game");
    println!("\nAnything else is treated as an action, in your own words:");
    println!("  go to the Ancient Library");
    println!("  examine the artifact");
    println!("  talk to the guard");
}

// ---------------------------------------------------------------------------
// Turn loop
// ---------------------------------------------------------------------------

/// Handle a slash command. Returns `true` if the input was a command
/// (including /quit, which flags the state), `false` if it is an action
/// for the dungeon master.
fn handle_command(input: &str, state: &mut GameState) -> bool {
    let Some(command) = input.strip_prefix('/') else {
        return false;
    };
    match command {
        "help" => show_help(),
        "status" => match &state.player {
            Some(player) => show_status(player),
            None => println!("\nNo character yet."),
        },
        "inventory" => match &state.player {
            Some(player) => show_inventory(player),
            None => println!("\nNo character yet."),
        },
        "skills" => match &state.player {
            Some(player) => show_skills(player),
            None => println!("\nNo character yet."),
        },
        "connections" => {
            if let Some(scene) = &state.current_scene {
                println!("\n{}", scene.connections_description());
            }
        }
        "look" => {
            if let Some(scene) = &state.current_scene {
                show_scene(scene);
            }
        }
        "quit" => {
            state.game_over = true;
            state.ending_message = "You step out of the story.".into();
        }
        other => println!("\nUnknown command '/{other}'. Try /help."),
    }
    true
}

/// Run one full game: scenario creation, player setup, then the
/// turn-by-turn loop until the game ends.
pub fn run<G: Generator>(dm: &mut DungeonMaster<G>) -> Result<()> {
    println!("\n========================================");
    println!("          A NEW ADVENTURE");
    println!("========================================");
    println!("(The dungeon master is dreaming up a world...)\n");

    // No safe default exists for these two: a failure here ends the run.
    let scenario = dm
        .create_scenario()
        .context("could not create a scenario")?;

    println!("  {}", scenario.title);
    println!("----------------------------------------");
    println!("{}\n", scenario.setting);
    println!("Objective: {}\n", scenario.objective);

    let name = prompt("What is your name? ")?;
    let profile = prompt("Describe your character: ")?;

    println!("\n(Outfitting your character...)");
    let player = dm
        .setup_player(&name, &profile)
        .context("could not set up the player character")?;
    show_status(&player);
    show_inventory(&player);
    show_skills(&player);

    let mut state = GameState::new(scenario);
    state.player = Some(player);

    let first_scene = dm.resolve_scene(&state, None)?;
    info!("entering starting scene '{}'", first_scene.id);
    state.current_scene = Some(first_scene);

    println!("\nType /help for commands. The story begins.");

    while !state.game_over {
        if let Some(scene) = &state.current_scene {
            show_scene(scene);
        }

        let input = prompt("\n> ")?;
        if handle_command(&input, &mut state) {
            continue;
        }

        println!("\n(Thinking...)");
        let result = dm.resolve_action(&input, &state);
        println!("\n{}", result.description);

        let target = result.move_to_scene.clone();
        state.apply(&result);

        if state.game_over {
            break;
        }

        if let Some(target) = target {
            match dm.resolve_scene(&state, Some(&target)) {
                Ok(scene) => {
                    info!("moving to scene '{}'", scene.id);
                    state.current_scene = Some(scene);
                }
                Err(e) => {
                    // Scene resolution with a target degrades internally;
                    // reaching this means the state itself is unusable.
                    warn!("could not resolve scene '{target}': {e}");
                    println!("\nThe way forward blurs and you stay where you are.");
                }
            }
        }
    }

    println!("\n========================================");
    println!("             GAME OVER");
    println!("========================================");
    if !state.ending_message.is_empty() {
        println!("{}", state.ending_message);
    }
    println!();

    Ok(())
}
