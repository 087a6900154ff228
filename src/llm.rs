use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::dm::Generator;

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

/// Symbolic model selection, one per job the dungeon master has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    /// Scenario creation: the widest, most creative sampling.
    Worldbuilder,
    /// Scene generation and action resolution.
    Narrator,
    /// Structured character outfitting.
    Outfitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Creative,
    Analytical,
}

/// Sampling defaults for one symbolic choice. With a single local model
/// the "model" distinction becomes a sampler preset.
#[derive(Debug)]
pub struct ModelCard {
    pub name: &'static str,
    pub tier: ModelTier,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Immutable registry mapping each choice to its card.
const MODEL_CARDS: &[(ModelChoice, ModelCard)] = &[
    (
        ModelChoice::Worldbuilder,
        ModelCard {
            name: "worldbuilder",
            tier: ModelTier::Creative,
            max_tokens: 4000,
            temperature: 0.9,
        },
    ),
    (
        ModelChoice::Narrator,
        ModelCard {
            name: "narrator",
            tier: ModelTier::Creative,
            max_tokens: 2000,
            temperature: 0.7,
        },
    ),
    (
        ModelChoice::Outfitter,
        ModelCard {
            name: "outfitter",
            tier: ModelTier::Analytical,
            max_tokens: 2000,
            temperature: 0.4,
        },
    ),
];

pub fn card(choice: ModelChoice) -> &'static ModelCard {
    MODEL_CARDS
        .iter()
        .find(|(c, _)| *c == choice)
        .map(|(_, card)| card)
        .expect("every model choice has a card")
}

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

pub struct ModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Hard cap on tokens per completion, whatever the card asks for.
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8092,
            max_tokens: 4096,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler builders
// ---------------------------------------------------------------------------

fn build_sampler(card: &ModelCard) -> LlamaSampler {
    // Creative presets sample wide; analytical presets keep structured
    // outputs tight.
    let (top_k, top_p) = match card.tier {
        ModelTier::Creative => (40, 0.95),
        ModelTier::Analytical => (20, 0.90),
    };
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(top_k),
        LlamaSampler::top_p(top_p, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(card.temperature),
        LlamaSampler::dist(1234),
    ])
}

// ---------------------------------------------------------------------------
// LLM — loaded model handle
// ---------------------------------------------------------------------------

pub struct LLM {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
    max_tokens: usize,
}

impl LLM {
    pub fn load_model(model_path: &str, config: ModelConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        info!("Model loaded successfully");

        let ctx_params = LlamaContextParams::default().with_n_ctx(Some(
            NonZeroU32::new(config.n_ctx).context("n_ctx must be > 0")?,
        ));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        Ok(Self {
            backend,
            model,
            ctx,
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
        })
    }

    /// Core generation: tokenize messages, feed prompt, sample tokens.
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        sampler: &mut LlamaSampler,
        max_tokens: usize,
    ) -> Result<String> {
        info!("=== LLM CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        self.ctx.clear_kv_cache();

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to create chat messages")?;

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;

        info!("Prompt tokenized: {} tokens", tokens.len());

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx
            .decode(&mut batch)
            .context("initial decode failed")?;

        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..max_tokens.min(self.max_tokens) {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        info!(
            "=== LLM RAW OUTPUT ({} chars) ===\n{}\n=== END OUTPUT ===",
            output.len(),
            output
        );

        Ok(output)
    }
}

impl Generator for LLM {
    fn complete(&mut self, card: &ModelCard, system: &str, user: &str) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let mut sampler = build_sampler(card);
        self.generate(&messages, &mut sampler, card.max_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_choice_resolves_to_a_card() {
        for choice in [
            ModelChoice::Worldbuilder,
            ModelChoice::Narrator,
            ModelChoice::Outfitter,
        ] {
            let card = card(choice);
            assert!(card.max_tokens > 0);
            assert!(card.temperature > 0.0);
        }
    }

    #[test]
    fn worldbuilder_samples_hotter_than_the_outfitter() {
        assert!(
            card(ModelChoice::Worldbuilder).temperature
                > card(ModelChoice::Outfitter).temperature
        );
        assert_eq!(card(ModelChoice::Outfitter).tier, ModelTier::Analytical);
    }
}
