// SPDX-License-Identifier: MIT OR Apache-2.0

//! Walkthrough: capture target rows for a prompt, then neutralize the
//! victim rows of its conditioning.
//!
//! ```bash
//! cargo run --example neutralize_walkthrough -- path/to/tokenizer.json
//! RUST_LOG=candle_cutoff=debug cargo run --example neutralize_walkthrough
//! ```
//!
//! With a `tokenizer.json` (e.g. a CLIP tokenizer) the prompt is split the
//! way a real text encoder splits it; without one a whitespace tokenizer
//! is used.  The "encoder" is a fixed hash embedding, so the numbers only
//! illustrate which rows move.

use candle_core::{Device, Tensor};
use candle_cutoff::{
    BlendOutcome, Cutoff, CutoffConfig, EncoderPair, EncoderTag, PromptTokenizer, TextEncoder,
    TokenEncoder,
};
use tracing_subscriber::EnvFilter;

const HIDDEN: usize = 8;

/// Whitespace tokenizer hashing each word to an id.
struct Whitespace;

impl TokenEncoder for Whitespace {
    fn encode_raw(&self, text: &str) -> candle_cutoff::Result<Vec<u32>> {
        Ok(text
            .replace(',', " , ")
            .to_lowercase()
            .split_whitespace()
            .map(|w| {
                w.bytes()
                    .fold(17_u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
                    % 4096
            })
            .collect())
    }
}

/// Embeds each token as a fixed pseudo-random vector plus a prompt-wide
/// context term, so blanking a word shifts every row.
struct HashEncoder {
    // TRAIT_OBJECT: tokenizer chosen at runtime
    tokenizer: Box<dyn TokenEncoder + Send + Sync>,
}

impl TextEncoder for HashEncoder {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    fn encode(&self, texts: &[&str]) -> candle_cutoff::Result<Tensor> {
        let mut data = Vec::with_capacity(texts.len());
        for text in texts {
            let ids = self.tokenizer.encode_raw(text)?;
            // CAST: u32 → f32, ids are small
            let context: f32 = ids.iter().map(|&i| (i % 97) as f32).sum::<f32>() / 97.0;
            let rows: Vec<Vec<f32>> = ids
                .iter()
                .map(|&id| {
                    (0..HIDDEN)
                        .map(|h| {
                            let seed = id.wrapping_mul(2_654_435_761).wrapping_add(h as u32);
                            (seed % 1000) as f32 / 1000.0 + context
                        })
                        .collect()
                })
                .collect();
            data.push(rows);
        }
        Ok(Tensor::new(data, &Device::Cpu)?)
    }

    fn tokenizer(&self) -> &dyn TokenEncoder {
        self.tokenizer.as_ref()
    }
}

fn encoder(path: Option<&str>) -> candle_cutoff::Result<HashEncoder> {
    let tokenizer: Box<dyn TokenEncoder + Send + Sync> = match path {
        Some(p) => Box::new(PromptTokenizer::from_hf_path(p)?),
        None => Box::new(Whitespace),
    };
    Ok(HashEncoder { tokenizer })
}

fn main() -> candle_cutoff::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("candle_cutoff=info")),
        )
        .init();

    let path = std::env::args().nth(1);

    // 1. Options as the host stores them
    let config = CutoffConfig::from_json_str(
        r#"{
            "cutoff_forge_enable": true,
            "cutoff_forge_targets": "blue",
            "cutoff_forge_apply_te1": true,
            "cutoff_forge_source_expand_n": 2,
            "cutoff_forge_decay_mode": "cosine",
            "cutoff_forge_debug_log": true
        }"#,
    )?;
    println!("Effective config: {}", config.to_json()?);

    // 2. Capture hook, right after the encoder ran
    let engine = encoder(path.as_deref())?;
    let prompt = "a girl with blue hair, red dress and a white hat";
    let mut cond = engine.encode(&[prompt])?;
    let mut cutoff = Cutoff::new();
    let state = cutoff.observe(&engine, prompt, &cond, &config);
    println!("\nPrompt: \"{prompt}\"");
    println!("  source rows: {:?}", state.source);
    println!("  victim rows: {:?}", state.victim);
    println!("  dummy text:  \"{}\"", state.dummy_text);

    // 3. Blend hook, on the final conditioning
    let before: Vec<Vec<f32>> = cond.get(0)?.to_vec2()?;
    let encoders = EncoderPair::single(Box::new(encoder(path.as_deref())?));
    match cutoff.blend(&mut cond, &config, &encoders) {
        BlendOutcome::Applied(report) => {
            println!(
                "\nBlended {} rows of {} with {} toward {:?} neutral",
                report.rows.len(),
                report.tag,
                report.method,
                report.neutral
            );
            let after: Vec<Vec<f32>> = cond.get(0)?.to_vec2()?;
            for (i, (a, b)) in after.iter().zip(&before).enumerate() {
                let shift: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
                println!("  row {i:>2}: shift {shift:.4}");
            }
        }
        other => println!("\nNo blend: {other:?}"),
    }

    debug_assert_eq!(cutoff.store().last_tag(), Some(EncoderTag::Primary));
    Ok(())
}
