//! ARIANNA body — a breathing single-layer attention lung.
//!
//! This is the CLI binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use arianna_body::core::{LungConfig, LungModel};
use arianna_body::learning::AdapterConfig;
use arianna_body::runtime::{BreathConfig, BreathLoop};

/// ARIANNA body CLI.
#[derive(Parser, Debug)]
#[command(
    name = "arianna",
    about = "ARIANNA body — bidirectional attention lung with gradient-free adapters",
    version
)]
struct Cli {
    /// JSON run configuration (lung, adapter and breath sections).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Field script applied before the first breath.
    #[arg(short, long)]
    script: Option<PathBuf>,

    #[arg(long)]
    vocab: Option<usize>,

    #[arg(long)]
    d_model: Option<usize>,

    #[arg(long)]
    ctx_len: Option<usize>,

    #[arg(long)]
    heads: Option<usize>,

    /// Seed for lung weights.
    #[arg(long)]
    seed: Option<u64>,

    /// Adapter rank.
    #[arg(long)]
    rank: Option<usize>,

    #[arg(long)]
    alpha: Option<f32>,

    #[arg(long)]
    lr: Option<f32>,

    #[arg(long)]
    decay: Option<f32>,

    /// Number of breaths.
    #[arg(short = 'n', long, default_value_t = 8)]
    steps: usize,

    /// Learn toward `--target` on every breath; `--learn=false` turns it off.
    /// Unset keeps the config file's choice.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    learn: Option<bool>,

    /// Token to learn toward.
    #[arg(long)]
    target: Option<usize>,

    /// Read context right to left.
    #[arg(long, default_value_t = false)]
    rtl: bool,

    /// 0 = past, 0.5 = symmetric, 1 = future.
    #[arg(long)]
    temporal_alpha: Option<f32>,

    /// Initial context token ids.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    context: Vec<i32>,
}

/// Everything a run needs, loadable from JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    lung: LungConfig,
    adapter: AdapterConfig,
    breath: BreathConfig,
}

impl RunConfig {
    fn load(cli: &Cli) -> Result<Self> {
        let mut run = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => RunConfig::default(),
        };
        run.apply_flags(cli);
        Ok(run)
    }

    /// Flags that were given override the loaded values.
    fn apply_flags(&mut self, cli: &Cli) {
        let lung = &mut self.lung;
        if let Some(v) = cli.vocab {
            lung.vocab_size = v;
        }
        if let Some(v) = cli.d_model {
            lung.d_model = v;
        }
        if let Some(v) = cli.ctx_len {
            lung.ctx_len = v;
        }
        if let Some(v) = cli.heads {
            lung.n_heads = v;
        }
        if let Some(v) = cli.seed {
            lung.seed = v;
        }

        let adapter = &mut self.adapter;
        if let Some(v) = cli.rank {
            adapter.rank = v;
        }
        if let Some(v) = cli.alpha {
            adapter.alpha = v;
        }
        if let Some(v) = cli.lr {
            adapter.lr = v;
        }
        if let Some(v) = cli.decay {
            adapter.decay = v;
        }

        if let Some(learn) = cli.learn {
            self.breath.learn = learn;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let run = RunConfig::load(&cli)?;

    tracing::info!("ARIANNA body v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Lung: vocab={}, d_model={}, ctx_len={}, heads={}",
        run.lung.vocab_size,
        run.lung.d_model,
        run.lung.ctx_len,
        run.lung.n_heads,
    );

    let mut lung = LungModel::new(run.lung.clone()).context("building lung")?;
    lung.set_rtl(cli.rtl);
    if let Some(alpha) = cli.temporal_alpha {
        lung.set_temporal_alpha(alpha);
    }

    let mut body = BreathLoop::new(lung, run.adapter.clone(), run.breath.clone()).context("building breath loop")?;

    if let Some(path) = &cli.script {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        let applied = body.exec(&script);
        tracing::info!("Script {}: {} commands applied", path.display(), applied);
    }

    let ctx_len = run.lung.ctx_len;
    let mut context = cli.context.clone();
    if context.is_empty() {
        tracing::warn!("No context provided. Breathing on token 0.");
        context.push(0);
    }

    for step in 0..cli.steps {
        let window_start = context.len().saturating_sub(ctx_len);
        let outcome = body.breathe(&context[window_start..], cli.target)?;

        tracing::info!(
            "breath {:>3}: entropy={:.4} argmax={} prediction={} p(target)={:.4} |Δ|={:.4} ({} us)",
            step,
            outcome.entropy,
            outcome.argmax,
            outcome.prediction,
            outcome.target_prob,
            outcome.delta_norm,
            outcome.elapsed_us,
        );

        context.push(outcome.prediction as i32);
    }

    let stats = body.stats();
    tracing::info!(
        "Done: {} breaths, {} learning steps, {} compositions",
        stats.breaths,
        stats.learning_steps,
        stats.compositions,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(text: &str, args: &[&str]) -> RunConfig {
        let cli = Cli::parse_from(std::iter::once("arianna").chain(args.iter().copied()));
        let mut run: RunConfig = serde_json::from_str(text).unwrap();
        run.apply_flags(&cli);
        run
    }

    #[test]
    fn test_config_learn_survives_without_flag() {
        let run = from_json(r#"{"breath": {"learn": true}}"#, &[]);
        assert!(run.breath.learn);
        let run = from_json(r#"{"breath": {"learn": false}}"#, &[]);
        assert!(!run.breath.learn);
    }

    #[test]
    fn test_learn_flag_overrides_config() {
        let run = from_json(r#"{"breath": {"learn": false}}"#, &["--learn", "4", "5"]);
        assert!(run.breath.learn);
        let run = from_json(r#"{"breath": {"learn": true}}"#, &["--learn=false"]);
        assert!(!run.breath.learn);
    }

    #[test]
    fn test_flags_override_dimensions() {
        let run = from_json(r#"{"lung": {"vocab_size": 32}}"#, &["--heads", "2", "--rank", "3", "1", "2"]);
        assert_eq!(run.lung.vocab_size, 32);
        assert_eq!(run.lung.n_heads, 2);
        assert_eq!(run.adapter.rank, 3);
    }
}
